//! Error types for the Conveyor operator
//!
//! Errors carry the kind, name and namespace of the object involved so a
//! failed Stage status points straight at the missing or broken dependency.

use thiserror::Error;

use crate::kube_utils::{is_already_exists, is_conflict, is_not_found};

/// Main error type for Conveyor operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API or transport error that no other variant classifies
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A required object does not exist
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        /// Resource kind (e.g. "CodebaseImageStream")
        kind: String,
        /// Object name
        name: String,
        /// Object namespace, empty for cluster-scoped objects
        namespace: String,
    },

    /// Create was rejected because the object is already present
    #[error("{kind} {name} already exists")]
    AlreadyExists {
        /// Resource kind
        kind: String,
        /// Object name
        name: String,
    },

    /// Optimistic concurrency check failed on write
    #[error("conflict updating {kind} {name}: the object has been modified")]
    Conflict {
        /// Resource kind
        kind: String,
        /// Object name
        name: String,
    },

    /// The cluster state is misconfigured (e.g. a pipeline without input streams)
    #[error("configuration error for {resource}: {message}")]
    Configuration {
        /// Offending resource identifier
        resource: String,
        /// Description of what is wrong
        message: String,
    },

    /// Creating or updating a dependent resource failed
    #[error("failed to {action} {kind} {name}: {source}")]
    Downstream {
        /// What was being attempted ("create", "update", "get", ...)
        action: String,
        /// Resource kind
        kind: String,
        /// Object name
        name: String,
        /// Underlying cause
        #[source]
        source: Box<Error>,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a not-found error for a namespaced object
    pub fn not_found(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Create a configuration error naming the offending resource
    pub fn configuration(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Configuration {
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Wrap an error with the action and object it happened on
    pub fn downstream(
        action: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
        source: Error,
    ) -> Self {
        Self::Downstream {
            action: action.into(),
            kind: kind.into(),
            name: name.into(),
            source: Box::new(source),
        }
    }

    /// Classify a kube-rs error against the object it was issued for.
    ///
    /// 404 becomes `NotFound`, 409 becomes `AlreadyExists` or `Conflict`
    /// depending on the API reason, anything else stays `Kube`.
    pub fn from_kube(
        err: kube::Error,
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        if is_not_found(&err) {
            Self::not_found(kind, namespace, name)
        } else if is_already_exists(&err) {
            Self::AlreadyExists {
                kind: kind.into(),
                name: name.into(),
            }
        } else if is_conflict(&err) {
            Self::Conflict {
                kind: kind.into(),
                name: name.into(),
            }
        } else {
            Self::Kube { source: err }
        }
    }

    /// True for `NotFound`, looking through `Downstream` wrappers
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Downstream { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// True for `AlreadyExists`, looking through `Downstream` wrappers
    pub fn is_already_exists(&self) -> bool {
        match self {
            Error::AlreadyExists { .. } => true,
            Error::Downstream { source, .. } => source.is_already_exists(),
            _ => false,
        }
    }

    /// True for `Conflict`, looking through `Downstream` wrappers
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Conflict { .. } => true,
            Error::Downstream { source, .. } => source.is_conflict(),
            _ => false,
        }
    }

    /// Check if this error is retryable
    ///
    /// Conflicts and transport failures clear up on their own. Missing
    /// dependencies are usually created by another controller, so they are
    /// retried too. Configuration and serialization errors need a spec change.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code)
            ),
            Error::NotFound { .. } => true,
            Error::AlreadyExists { .. } => false,
            Error::Conflict { .. } => true,
            Error::Configuration { .. } => false,
            Error::Downstream { source, .. } => source.is_retryable(),
            Error::Serialization(_) => false,
        }
    }
}
