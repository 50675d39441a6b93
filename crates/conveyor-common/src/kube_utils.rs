//! Kubernetes helpers shared by the Conveyor controllers
//!
//! Error classification for API responses, `ApiResource` construction for
//! third-party kinds that have no typed binding, and the merge patches every
//! controller issues (status and finalizers).

use kube::api::{Api, Patch, PatchParams};
use kube::core::ErrorResponse;
use kube::discovery::ApiResource;

// =============================================================================
// Error classification
// =============================================================================

fn api_response(err: &kube::Error) -> Option<&ErrorResponse> {
    match err {
        kube::Error::Api(ae) => Some(ae),
        _ => None,
    }
}

/// True when the API server answered 404
pub fn is_not_found(err: &kube::Error) -> bool {
    api_response(err).is_some_and(|ae| ae.code == 404)
}

/// True when a create was rejected because the object exists (409 AlreadyExists)
pub fn is_already_exists(err: &kube::Error) -> bool {
    api_response(err).is_some_and(|ae| ae.code == 409 && ae.reason == "AlreadyExists")
}

/// True when a write lost an optimistic concurrency race (409 Conflict)
pub fn is_conflict(err: &kube::Error) -> bool {
    api_response(err).is_some_and(|ae| ae.code == 409 && ae.reason != "AlreadyExists")
}

// =============================================================================
// HasApiResource Trait
// =============================================================================

/// Trait for kinds reached through `DynamicObject` with a compile-time known
/// group, version and kind.
///
/// # Example
/// ```ignore
/// impl HasApiResource for ProjectRequest {
///     const API_VERSION: &'static str = "project.openshift.io/v1";
///     const KIND: &'static str = "ProjectRequest";
/// }
///
/// let ar = ProjectRequest::api_resource();
/// ```
pub trait HasApiResource {
    /// Full API version (e.g., "project.openshift.io/v1", "v1")
    const API_VERSION: &'static str;
    /// Resource kind (e.g., "ProjectRequest")
    const KIND: &'static str;

    /// Build an ApiResource from the type's constants.
    fn api_resource() -> ApiResource {
        build_api_resource(Self::API_VERSION, Self::KIND)
    }
}

/// Build an ApiResource from an apiVersion string and kind.
///
/// The plural is derived by lowercasing the kind and appending "s", which
/// holds for every kind this operator touches.
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: format!("{}s", kind.to_lowercase()),
    }
}

/// Split an apiVersion into (group, version); core types have an empty group
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

// =============================================================================
// Patches
// =============================================================================

/// Patch the status sub-resource of a namespaced resource.
///
/// Serializes `status` into `{ "status": <status> }` and applies it via
/// merge-patch.
pub async fn patch_resource_status<T>(
    api: &Api<T>,
    name: &str,
    status: &impl serde::Serialize,
    field_manager: &str,
) -> Result<(), kube::Error>
where
    T: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
{
    let patch = serde_json::json!({ "status": status });
    api.patch_status(name, &PatchParams::apply(field_manager), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

/// Replace the finalizer list of an object.
///
/// The observed `resourceVersion` rides along in the patch so a concurrent
/// writer surfaces as a 409 Conflict instead of being overwritten.
pub async fn patch_finalizers<T>(
    api: &Api<T>,
    name: &str,
    resource_version: Option<&str>,
    finalizers: &[String],
    field_manager: &str,
) -> Result<(), kube::Error>
where
    T: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
{
    let mut metadata = serde_json::json!({ "finalizers": finalizers });
    if let Some(rv) = resource_version {
        metadata["resourceVersion"] = serde_json::Value::String(rv.to_string());
    }
    let patch = serde_json::json!({ "metadata": metadata });
    api.patch(name, &PatchParams::apply(field_manager), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

/// Compute the finalizer list with `finalizer` added, or `None` if already present
pub fn with_finalizer(current: Option<&[String]>, finalizer: &str) -> Option<Vec<String>> {
    let current = current.unwrap_or_default();
    if current.iter().any(|f| f == finalizer) {
        return None;
    }
    let mut next = current.to_vec();
    next.push(finalizer.to_string());
    Some(next)
}

/// Compute the finalizer list with `finalizer` removed, or `None` if absent
pub fn without_finalizer(current: Option<&[String]>, finalizer: &str) -> Option<Vec<String>> {
    let current = current.unwrap_or_default();
    if !current.iter().any(|f| f == finalizer) {
        return None;
    }
    Some(
        current
            .iter()
            .filter(|f| f.as_str() != finalizer)
            .cloned()
            .collect(),
    )
}
