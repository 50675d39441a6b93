//! Provisioning and deprovisioning chains
//!
//! A chain is a fixed sequence of steps. Which step follows which is decided
//! by `next`, and the platform decides which namespace step runs. The first
//! failing step stops the chain. Every step can be rerun safely, so a failed
//! chain is retried from the start on the next reconcile.

pub mod ci_job;
pub mod environment_labels;
pub mod image_stream;
pub mod namespace;
pub mod namespace_deletion;
pub mod rbac;

use std::fmt;

use kube::ResourceExt;
use tracing::debug;

use conveyor_common::crd::Stage;
use conveyor_common::{Error, PlatformConfig};

use crate::client::StageKubeClient;

// =============================================================================
// Provisioning
// =============================================================================

/// A step of the provisioning chain
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Handler {
    /// Routes to the namespace step matching the platform
    DelegateNamespace,
    /// Require an existing namespace (namespace management disabled)
    CheckNamespaceExists,
    /// Create a Namespace
    PutNamespace,
    /// Create a kiosk Space
    PutSpace,
    /// Request an OpenShift project
    PutProject,
    /// Create roles and bindings in the target namespace
    ConfigureRbac,
    /// Publish the stage's verified image streams
    PutImageStreams,
    /// Create or update the release job
    PutCiJob,
}

impl Handler {
    /// Step the chain starts at
    pub const FIRST: Handler = Handler::DelegateNamespace;

    /// Step that follows this one, `None` at the end of the chain
    pub fn next(self, config: &PlatformConfig) -> Option<Handler> {
        match self {
            Handler::DelegateNamespace if !config.manage_namespace => {
                Some(Handler::CheckNamespaceExists)
            }
            Handler::DelegateNamespace if config.is_kubernetes() && config.space_mode => {
                Some(Handler::PutSpace)
            }
            Handler::DelegateNamespace if config.is_kubernetes() => Some(Handler::PutNamespace),
            Handler::DelegateNamespace => Some(Handler::PutProject),
            Handler::CheckNamespaceExists
            | Handler::PutNamespace
            | Handler::PutSpace
            | Handler::PutProject => Some(Handler::ConfigureRbac),
            Handler::ConfigureRbac => Some(Handler::PutImageStreams),
            Handler::PutImageStreams => Some(Handler::PutCiJob),
            Handler::PutCiJob => None,
        }
    }

    async fn run(
        self,
        kube: &dyn StageKubeClient,
        stage: &Stage,
        config: &PlatformConfig,
    ) -> Result<(), Error> {
        match self {
            Handler::DelegateNamespace => Ok(()),
            Handler::CheckNamespaceExists => namespace::check_exists(kube, stage).await,
            Handler::PutNamespace => namespace::put_namespace(kube, stage).await,
            Handler::PutSpace => namespace::put_space(kube, stage).await,
            Handler::PutProject => namespace::put_project(kube, stage).await,
            Handler::ConfigureRbac => rbac::configure(kube, stage, config).await,
            Handler::PutImageStreams => image_stream::promote(kube, stage).await,
            Handler::PutCiJob => ci_job::put_ci_job(kube, stage).await,
        }
    }
}

impl fmt::Display for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Handler::DelegateNamespace => "delegate-namespace",
            Handler::CheckNamespaceExists => "check-namespace-exists",
            Handler::PutNamespace => "put-namespace",
            Handler::PutSpace => "put-space",
            Handler::PutProject => "put-project",
            Handler::ConfigureRbac => "configure-rbac",
            Handler::PutImageStreams => "put-image-streams",
            Handler::PutCiJob => "put-ci-job",
        };
        f.write_str(name)
    }
}

/// Steps the provisioning chain runs for `config`, in order
pub fn provisioning_steps(config: &PlatformConfig) -> Vec<Handler> {
    std::iter::successors(Some(Handler::FIRST), |h| h.next(config)).collect()
}

/// Bring every resource `stage` needs into existence
pub async fn provision(
    kube: &dyn StageKubeClient,
    stage: &Stage,
    config: &PlatformConfig,
) -> Result<(), Error> {
    for step in provisioning_steps(config) {
        debug!(stage = %stage.name_any(), step = %step, "running provisioning step");
        step.run(kube, stage, config).await?;
    }
    Ok(())
}

// =============================================================================
// Deprovisioning
// =============================================================================

/// A step of the deprovisioning chain
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeletionHandler {
    /// Retire the stage's environment from consumed image streams
    DeleteEnvironmentLabels,
    /// Routes to the namespace removal matching the platform
    DelegateNamespaceDeletion,
    /// Delete the target Namespace
    DeleteNamespace,
    /// Delete the target OpenShift project
    DeleteProject,
}

impl DeletionHandler {
    /// Step the chain starts at
    pub const FIRST: DeletionHandler = DeletionHandler::DeleteEnvironmentLabels;

    /// Step that follows this one, `None` at the end of the chain
    pub fn next(self, config: &PlatformConfig) -> Option<DeletionHandler> {
        match self {
            DeletionHandler::DeleteEnvironmentLabels => {
                Some(DeletionHandler::DelegateNamespaceDeletion)
            }
            DeletionHandler::DelegateNamespaceDeletion if !config.manage_namespace => None,
            DeletionHandler::DelegateNamespaceDeletion if config.is_kubernetes() => {
                Some(DeletionHandler::DeleteNamespace)
            }
            DeletionHandler::DelegateNamespaceDeletion => Some(DeletionHandler::DeleteProject),
            DeletionHandler::DeleteNamespace | DeletionHandler::DeleteProject => None,
        }
    }

    async fn run(self, kube: &dyn StageKubeClient, stage: &Stage) -> Result<(), Error> {
        match self {
            DeletionHandler::DeleteEnvironmentLabels => {
                environment_labels::delete_environment_labels(kube, stage).await
            }
            DeletionHandler::DelegateNamespaceDeletion => Ok(()),
            DeletionHandler::DeleteNamespace => {
                namespace_deletion::delete_namespace(kube, stage).await
            }
            DeletionHandler::DeleteProject => {
                namespace_deletion::delete_project(kube, stage).await
            }
        }
    }
}

impl fmt::Display for DeletionHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeletionHandler::DeleteEnvironmentLabels => "delete-environment-labels",
            DeletionHandler::DelegateNamespaceDeletion => "delegate-namespace-deletion",
            DeletionHandler::DeleteNamespace => "delete-namespace",
            DeletionHandler::DeleteProject => "delete-project",
        };
        f.write_str(name)
    }
}

/// Steps the deprovisioning chain runs for `config`, in order
pub fn deprovisioning_steps(config: &PlatformConfig) -> Vec<DeletionHandler> {
    std::iter::successors(Some(DeletionHandler::FIRST), |h| h.next(config)).collect()
}

/// Undo what provisioning did for `stage`
pub async fn deprovision(
    kube: &dyn StageKubeClient,
    stage: &Stage,
    config: &PlatformConfig,
) -> Result<(), Error> {
    for step in deprovisioning_steps(config) {
        debug!(stage = %stage.name_any(), step = %step, "running deprovisioning step");
        step.run(kube, stage).await?;
    }
    Ok(())
}
