//! Kubernetes Events for Stage lifecycle changes
//!
//! Every reconcile outcome worth showing in `kubectl describe stage` is a
//! [`StageEvent`]. Publishing never fails the reconcile: a rejected Event is
//! logged and dropped.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Event reason strings, as they appear in the `REASON` column
pub mod reasons {
    /// Provisioning chain completed
    pub const PROVISIONED: &str = "Provisioned";
    /// Provisioning chain aborted on an error
    pub const PROVISIONING_FAILED: &str = "ProvisioningFailed";
    /// Deletion waits for stages further down the pipeline
    pub const DELETION_DEFERRED: &str = "DeletionDeferred";
    /// Cleanup done, finalizer removed
    pub const FINALIZED: &str = "Finalized";
    /// Cleanup failed, finalizer kept
    pub const CLEANUP_FAILED: &str = "CleanupFailed";
}

/// Event action strings
pub mod actions {
    /// Running the provisioning chain
    pub const PROVISION: &str = "Provision";
    /// Running the deletion protocol
    pub const DELETE: &str = "Delete";
}

/// Something that happened to a Stage
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StageEvent {
    /// Every provisioning step succeeded
    Provisioned,
    /// A provisioning step failed with the given error
    ProvisioningFailed(String),
    /// Deletion is waiting for later stages of the pipeline
    DeletionDeferred,
    /// Cleanup ran and the finalizer was released
    Finalized,
    /// Cleanup failed with the given error; the finalizer stays
    CleanupFailed(String),
}

impl StageEvent {
    /// Reason recorded on the Event
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Provisioned => reasons::PROVISIONED,
            Self::ProvisioningFailed(_) => reasons::PROVISIONING_FAILED,
            Self::DeletionDeferred => reasons::DELETION_DEFERRED,
            Self::Finalized => reasons::FINALIZED,
            Self::CleanupFailed(_) => reasons::CLEANUP_FAILED,
        }
    }

    /// Action recorded on the Event
    pub fn action(&self) -> &'static str {
        match self {
            Self::Provisioned | Self::ProvisioningFailed(_) => actions::PROVISION,
            Self::DeletionDeferred | Self::Finalized | Self::CleanupFailed(_) => actions::DELETE,
        }
    }

    /// Failures are warnings, everything else is normal
    pub fn event_type(&self) -> EventType {
        match self {
            Self::ProvisioningFailed(_) | Self::CleanupFailed(_) => EventType::Warning,
            _ => EventType::Normal,
        }
    }

    /// Human readable note
    pub fn note(&self) -> Option<String> {
        match self {
            Self::ProvisioningFailed(msg) | Self::CleanupFailed(msg) => Some(msg.clone()),
            Self::DeletionDeferred => {
                Some("waiting for later stages of the pipeline to be deleted".to_string())
            }
            Self::Provisioned | Self::Finalized => None,
        }
    }
}

/// Sink for Stage events
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Record `event` against the Stage behind `stage_ref`
    async fn publish(&self, stage_ref: &ObjectReference, event: StageEvent);
}

/// Publishes through `kube::runtime::events::Recorder`
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Reporter instance is taken from `POD_NAME` when the downward API sets it
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(&self, stage_ref: &ObjectReference, event: StageEvent) {
        let record = Event {
            type_: event.event_type(),
            reason: event.reason().to_string(),
            note: event.note(),
            action: event.action().to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&record, stage_ref).await {
            warn!(
                reason = event.reason(),
                stage = ?stage_ref.name,
                error = %e,
                "dropping stage event"
            );
        }
    }
}

/// Discards every event
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(&self, _stage_ref: &ObjectReference, _event: StageEvent) {}
}
