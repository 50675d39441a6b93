//! Stage controller implementation
//!
//! Reconciles `Stage` resources: keeps the deletion finalizer and pipeline
//! ownership in place, runs the provisioning chain and reports its outcome in
//! the stage status. Deleted stages go through the deletion protocol.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::runtime::controller::Action;
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use conveyor_common::crd::{CDPipeline, Stage, StageStatus, CD_PIPELINE_KIND};
use conveyor_common::events::{EventPublisher, StageEvent};
use conveyor_common::{
    Error, KubeEventPublisher, PlatformConfig, CD_PIPELINE_LABEL, FIELD_MANAGER,
};

use crate::chain::{self, image_stream::pipeline_of};
use crate::client::{StageKubeClient, StageKubeClientImpl};
use crate::deletion::{self, DeletionState, DEPENDENT_BACKOFF};

/// Status action recorded after every provisioning attempt
pub const SETUP_ACTION: &str = "setup_initial_structure";

/// Requeue delay after a lost optimistic concurrency race
pub const CONFLICT_REQUEUE: Duration = Duration::from_secs(5);

/// Requeue delay after any other transient failure
pub const RETRY_REQUEUE: Duration = Duration::from_secs(30);

// =============================================================================
// Controller context
// =============================================================================

/// Controller context shared by every Stage reconciliation
pub struct StageContext {
    /// Kubernetes client for API operations
    pub kube: Arc<dyn StageKubeClient>,
    /// Event publisher for emitting Kubernetes Events
    pub events: Arc<dyn EventPublisher>,
    /// Platform the stages are provisioned on
    pub config: PlatformConfig,
}

impl StageContext {
    /// Create a new StageContext with the given dependencies
    pub fn new(
        kube: Arc<dyn StageKubeClient>,
        events: Arc<dyn EventPublisher>,
        config: PlatformConfig,
    ) -> Self {
        Self {
            kube,
            events,
            config,
        }
    }

    /// Create a StageContext backed by a real Kubernetes client
    pub fn from_client(client: Client, config: PlatformConfig) -> Self {
        let events = Arc::new(KubeEventPublisher::new(client.clone(), FIELD_MANAGER));
        Self::new(Arc::new(StageKubeClientImpl::new(client)), events, config)
    }

    /// Create a context for testing with a mock or in-memory client
    #[cfg(test)]
    pub fn for_testing(kube: Arc<dyn StageKubeClient>) -> Self {
        Self::new(
            kube,
            Arc::new(conveyor_common::NoopEventPublisher),
            PlatformConfig::new(conveyor_common::Platform::Kubernetes),
        )
    }
}

// =============================================================================
// Status
// =============================================================================

fn provisioned_status(previous: Option<&StageStatus>) -> StageStatus {
    StageStatus {
        available: true,
        last_time_updated: Some(Utc::now()),
        status: "created".to_string(),
        action: SETUP_ACTION.to_string(),
        result: "success".to_string(),
        detailed_message: None,
        value: "active".to_string(),
        ..previous.cloned().unwrap_or_default()
    }
}

fn failed_status(previous: Option<&StageStatus>, err: &Error) -> StageStatus {
    StageStatus {
        available: false,
        last_time_updated: Some(Utc::now()),
        status: "failed".to_string(),
        action: SETUP_ACTION.to_string(),
        result: "error".to_string(),
        detailed_message: Some(err.to_string()),
        value: "failed".to_string(),
        ..previous.cloned().unwrap_or_default()
    }
}

async fn write_status(
    ctx: &StageContext,
    stage: &Stage,
    status: &StageStatus,
) -> Result<(), Error> {
    ctx.kube
        .patch_stage_status(
            &stage.namespace().unwrap_or_default(),
            &stage.name_any(),
            status,
        )
        .await
}

// =============================================================================
// Ownership
// =============================================================================

fn pipeline_owner_reference(pipeline: &CDPipeline) -> OwnerReference {
    OwnerReference {
        api_version: CDPipeline::api_version(&()).to_string(),
        kind: CD_PIPELINE_KIND.to_string(),
        name: pipeline.name_any(),
        uid: pipeline.uid().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

fn is_owned_by(stage: &Stage, pipeline: &CDPipeline) -> bool {
    let owned = stage
        .owner_references()
        .iter()
        .any(|o| o.kind == CD_PIPELINE_KIND && o.name == pipeline.name_any());
    owned && stage.pipeline_label() == Some(pipeline.name_any().as_str())
}

/// Owner references of `stage` with `owner` set as its controller.
///
/// References to other owners are kept. A stale reference to a pipeline is
/// replaced. Another controller already owning the stage is an error, since
/// an object can only have one.
fn owner_references_with(
    stage: &Stage,
    owner: OwnerReference,
) -> Result<Vec<OwnerReference>, Error> {
    let mut refs: Vec<OwnerReference> = stage
        .owner_references()
        .iter()
        .filter(|o| o.kind != CD_PIPELINE_KIND)
        .cloned()
        .collect();
    if let Some(other) = refs.iter().find(|o| o.controller == Some(true)) {
        return Err(Error::configuration(
            format!(
                "Stage {}/{}",
                stage.namespace().unwrap_or_default(),
                stage.name_any()
            ),
            format!("already controlled by {} {}", other.kind, other.name),
        ));
    }
    refs.push(owner);
    Ok(refs)
}

/// Point the stage's owner reference and pipeline label at its pipeline
async fn ensure_ownership(ctx: &StageContext, stage: &Stage) -> Result<(), Error> {
    let pipeline = pipeline_of(ctx.kube.as_ref(), stage).await?;
    if is_owned_by(stage, &pipeline) {
        return Ok(());
    }

    let owners = owner_references_with(stage, pipeline_owner_reference(&pipeline))?;
    let labels = BTreeMap::from([(CD_PIPELINE_LABEL.to_string(), pipeline.name_any())]);
    ctx.kube
        .patch_stage_ownership(
            &stage.namespace().unwrap_or_default(),
            &stage.name_any(),
            owners,
            &labels,
        )
        .await?;
    debug!(pipeline = %pipeline.name_any(), "recorded pipeline ownership");
    Ok(())
}

async fn provision_stage(ctx: &StageContext, stage: &Stage) -> Result<(), Error> {
    ensure_ownership(ctx, stage).await?;
    chain::provision(ctx.kube.as_ref(), stage, &ctx.config).await
}

// =============================================================================
// Stage reconciliation
// =============================================================================

/// Reconcile a Stage resource
///
/// Called whenever a Stage is created, updated or deleted.
#[instrument(
    skip(stage, ctx),
    fields(stage = %stage.name_any(), namespace = %stage.namespace().unwrap_or_default())
)]
pub async fn reconcile(stage: Arc<Stage>, ctx: Arc<StageContext>) -> Result<Action, Error> {
    if stage.is_being_deleted() {
        return reconcile_deletion(&stage, &ctx).await;
    }
    info!("reconciling stage");

    deletion::ensure_finalizer(ctx.kube.as_ref(), &stage).await?;

    let outcome = provision_stage(&ctx, &stage).await;
    let previous = stage.status.as_ref();
    let object_ref = stage.object_ref(&());
    match outcome {
        Ok(()) => {
            write_status(&ctx, &stage, &provisioned_status(previous)).await?;
            ctx.events.publish(&object_ref, StageEvent::Provisioned).await;
            info!("stage provisioned");
            Ok(Action::await_change())
        }
        Err(e) => {
            warn!(error = %e, "stage provisioning failed");
            let status = failed_status(previous, &e);
            if let Err(status_err) = write_status(&ctx, &stage, &status).await {
                error!(error = %status_err, "failed to record provisioning failure in status");
            }
            ctx.events
                .publish(&object_ref, StageEvent::ProvisioningFailed(e.to_string()))
                .await;
            Err(e)
        }
    }
}

async fn reconcile_deletion(stage: &Stage, ctx: &StageContext) -> Result<Action, Error> {
    let object_ref = stage.object_ref(&());
    let state = match deletion::advance(ctx.kube.as_ref(), stage, &ctx.config).await {
        Ok(state) => state,
        Err(e) => {
            ctx.events
                .publish(&object_ref, StageEvent::CleanupFailed(e.to_string()))
                .await;
            return Err(e);
        }
    };

    match state {
        DeletionState::PendingDependents => {
            ctx.events.publish(&object_ref, StageEvent::DeletionDeferred).await;
            Ok(Action::requeue(DEPENDENT_BACKOFF))
        }
        DeletionState::Finalizing => {
            ctx.events.publish(&object_ref, StageEvent::Finalized).await;
            Ok(Action::await_change())
        }
        DeletionState::Active | DeletionState::Gone => Ok(Action::await_change()),
    }
}

/// Error policy for the stage controller
///
/// Conflicts retry quickly, other transient errors back off, and permanent
/// errors wait for the stage or its dependencies to change.
pub fn error_policy(stage: Arc<Stage>, error: &Error, _ctx: Arc<StageContext>) -> Action {
    error!(
        ?error,
        stage = %stage.name_any(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );

    if error.is_conflict() {
        Action::requeue(CONFLICT_REQUEUE)
    } else if error.is_retryable() {
        Action::requeue(RETRY_REQUEUE)
    } else {
        Action::await_change()
    }
}
