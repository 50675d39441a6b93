//! Stage deletion
//!
//! A stage holds the `envLabelDeletion` finalizer for its whole life. Once
//! deletion is requested it waits until no sibling at or after its position
//! in the pipeline is left, then deprovisions and releases the finalizer.
//!
//! ```text
//! Active ──delete──▶ PendingDependents ──siblings gone──▶ Finalizing ──▶ Gone
//!    └──────────────delete, no dependents───────────────────┘
//! ```

use std::fmt;
use std::time::Duration;

use kube::ResourceExt;
use tracing::{info, warn};

use conveyor_common::crd::Stage;
use conveyor_common::kube_utils::{with_finalizer, without_finalizer};
use conveyor_common::{Error, PlatformConfig, STAGE_FINALIZER};

use crate::chain;
use crate::client::StageKubeClient;
use crate::ordering;

/// How long a stage with remaining dependents waits before checking again
pub const DEPENDENT_BACKOFF: Duration = Duration::from_secs(10);

/// Where a stage is in its deletion lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeletionState {
    /// Not being deleted
    Active,
    /// Deletion requested, later siblings still exist
    PendingDependents,
    /// Deletion requested and unblocked, cleanup in progress
    Finalizing,
    /// Finalizer released
    Gone,
}

impl fmt::Display for DeletionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "Active"),
            Self::PendingDependents => write!(f, "PendingDependents"),
            Self::Finalizing => write!(f, "Finalizing"),
            Self::Gone => write!(f, "Gone"),
        }
    }
}

/// Classify `stage` given the current members of its pipeline
pub fn deletion_state(stage: &Stage, siblings: &[Stage]) -> DeletionState {
    if !stage.is_being_deleted() {
        DeletionState::Active
    } else if !stage.has_finalizer() {
        DeletionState::Gone
    } else if ordering::has_dependents(siblings, stage) {
        DeletionState::PendingDependents
    } else {
        DeletionState::Finalizing
    }
}

/// Add the deletion finalizer if missing. Returns true when a write was made.
pub async fn ensure_finalizer(kube: &dyn StageKubeClient, stage: &Stage) -> Result<bool, Error> {
    let Some(finalizers) = with_finalizer(stage.metadata.finalizers.as_deref(), STAGE_FINALIZER)
    else {
        return Ok(false);
    };
    kube.patch_stage_finalizers(
        &stage.namespace().unwrap_or_default(),
        &stage.name_any(),
        stage.resource_version(),
        finalizers,
    )
    .await?;
    info!(stage = %stage.name_any(), "added deletion finalizer");
    Ok(true)
}

async fn release_finalizer(kube: &dyn StageKubeClient, stage: &Stage) -> Result<(), Error> {
    let Some(finalizers) = without_finalizer(stage.metadata.finalizers.as_deref(), STAGE_FINALIZER)
    else {
        return Ok(());
    };
    kube.patch_stage_finalizers(
        &stage.namespace().unwrap_or_default(),
        &stage.name_any(),
        stage.resource_version(),
        finalizers,
    )
    .await
}

/// Advance the deletion of a stage whose deletion timestamp is set.
///
/// Returns the state the stage was found in. `PendingDependents` means the
/// caller should check again after [`DEPENDENT_BACKOFF`]; on `Finalizing` the
/// cleanup ran and the finalizer was released.
pub async fn advance(
    kube: &dyn StageKubeClient,
    stage: &Stage,
    config: &PlatformConfig,
) -> Result<DeletionState, Error> {
    let name = stage.name_any();
    let siblings = ordering::siblings(kube, stage, stage.pipeline_name()).await?;
    let state = deletion_state(stage, &siblings);

    match state {
        DeletionState::Active | DeletionState::Gone => {}
        DeletionState::PendingDependents => {
            info!(stage = %name, order = stage.spec.order, "deletion waits for later stages");
        }
        DeletionState::Finalizing => {
            if let Err(e) = chain::deprovision(kube, stage, config).await {
                warn!(stage = %name, error = %e, "stage cleanup failed, keeping finalizer");
                return Err(e);
            }
            release_finalizer(kube, stage).await?;
            info!(stage = %name, "stage finalized");
        }
    }
    Ok(state)
}
