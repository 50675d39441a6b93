//! Sibling ordering within a pipeline
//!
//! Siblings are the Stages in the same namespace that belong to the same
//! pipeline. Both lookups scan the sibling list once.

use kube::ResourceExt;

use conveyor_common::crd::Stage;
use conveyor_common::Error;

use crate::client::StageKubeClient;

/// Stages in `stage`'s namespace that belong to `pipeline`, `stage` included
pub async fn siblings(
    kube: &dyn StageKubeClient,
    stage: &Stage,
    pipeline: &str,
) -> Result<Vec<Stage>, Error> {
    let namespace = stage.namespace().unwrap_or_default();
    let stages = kube.list_stages(&namespace).await?;
    Ok(stages
        .into_iter()
        .filter(|s| s.pipeline_name() == pipeline)
        .collect())
}

/// The sibling with the greatest order strictly below `order`
pub fn previous_of(siblings: &[Stage], order: i32) -> Option<&Stage> {
    siblings
        .iter()
        .filter(|s| s.spec.order < order)
        .max_by_key(|s| s.spec.order)
}

/// True when another sibling has an order at or above `stage`'s.
///
/// A sibling sharing `stage`'s order that is itself being deleted does not
/// count, otherwise two such stages would wait on each other forever.
pub fn has_dependents(siblings: &[Stage], stage: &Stage) -> bool {
    let name = stage.name_any();
    let order = stage.spec.order;
    siblings.iter().any(|s| {
        s.name_any() != name
            && (s.spec.order > order || (s.spec.order == order && !s.is_being_deleted()))
    })
}

/// Resolve the Stage immediately before `stage` in `pipeline`.
///
/// Fails with `NotFound` when nothing precedes it, which for a non-entry
/// stage means the pipeline is missing a step.
pub async fn previous_stage(
    kube: &dyn StageKubeClient,
    stage: &Stage,
    pipeline: &str,
) -> Result<Stage, Error> {
    let siblings = siblings(kube, stage, pipeline).await?;
    previous_of(&siblings, stage.spec.order)
        .cloned()
        .ok_or_else(|| {
            Error::not_found(
                "Stage",
                stage.namespace().unwrap_or_default(),
                format!("{pipeline} order<{}", stage.spec.order),
            )
        })
}
