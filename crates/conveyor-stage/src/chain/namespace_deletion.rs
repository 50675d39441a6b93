//! Target namespace removal on stage deletion
//!
//! Deleting something that is already gone counts as done.

use tracing::{debug, info};

use conveyor_common::crd::Stage;
use conveyor_common::Error;

use crate::client::StageKubeClient;

fn tolerate_missing(result: Result<(), Error>, kind: &str, name: &str) -> Result<(), Error> {
    match result {
        Ok(()) => {
            info!(kind, name, "deleted target namespace");
            Ok(())
        }
        Err(e) if e.is_not_found() => {
            debug!(kind, name, "target namespace already gone");
            Ok(())
        }
        Err(e) => Err(Error::downstream("delete", kind, name, e)),
    }
}

/// Delete the stage's target Namespace
pub async fn delete_namespace(kube: &dyn StageKubeClient, stage: &Stage) -> Result<(), Error> {
    let target = stage.target_namespace();
    tolerate_missing(kube.delete_namespace(&target).await, "Namespace", &target)
}

/// Delete the stage's OpenShift project
pub async fn delete_project(kube: &dyn StageKubeClient, stage: &Stage) -> Result<(), Error> {
    let target = stage.target_namespace();
    tolerate_missing(kube.delete_project(&target).await, "Project", &target)
}
