//! Target namespace provisioning
//!
//! Each variant creates the platform's flavour of namespace for the stage.
//! An object that already exists counts as provisioned.

use kube::ResourceExt;
use tracing::{debug, info};

use conveyor_common::crd::Stage;
use conveyor_common::Error;

use crate::client::StageKubeClient;

fn tolerate_existing(result: Result<(), Error>, kind: &str, name: &str) -> Result<(), Error> {
    match result {
        Ok(()) => {
            info!(kind, name, "created target namespace");
            Ok(())
        }
        Err(e) if e.is_already_exists() => {
            debug!(kind, name, "target namespace already exists");
            Ok(())
        }
        Err(e) => Err(Error::downstream("create", kind, name, e)),
    }
}

/// Fail unless the target namespace was created out of band
pub async fn check_exists(kube: &dyn StageKubeClient, stage: &Stage) -> Result<(), Error> {
    let target = stage.target_namespace();
    if kube.namespace_exists(&target).await? {
        debug!(namespace = %target, "target namespace present");
        return Ok(());
    }
    Err(Error::not_found("Namespace", "", target))
}

/// Create the target Namespace
pub async fn put_namespace(kube: &dyn StageKubeClient, stage: &Stage) -> Result<(), Error> {
    let target = stage.target_namespace();
    tolerate_existing(kube.create_namespace(&target).await, "Namespace", &target)
}

/// Create a kiosk Space for the target, accounted to the stage's namespace
pub async fn put_space(kube: &dyn StageKubeClient, stage: &Stage) -> Result<(), Error> {
    let target = stage.target_namespace();
    let account = stage.namespace().unwrap_or_default();
    tolerate_existing(kube.create_space(&target, &account).await, "Space", &target)
}

/// Request an OpenShift project for the target
pub async fn put_project(kube: &dyn StageKubeClient, stage: &Stage) -> Result<(), Error> {
    let target = stage.target_namespace();
    tolerate_existing(
        kube.create_project(&target, &stage.spec.description).await,
        "Project",
        &target,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockStageKubeClient;
    use crate::testing::{stage, FakeCluster};

    #[tokio::test]
    async fn namespace_creation_is_idempotent() {
        let cluster = FakeCluster::new();
        let dev = stage("edp", "mobile", "dev", 0);

        put_namespace(&cluster, &dev).await.expect("first create");
        put_namespace(&cluster, &dev).await.expect("second create is a no-op");
        assert!(cluster.has_namespace("edp-dev"));
    }

    #[tokio::test]
    async fn space_is_accounted_to_the_source_namespace() {
        let cluster = FakeCluster::new();
        let dev = stage("edp", "mobile", "dev", 0);

        put_space(&cluster, &dev).await.expect("space created");
        put_space(&cluster, &dev).await.expect("existing space tolerated");
        assert_eq!(cluster.space_account("edp-dev").as_deref(), Some("edp"));
    }

    #[tokio::test]
    async fn project_request_is_idempotent() {
        let cluster = FakeCluster::new();
        let dev = stage("edp", "mobile", "dev", 0);

        put_project(&cluster, &dev).await.expect("project requested");
        put_project(&cluster, &dev).await.expect("existing project tolerated");
        assert!(cluster.has_project("edp-dev"));
    }

    #[tokio::test]
    async fn unmanaged_namespace_must_exist() {
        let cluster = FakeCluster::new();
        let dev = stage("edp", "mobile", "dev", 0);

        let err = check_exists(&cluster, &dev).await.expect_err("namespace missing");
        assert!(err.is_not_found());

        cluster.insert_namespace("edp-dev");
        check_exists(&cluster, &dev).await.expect("namespace present");
    }

    #[tokio::test]
    async fn other_create_failures_are_fatal() {
        let mut mock = MockStageKubeClient::new();
        mock.expect_create_namespace().returning(|_| {
            Err(Error::configuration("Namespace edp-dev", "admission webhook denied"))
        });

        let err = put_namespace(&mock, &stage("edp", "mobile", "dev", 0))
            .await
            .expect_err("denied create must fail");
        assert!(err.to_string().starts_with("failed to create Namespace edp-dev"));
        assert!(!err.is_retryable());
    }
}
