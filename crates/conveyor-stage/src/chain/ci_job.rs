//! The stage's release job description

use std::collections::BTreeMap;

use kube::ResourceExt;
use tracing::{debug, info};

use conveyor_common::crd::{
    CDPipeline, JenkinsJob, JenkinsJobSpec, Job, Stage, LIBRARY_SOURCE_TYPE,
};
use conveyor_common::Error;

use crate::chain::image_stream::pipeline_of;
use crate::client::StageKubeClient;
use crate::quality_gates::serialize_quality_gates;

/// Parameters the job provisioner is invoked with
pub fn job_parameters(
    stage: &Stage,
    pipeline: &CDPipeline,
) -> Result<BTreeMap<String, String>, Error> {
    let mut params = BTreeMap::from([
        ("PIPELINE_NAME".to_string(), pipeline.name_any()),
        ("STAGE_NAME".to_string(), stage.spec.name.clone()),
        ("SOURCE_TYPE".to_string(), stage.spec.source.type_.clone()),
        (
            "DEPLOYMENT_TYPE".to_string(),
            pipeline.spec.deployment_type.clone(),
        ),
        ("TRIGGER_TYPE".to_string(), stage.spec.trigger_type.clone()),
    ]);
    if let Some(gates) = serialize_quality_gates(&stage.spec.quality_gates)? {
        params.insert("QG_STAGES".to_string(), gates);
    }
    if stage.spec.source.type_ == LIBRARY_SOURCE_TYPE {
        if let Some(library) = &stage.spec.source.library {
            params.insert("LIBRARY_NAME".to_string(), library.name.clone());
            params.insert("LIBRARY_BRANCH".to_string(), library.branch.clone());
        }
    }
    if let Some(provisioner) = stage.spec.job_provisioning.as_deref().filter(|p| !p.is_empty()) {
        params.insert("JOB_PROVISIONING".to_string(), provisioner.to_string());
    }
    Ok(params)
}

/// Desired JenkinsJob for `stage`
pub fn desired_job(stage: &Stage, pipeline: &CDPipeline) -> Result<JenkinsJob, Error> {
    let params = job_parameters(stage, pipeline)?;
    let job = Job::for_provisioner(stage.spec.job_provisioning.as_deref(), &params)?;
    let mut desired = JenkinsJob::new(
        &stage.name_any(),
        JenkinsJobSpec {
            owner_name: None,
            stage_name: stage.name_any(),
            jenkins_folder: format!("{}-cd-pipeline", pipeline.name_any()),
            job,
        },
    );
    desired.metadata.namespace = stage.namespace();
    Ok(desired)
}

/// Create the stage's JenkinsJob, or bring an existing one up to date
pub async fn put_ci_job(kube: &dyn StageKubeClient, stage: &Stage) -> Result<(), Error> {
    let namespace = stage.namespace().unwrap_or_default();
    let pipeline = pipeline_of(kube, stage).await?;
    let desired = desired_job(stage, &pipeline)?;
    let name = desired.name_any();

    match kube.get_jenkins_job(&namespace, &name).await? {
        None => {
            kube.create_jenkins_job(&namespace, &desired)
                .await
                .map_err(|e| Error::downstream("create", "JenkinsJob", &name, e))?;
            info!(job = %name, "created jenkins job");
        }
        Some(mut existing) if existing.spec != desired.spec => {
            existing.spec = desired.spec;
            kube.replace_jenkins_job(&namespace, &existing)
                .await
                .map_err(|e| Error::downstream("update", "JenkinsJob", &name, e))?;
            info!(job = %name, "updated jenkins job");
        }
        Some(_) => debug!(job = %name, "jenkins job up to date"),
    }
    Ok(())
}
