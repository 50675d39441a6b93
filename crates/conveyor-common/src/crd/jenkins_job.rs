//! JenkinsJob CRD types
//!
//! The stage's release job. The operator only writes it; a separate Jenkins
//! operator turns it into a real job.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Provisioner used when a stage names none
pub const DEFAULT_JOB_PROVISIONER: &str = "default";

/// Reference to the provisioner job and the parameters it is run with
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Path of the provisioner job in Jenkins
    pub name: String,

    /// Provisioner parameters, serialized as a JSON object
    pub config: String,
}

/// A Jenkins job managed on behalf of a stage
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "v2.edp.epam.com",
    version = "v1",
    kind = "JenkinsJob",
    plural = "jenkinsjobs",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct JenkinsJobSpec {
    /// Jenkins instance owning the job
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_name: Option<String>,

    /// Stage metadata name the job releases
    pub stage_name: String,

    /// Folder the job is created in
    pub jenkins_folder: String,

    /// Provisioner invocation
    pub job: Job,
}

impl Job {
    /// Build a job reference for `provisioner` with the given parameters
    pub fn for_provisioner(
        provisioner: Option<&str>,
        params: &BTreeMap<String, String>,
    ) -> Result<Self, serde_json::Error> {
        let provisioner = provisioner
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_JOB_PROVISIONER);
        Ok(Self {
            name: format!("job-provisions/job/cd/job/{provisioner}"),
            config: serde_json::to_string(params)?,
        })
    }
}
