//! CDPipeline CRD types

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A continuous delivery pipeline grouping ordered stages
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "v2.edp.epam.com",
    version = "v1",
    kind = "CDPipeline",
    plural = "cdpipelines",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct CDPipelineSpec {
    /// Pipeline name, used as the prefix of environment labels
    pub name: String,

    /// Codebase image streams feeding the entry stage
    #[serde(default)]
    pub input_docker_streams: Vec<String>,

    /// Deployment type passed to stage jobs, e.g. "container"
    #[serde(default)]
    pub deployment_type: String,

    /// Applications promoted through the pipeline
    #[serde(default)]
    pub applications: Vec<String>,

    /// Applications whose image streams are promoted between stages
    #[serde(default)]
    pub applications_to_promote: Vec<String>,
}
