//! Custom Resource Definitions for Conveyor
//!
//! `Stage` is the only kind the operator reconciles. The others are read or
//! written on a stage's behalf and are owned by neighbouring controllers.

mod cd_pipeline;
mod codebase_image_stream;
mod edp_component;
mod jenkins_job;
mod stage;

pub use cd_pipeline::{CDPipeline, CDPipelineSpec};
pub use codebase_image_stream::{
    append_deleted_env, CodebaseImageStream, CodebaseImageStreamSpec, Tag,
};
pub use edp_component::{EDPComponent, EDPComponentSpec, DOCKER_REGISTRY_COMPONENT};
pub use jenkins_job::{Job, JenkinsJob, JenkinsJobSpec, DEFAULT_JOB_PROVISIONER};
pub use stage::{
    Library, QualityGate, Source, Stage, StageSpec, StageStatus, CD_PIPELINE_KIND,
    LIBRARY_SOURCE_TYPE,
};

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::CustomResourceExt;

use crate::kube_utils::HasApiResource;

// =============================================================================
// Platform tenancy kinds without typed bindings
// =============================================================================

/// Kiosk space, the tenant-facing wrapper around a namespace
pub struct Space;

impl HasApiResource for Space {
    const API_VERSION: &'static str = "tenancy.kiosk.sh/v1alpha1";
    const KIND: &'static str = "Space";
}

/// OpenShift project request, the only way a tenant may create a project
pub struct ProjectRequest;

impl HasApiResource for ProjectRequest {
    const API_VERSION: &'static str = "project.openshift.io/v1";
    const KIND: &'static str = "ProjectRequest";
}

/// OpenShift project, deleted when a stage is finalized
pub struct Project;

impl HasApiResource for Project {
    const API_VERSION: &'static str = "project.openshift.io/v1";
    const KIND: &'static str = "Project";
}

/// Every CRD this operator reads or writes, in install order
pub fn all_crds() -> Vec<CustomResourceDefinition> {
    vec![
        EDPComponent::crd(),
        CDPipeline::crd(),
        CodebaseImageStream::crd(),
        JenkinsJob::crd(),
        Stage::crd(),
    ]
}
