//! EDPComponent CRD types

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Name of the component describing the platform's docker registry
pub const DOCKER_REGISTRY_COMPONENT: &str = "docker-registry";

/// A platform component registered with its endpoint
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "v1.edp.epam.com",
    version = "v1",
    kind = "EDPComponent",
    plural = "edpcomponents",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct EDPComponentSpec {
    /// Component type, e.g. "registry"
    #[serde(rename = "type", default)]
    pub type_: String,

    /// Component endpoint; for the registry, the host images are pushed to
    pub url: String,

    /// Icon shown in the portal
    #[serde(default)]
    pub icon: String,

    /// Whether the component is listed in the portal
    #[serde(default)]
    pub visible: bool,
}
