//! Stage CRD types
//!
//! A `Stage` is one step in a CD pipeline's promotion sequence. Stages of a
//! pipeline are ordered by `spec.order`; order 0 is the entry stage fed
//! directly from the pipeline's input image streams.

use chrono::{DateTime, Utc};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{CD_PIPELINE_LABEL, STAGE_FINALIZER};

/// Kind name of the owning pipeline as it appears in owner references
pub const CD_PIPELINE_KIND: &str = "CDPipeline";

// =============================================================================
// Quality gates
// =============================================================================

/// A single quality check an artifact must pass in this stage
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QualityGate {
    /// Type of gate, e.g. "manual" or "autotests"
    pub quality_gate_type: String,

    /// Pipeline step name for this gate
    pub step_name: String,

    /// Autotest codebase to run for an "autotests" gate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autotest_name: Option<String>,

    /// Branch of the autotest codebase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,
}

impl QualityGate {
    /// Create a gate with just a type and step name
    pub fn new(quality_gate_type: impl Into<String>, step_name: impl Into<String>) -> Self {
        Self {
            quality_gate_type: quality_gate_type.into(),
            step_name: step_name.into(),
            autotest_name: None,
            branch_name: None,
        }
    }
}

// =============================================================================
// Pipeline library source
// =============================================================================

/// Pipeline library the stage's release job runs from
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    /// "default" for the built-in library, "library" for a named one
    #[serde(rename = "type", default = "default_source_type")]
    pub type_: String,

    /// Named library, set when `type` is "library"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library: Option<Library>,
}

impl Default for Source {
    fn default() -> Self {
        Self {
            type_: default_source_type(),
            library: None,
        }
    }
}

/// Source type value for a named library
pub const LIBRARY_SOURCE_TYPE: &str = "library";

fn default_source_type() -> String {
    "default".to_string()
}

/// A named pipeline library at a branch
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Library {
    /// Library codebase name
    #[serde(default)]
    pub name: String,

    /// Branch to load the library from
    #[serde(default)]
    pub branch: String,
}

// =============================================================================
// CRD
// =============================================================================

/// One step of a CD pipeline's promotion sequence
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "v2.edp.epam.com",
    version = "v1",
    kind = "Stage",
    plural = "stages",
    namespaced,
    status = "StageStatus",
    printcolumn = r#"{"name":"Pipeline","type":"string","jsonPath":".spec.cdPipeline"}"#,
    printcolumn = r#"{"name":"Order","type":"integer","jsonPath":".spec.order"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct StageSpec {
    /// Stage name, used in derived image stream names and environment labels
    pub name: String,

    /// Name of the CD pipeline this stage belongs to
    pub cd_pipeline: String,

    /// Free-form description
    #[serde(default)]
    pub description: String,

    /// Promotion trigger, e.g. "Auto" or "Manual"
    #[serde(default)]
    pub trigger_type: String,

    /// Position in the pipeline; 0 is the entry stage
    #[serde(default)]
    pub order: i32,

    /// Quality gates, in execution order
    #[serde(default)]
    pub quality_gates: Vec<QualityGate>,

    /// Pipeline library running the release
    #[serde(default)]
    pub source: Source,

    /// Job provisioner used to create the stage's CI job
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_provisioning: Option<String>,
}

/// Observed state of a Stage
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct StageStatus {
    /// Whether the stage is fully provisioned
    #[serde(default)]
    pub available: bool,

    /// When the status was last written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_time_updated: Option<DateTime<Utc>>,

    /// Coarse status, e.g. "created" or "failed"
    #[serde(default)]
    pub status: String,

    /// User who made the last change
    #[serde(default)]
    pub username: String,

    /// Last action performed
    #[serde(default)]
    pub action: String,

    /// Outcome of the last action: "success" or "error"
    #[serde(default)]
    pub result: String,

    /// Detail for the last result, the error message on failure.
    ///
    /// Serialized as `null` when empty so a status merge patch clears an
    /// earlier failure message.
    #[serde(default)]
    pub detailed_message: Option<String>,

    /// Current state value, e.g. "active"
    #[serde(default)]
    pub value: String,

    /// Whether a status update still has to be handled
    #[serde(default, rename = "shouldBeHandled")]
    pub should_be_handled: bool,
}

impl Stage {
    /// True for the pipeline's entry stage
    pub fn is_first(&self) -> bool {
        self.spec.order == 0
    }

    /// Namespace the stage is provisioned into: `{namespace}-{name}`
    pub fn target_namespace(&self) -> String {
        format!(
            "{}-{}",
            self.namespace().unwrap_or_default(),
            self.name_any()
        )
    }

    /// Name of the owning pipeline.
    ///
    /// Prefers the `CDPipeline` owner reference and falls back to `spec.cdPipeline`.
    pub fn pipeline_name(&self) -> &str {
        self.metadata
            .owner_references
            .as_deref()
            .unwrap_or_default()
            .iter()
            .find(|owner| owner.kind == CD_PIPELINE_KIND)
            .map(|owner| owner.name.as_str())
            .unwrap_or(self.spec.cd_pipeline.as_str())
    }

    /// True once the deletion finalizer is present
    pub fn has_finalizer(&self) -> bool {
        self.finalizers().iter().any(|f| f == STAGE_FINALIZER)
    }

    /// True once deletion has been requested
    pub fn is_being_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Pipeline name recorded in the stage's pipeline label, if any
    pub fn pipeline_label(&self) -> Option<&str> {
        self.labels().get(CD_PIPELINE_LABEL).map(String::as_str)
    }
}
