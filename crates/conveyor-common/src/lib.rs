//! Common types for Conveyor: CRDs, errors, platform configuration and telemetry

#![deny(missing_docs)]

pub mod config;
pub mod crd;
pub mod error;
pub mod events;
pub mod kube_utils;
pub mod telemetry;

pub use config::{Platform, PlatformConfig};
pub use error::Error;
pub use events::{EventPublisher, KubeEventPublisher, NoopEventPublisher, StageEvent};

/// Label on a Stage naming the CD pipeline it belongs to
pub const CD_PIPELINE_LABEL: &str = "app.edp.epam.com/cdPipelineName";

/// Annotation on a codebase image stream listing environments that stopped consuming it
pub const LAST_DELETED_ENVS_ANNOTATION: &str = "deploy.edp.epam.com/last-deleted-envs";

/// Finalizer holding a Stage until its environment labels are cleaned up
pub const STAGE_FINALIZER: &str = "envLabelDeletion";

/// Field manager used for every server-side patch issued by the operator
pub const FIELD_MANAGER: &str = "conveyor-stage-controller";
