//! Platform configuration
//!
//! Read once at startup and passed by value into every entry point. Nothing in
//! the provisioning chain consults the process environment on its own.

use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Environment variable selecting the platform family
pub const PLATFORM_TYPE_ENV: &str = "PLATFORM_TYPE";

/// Environment variable toggling namespace management
pub const MANAGE_NAMESPACE_ENV: &str = "MANAGE_NAMESPACE";

/// Environment variable toggling kiosk space mode on kubernetes
pub const KIOSK_ENABLED_ENV: &str = "KIOSK_ENABLED";

/// Target platform family
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Platform {
    /// Plain Kubernetes: namespaces, optionally kiosk spaces
    Kubernetes,
    /// OpenShift: projects
    #[default]
    Openshift,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kubernetes => write!(f, "kubernetes"),
            Self::Openshift => write!(f, "openshift"),
        }
    }
}

impl FromStr for Platform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kubernetes" => Ok(Self::Kubernetes),
            "openshift" => Ok(Self::Openshift),
            other => Err(Error::configuration(
                PLATFORM_TYPE_ENV,
                format!("unsupported platform type '{other}'"),
            )),
        }
    }
}

/// Immutable platform configuration for one operator process
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlatformConfig {
    /// Platform family the stages are provisioned on
    pub platform: Platform,
    /// Whether the operator creates and deletes stage namespaces
    pub manage_namespace: bool,
    /// Whether stage namespaces are requested as kiosk spaces (kubernetes only)
    pub space_mode: bool,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            platform: Platform::default(),
            manage_namespace: true,
            space_mode: false,
        }
    }
}

impl PlatformConfig {
    /// Build a config for the given platform with default flags
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            ..Default::default()
        }
    }

    /// True when stages land on plain Kubernetes
    pub fn is_kubernetes(&self) -> bool {
        self.platform == Platform::Kubernetes
    }
}
