//! CodebaseImageStream CRD types
//!
//! An image stream tracks the tags built or promoted for one codebase. Stages
//! mark the streams they consume with an environment label and leave a
//! history annotation behind when they stop consuming them.

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::LAST_DELETED_ENVS_ANNOTATION;

/// A container image tag and when it was produced
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    /// Tag name
    pub name: String,

    /// Creation time as reported by the registry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
}

/// Image stream of a single codebase
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "v2.edp.epam.com",
    version = "v1",
    kind = "CodebaseImageStream",
    plural = "codebaseimagestreams",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct CodebaseImageStreamSpec {
    /// Codebase this stream belongs to
    pub codebase: String,

    /// Fully qualified image name without tag
    #[serde(default)]
    pub image_name: String,

    /// Known tags
    #[serde(default)]
    pub tags: Vec<Tag>,
}

impl CodebaseImageStream {
    /// Environments recorded as having stopped consuming this stream
    pub fn last_deleted_envs(&self) -> Vec<&str> {
        self.annotations()
            .get(LAST_DELETED_ENVS_ANNOTATION)
            .map(|value| value.split(',').filter(|env| !env.is_empty()).collect())
            .unwrap_or_default()
    }
}

/// Append `env` to a comma separated history value.
///
/// Entries already present are not repeated and existing order is kept.
pub fn append_deleted_env(current: Option<&str>, env: &str) -> String {
    let mut envs: Vec<&str> = current
        .unwrap_or_default()
        .split(',')
        .filter(|e| !e.is_empty())
        .collect();
    if !envs.contains(&env) {
        envs.push(env);
    }
    envs.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_deletion_starts_history() {
        assert_eq!(append_deleted_env(None, "mobile/qa"), "mobile/qa");
        assert_eq!(append_deleted_env(Some(""), "mobile/qa"), "mobile/qa");
    }

    #[test]
    fn history_appends_without_duplicates() {
        let value = append_deleted_env(Some("mobile/dev"), "mobile/qa");
        assert_eq!(value, "mobile/dev,mobile/qa");
        assert_eq!(append_deleted_env(Some(&value), "mobile/dev"), value);
    }

    #[test]
    fn reads_history_from_annotation() {
        let mut stream = CodebaseImageStream::new(
            "app-main",
            CodebaseImageStreamSpec {
                codebase: "app".to_string(),
                ..Default::default()
            },
        );
        assert!(stream.last_deleted_envs().is_empty());

        stream.annotations_mut().insert(
            LAST_DELETED_ENVS_ANNOTATION.to_string(),
            "mobile/dev,mobile/qa".to_string(),
        );
        assert_eq!(stream.last_deleted_envs(), vec!["mobile/dev", "mobile/qa"]);
    }
}
