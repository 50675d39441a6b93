//! Environment label cleanup on consumed image streams
//!
//! A stage's environment label `{pipeline}/{stage}` sits on every stream it
//! consumes. When the stage goes away the label is removed and the
//! environment is appended to the stream's last-deleted history, in one
//! write per stream so a retry never records it twice.

use kube::ResourceExt;
use tracing::{debug, info};

use conveyor_common::crd::{append_deleted_env, CodebaseImageStream, Stage};
use conveyor_common::{Error, LAST_DELETED_ENVS_ANNOTATION};

use crate::chain::image_stream::{consumed_streams, pipeline_of, ConsumedStream};
use crate::client::StageKubeClient;

/// Environment label key `stage` marks consumed streams with
pub fn environment_label(pipeline_spec_name: &str, stage: &Stage) -> String {
    format!("{pipeline_spec_name}/{}", stage.spec.name)
}

/// Remove `env` from the stream's labels and record it in the history.
///
/// Returns false when the stream already reflects the removal.
pub fn retire_environment(stream: &mut CodebaseImageStream, env: &str) -> bool {
    let removed = stream.labels_mut().remove(env).is_some();
    let annotations = stream.annotations_mut();
    let history = append_deleted_env(
        annotations.get(LAST_DELETED_ENVS_ANNOTATION).map(String::as_str),
        env,
    );
    let recorded = annotations.insert(LAST_DELETED_ENVS_ANNOTATION.to_string(), history.clone());
    removed || recorded.as_deref() != Some(history.as_str())
}

/// Retire the stage's environment from every stream it consumes
pub async fn delete_environment_labels(
    kube: &dyn StageKubeClient,
    stage: &Stage,
) -> Result<(), Error> {
    let namespace = stage.namespace().unwrap_or_default();
    let pipeline = pipeline_of(kube, stage).await?;
    let env = environment_label(&pipeline.spec.name, stage);

    for ConsumedStream { mut stream, .. } in consumed_streams(kube, stage, &pipeline).await? {
        let name = stream.name_any();
        if !retire_environment(&mut stream, &env) {
            debug!(stream = %name, env = %env, "environment already retired");
            continue;
        }
        kube.replace_image_stream(&namespace, &stream)
            .await
            .map_err(|e| Error::downstream("update", "CodebaseImageStream", &name, e))?;
        info!(stream = %name, env = %env, "removed environment label");
    }
    Ok(())
}
