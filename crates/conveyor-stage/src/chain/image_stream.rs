//! Verified image streams
//!
//! Every stage publishes one `{pipeline}-{stage}-{codebase}-verified` stream
//! per pipeline input. The entry stage consumes the input streams directly;
//! later stages consume the verified streams of the stage before them.

use kube::ResourceExt;
use tracing::{debug, info};

use conveyor_common::crd::{
    CDPipeline, CodebaseImageStream, CodebaseImageStreamSpec, Stage, DOCKER_REGISTRY_COMPONENT,
};
use conveyor_common::Error;

use crate::client::StageKubeClient;
use crate::ordering;

/// Name of the stream `stage` publishes for `codebase`
pub fn verified_stream_name(pipeline: &str, stage: &str, codebase: &str) -> String {
    format!("{pipeline}-{stage}-{codebase}-verified")
}

/// Load the stage's pipeline, resolved from its owner reference or spec
pub async fn pipeline_of(kube: &dyn StageKubeClient, stage: &Stage) -> Result<CDPipeline, Error> {
    let namespace = stage.namespace().unwrap_or_default();
    let name = stage.pipeline_name();
    kube.get_pipeline(&namespace, name)
        .await?
        .ok_or_else(|| Error::not_found("CDPipeline", &namespace, name))
}

fn input_streams(pipeline: &CDPipeline) -> Result<&[String], Error> {
    if pipeline.spec.input_docker_streams.is_empty() {
        return Err(Error::configuration(
            format!(
                "CDPipeline {}/{}",
                pipeline.namespace().unwrap_or_default(),
                pipeline.name_any()
            ),
            "pipeline has no input docker streams",
        ));
    }
    Ok(&pipeline.spec.input_docker_streams)
}

async fn get_stream(
    kube: &dyn StageKubeClient,
    namespace: &str,
    name: &str,
) -> Result<CodebaseImageStream, Error> {
    kube.get_image_stream(namespace, name)
        .await?
        .ok_or_else(|| {
            Error::downstream(
                "get",
                "CodebaseImageStream",
                name,
                Error::not_found("CodebaseImageStream", namespace, name),
            )
        })
}

/// A pipeline input paired with the stream the stage reads it from
pub struct ConsumedStream {
    /// Codebase of the input
    pub codebase: String,
    /// The input stream itself for the entry stage, otherwise the previous
    /// stage's verified stream
    pub stream: CodebaseImageStream,
}

/// Resolve, for every pipeline input, the stream `stage` consumes.
///
/// A missing input stream, missing previous stage or missing previous
/// verified stream is an error.
pub async fn consumed_streams(
    kube: &dyn StageKubeClient,
    stage: &Stage,
    pipeline: &CDPipeline,
) -> Result<Vec<ConsumedStream>, Error> {
    let namespace = stage.namespace().unwrap_or_default();
    let inputs = input_streams(pipeline)?;
    let pipeline_name = pipeline.name_any();

    let previous = if stage.is_first() {
        None
    } else {
        Some(ordering::previous_stage(kube, stage, &pipeline_name).await?)
    };

    let mut consumed = Vec::with_capacity(inputs.len());
    for input in inputs {
        let source = get_stream(kube, &namespace, input).await?;
        let codebase = source.spec.codebase.clone();
        let stream = match &previous {
            None => source,
            Some(prev) => {
                let name = verified_stream_name(&pipeline_name, &prev.spec.name, &codebase);
                get_stream(kube, &namespace, &name).await?
            }
        };
        consumed.push(ConsumedStream { codebase, stream });
    }
    Ok(consumed)
}

async fn registry_url(kube: &dyn StageKubeClient, namespace: &str) -> Result<String, Error> {
    let component = kube
        .get_component(namespace, DOCKER_REGISTRY_COMPONENT)
        .await?
        .ok_or_else(|| {
            Error::downstream(
                "get",
                "EDPComponent",
                DOCKER_REGISTRY_COMPONENT,
                Error::not_found("EDPComponent", namespace, DOCKER_REGISTRY_COMPONENT),
            )
        })?;
    Ok(component.spec.url)
}

async fn upsert_verified(
    kube: &dyn StageKubeClient,
    namespace: &str,
    name: &str,
    spec: CodebaseImageStreamSpec,
) -> Result<(), Error> {
    match kube.get_image_stream(namespace, name).await? {
        Some(mut existing) => {
            if existing.spec.codebase == spec.codebase
                && existing.spec.image_name == spec.image_name
            {
                debug!(stream = %name, "verified stream up to date");
                return Ok(());
            }
            existing.spec.codebase = spec.codebase;
            existing.spec.image_name = spec.image_name;
            kube.replace_image_stream(namespace, &existing)
                .await
                .map_err(|e| Error::downstream("update", "CodebaseImageStream", name, e))?;
            info!(stream = %name, "updated verified stream");
        }
        None => {
            let stream = CodebaseImageStream::new(name, spec);
            kube.create_image_stream(namespace, &stream)
                .await
                .map_err(|e| Error::downstream("create", "CodebaseImageStream", name, e))?;
            info!(stream = %name, "created verified stream");
        }
    }
    Ok(())
}

/// Create or update the stage's verified stream for every pipeline input
pub async fn promote(kube: &dyn StageKubeClient, stage: &Stage) -> Result<(), Error> {
    let namespace = stage.namespace().unwrap_or_default();
    let pipeline = pipeline_of(kube, stage).await?;
    let consumed = consumed_streams(kube, stage, &pipeline).await?;
    let registry = registry_url(kube, &namespace).await?;
    let pipeline_name = pipeline.name_any();

    for ConsumedStream { codebase, stream } in consumed {
        debug!(consumes = %stream.name_any(), codebase = %codebase, "promoting");
        let name = verified_stream_name(&pipeline_name, &stage.spec.name, &codebase);
        let spec = CodebaseImageStreamSpec {
            image_name: format!("{registry}/{namespace}/{codebase}"),
            codebase,
            ..Default::default()
        };
        upsert_verified(kube, &namespace, &name, spec).await?;
    }
    Ok(())
}
