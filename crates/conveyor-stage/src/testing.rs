//! In-memory cluster for multi-step tests
//!
//! Mock expectations get unwieldy once a scenario spans the whole chain, so
//! these tests run against a small object store instead. It enforces the
//! same create/replace semantics the API server does: duplicate creates fail
//! with `AlreadyExists`, stale resource versions fail with `Conflict`, and a
//! Stage marked for deletion disappears once its last finalizer is removed.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference, Time};
use kube::core::ErrorResponse;
use kube::ResourceExt;

use conveyor_common::crd::{
    CDPipeline, CDPipelineSpec, CodebaseImageStream, CodebaseImageStreamSpec, EDPComponent,
    EDPComponentSpec, JenkinsJob, Stage, StageSpec, StageStatus, DOCKER_REGISTRY_COMPONENT,
};
use conveyor_common::Error;

use crate::client::StageKubeClient;

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

#[derive(Default)]
struct Cluster {
    revision: u64,
    stages: BTreeMap<Key, Stage>,
    pipelines: BTreeMap<Key, CDPipeline>,
    components: BTreeMap<Key, EDPComponent>,
    image_streams: BTreeMap<Key, CodebaseImageStream>,
    jenkins_jobs: BTreeMap<Key, JenkinsJob>,
    roles: BTreeMap<Key, Role>,
    role_bindings: BTreeMap<Key, RoleBinding>,
    namespaces: BTreeSet<String>,
    spaces: BTreeMap<String, String>,
    projects: BTreeSet<String>,
    stage_writes: Vec<(String, &'static str)>,
    failures: BTreeSet<&'static str>,
}

impl Cluster {
    fn next_revision(&mut self) -> String {
        self.revision += 1;
        self.revision.to_string()
    }

    fn check_failure(&mut self, op: &'static str) -> Result<(), Error> {
        if self.failures.remove(op) {
            return Err(Error::Kube {
                source: kube::Error::Api(ErrorResponse {
                    status: "Failure".to_string(),
                    message: format!("injected failure in {op}"),
                    reason: "InternalError".to_string(),
                    code: 500,
                }),
            });
        }
        Ok(())
    }
}

fn insert_new<T: kube::Resource + Clone>(
    store: &mut BTreeMap<Key, T>,
    namespace: &str,
    obj: &T,
    kind: &str,
    revision: String,
) -> Result<(), Error> {
    let name = obj.meta().name.clone().unwrap_or_default();
    let k = key(namespace, &name);
    if store.contains_key(&k) {
        return Err(Error::AlreadyExists {
            kind: kind.to_string(),
            name,
        });
    }
    let mut stored = obj.clone();
    stored.meta_mut().namespace = Some(namespace.to_string());
    stored.meta_mut().resource_version = Some(revision);
    store.insert(k, stored);
    Ok(())
}

fn replace_existing<T: kube::Resource + Clone>(
    store: &mut BTreeMap<Key, T>,
    namespace: &str,
    obj: &T,
    kind: &str,
    revision: String,
) -> Result<(), Error> {
    let name = obj.meta().name.clone().unwrap_or_default();
    let k = key(namespace, &name);
    let Some(current) = store.get(&k) else {
        return Err(Error::not_found(kind, namespace, name));
    };
    if obj.meta().resource_version.is_some()
        && obj.meta().resource_version != current.meta().resource_version
    {
        return Err(Error::Conflict {
            kind: kind.to_string(),
            name,
        });
    }
    let mut stored = obj.clone();
    stored.meta_mut().resource_version = Some(revision);
    store.insert(k, stored);
    Ok(())
}

/// Apply a JSON merge patch the way the API server does: `null` removes a
/// key, objects merge recursively, anything else replaces.
fn merge_patch(target: &mut serde_json::Value, patch: serde_json::Value) {
    let serde_json::Value::Object(fields) = patch else {
        *target = patch;
        return;
    };
    if !target.is_object() {
        *target = serde_json::json!({});
    }
    if let serde_json::Value::Object(current) = target {
        for (key, value) in fields {
            if value.is_null() {
                current.remove(&key);
            } else {
                merge_patch(current.entry(key).or_insert(serde_json::Value::Null), value);
            }
        }
    }
}

fn seed<T: kube::Resource>(
    store: &mut BTreeMap<Key, T>,
    namespace: &str,
    mut obj: T,
    revision: String,
) {
    let name = obj.meta().name.clone().unwrap_or_default();
    obj.meta_mut().namespace = Some(namespace.to_string());
    obj.meta_mut().resource_version = Some(revision);
    store.insert(key(namespace, &name), obj);
}

/// In-memory [`StageKubeClient`]
#[derive(Default)]
pub struct FakeCluster {
    inner: Mutex<Cluster>,
}

impl FakeCluster {
    /// Empty cluster
    pub fn new() -> Self {
        Self::default()
    }

    /// Cluster holding a pipeline with the given input streams, the registry
    /// component and one source image stream per input
    pub fn with_pipeline(namespace: &str, pipeline: &str, inputs: &[(&str, &str)]) -> Self {
        let cluster = Self::new();
        cluster.insert_pipeline(
            namespace,
            CDPipeline::new(
                pipeline,
                CDPipelineSpec {
                    name: pipeline.to_string(),
                    input_docker_streams: inputs.iter().map(|(s, _)| s.to_string()).collect(),
                    deployment_type: "container".to_string(),
                    ..Default::default()
                },
            ),
        );
        cluster.insert_component(
            namespace,
            EDPComponent::new(
                DOCKER_REGISTRY_COMPONENT,
                EDPComponentSpec {
                    url: "registry.example.com".to_string(),
                    ..Default::default()
                },
            ),
        );
        for (stream, codebase) in inputs {
            cluster.insert_image_stream(namespace, image_stream(stream, codebase));
        }
        cluster
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Cluster> {
        self.inner.lock().expect("fake cluster lock poisoned")
    }

    /// Make the next call to `op` fail with a server error
    pub fn fail_next(&self, op: &'static str) {
        self.lock().failures.insert(op);
    }

    /// Store a Stage as-is
    pub fn insert_stage(&self, mut stage: Stage) {
        let mut c = self.lock();
        stage.metadata.resource_version = Some(c.next_revision());
        let k = key(&stage.namespace().unwrap_or_default(), &stage.name_any());
        c.stages.insert(k, stage);
    }

    /// Store a CDPipeline
    pub fn insert_pipeline(&self, namespace: &str, pipeline: CDPipeline) {
        let mut c = self.lock();
        let rv = c.next_revision();
        seed(&mut c.pipelines, namespace, pipeline, rv);
    }

    /// Store an EDPComponent
    pub fn insert_component(&self, namespace: &str, component: EDPComponent) {
        let mut c = self.lock();
        let rv = c.next_revision();
        seed(&mut c.components, namespace, component, rv);
    }

    /// Store a CodebaseImageStream
    pub fn insert_image_stream(&self, namespace: &str, stream: CodebaseImageStream) {
        let mut c = self.lock();
        let rv = c.next_revision();
        seed(&mut c.image_streams, namespace, stream, rv);
    }

    /// Store a Namespace
    pub fn insert_namespace(&self, name: &str) {
        self.lock().namespaces.insert(name.to_string());
    }

    /// Store a Role
    pub fn insert_role(&self, namespace: &str, role: Role) {
        let mut c = self.lock();
        let rv = c.next_revision();
        seed(&mut c.roles, namespace, role, rv);
    }

    /// Current copy of a Stage
    pub fn stage(&self, namespace: &str, name: &str) -> Option<Stage> {
        self.lock().stages.get(&key(namespace, name)).cloned()
    }

    /// Current copy of an image stream
    pub fn image_stream(&self, namespace: &str, name: &str) -> Option<CodebaseImageStream> {
        self.lock().image_streams.get(&key(namespace, name)).cloned()
    }

    /// Current copy of a JenkinsJob
    pub fn jenkins_job(&self, namespace: &str, name: &str) -> Option<JenkinsJob> {
        self.lock().jenkins_jobs.get(&key(namespace, name)).cloned()
    }

    /// Current copy of a Role
    pub fn role(&self, namespace: &str, name: &str) -> Option<Role> {
        self.lock().roles.get(&key(namespace, name)).cloned()
    }

    /// Names of the RoleBindings in a namespace
    pub fn role_binding_names(&self, namespace: &str) -> Vec<String> {
        self.lock()
            .role_bindings
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect()
    }

    /// Current copy of a RoleBinding
    pub fn role_binding(&self, namespace: &str, name: &str) -> Option<RoleBinding> {
        self.lock().role_bindings.get(&key(namespace, name)).cloned()
    }

    /// Whether a Namespace exists
    pub fn has_namespace(&self, name: &str) -> bool {
        self.lock().namespaces.contains(name)
    }

    /// Account a Space was created for
    pub fn space_account(&self, name: &str) -> Option<String> {
        self.lock().spaces.get(name).cloned()
    }

    /// Whether a Project exists
    pub fn has_project(&self, name: &str) -> bool {
        self.lock().projects.contains(name)
    }

    /// Writes issued against Stages, in order, as (stage name, operation)
    pub fn stage_writes(&self) -> Vec<(String, &'static str)> {
        self.lock().stage_writes.clone()
    }
}

#[async_trait]
impl StageKubeClient for FakeCluster {
    async fn list_stages(&self, namespace: &str) -> Result<Vec<Stage>, Error> {
        let mut c = self.lock();
        c.check_failure("list_stages")?;
        Ok(c.stages
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, s)| s.clone())
            .collect())
    }

    async fn patch_stage_status(
        &self,
        namespace: &str,
        name: &str,
        status: &StageStatus,
    ) -> Result<(), Error> {
        tokio::task::yield_now().await;
        let mut c = self.lock();
        c.check_failure("patch_stage_status")?;
        let stage = c
            .stages
            .get_mut(&key(namespace, name))
            .ok_or_else(|| Error::not_found("Stage", namespace, name))?;
        let mut merged = match &stage.status {
            Some(current) => serde_json::to_value(current)?,
            None => serde_json::json!({}),
        };
        merge_patch(&mut merged, serde_json::to_value(status)?);
        stage.status = Some(serde_json::from_value(merged)?);
        c.stage_writes.push((name.to_string(), "status"));
        Ok(())
    }

    async fn patch_stage_finalizers(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<String>,
        finalizers: Vec<String>,
    ) -> Result<(), Error> {
        tokio::task::yield_now().await;
        let mut c = self.lock();
        c.check_failure("patch_stage_finalizers")?;
        let rv = c.next_revision();
        let k = key(namespace, name);
        let stage = c
            .stages
            .get_mut(&k)
            .ok_or_else(|| Error::not_found("Stage", namespace, name))?;
        if resource_version.is_some() && resource_version != stage.metadata.resource_version {
            return Err(Error::Conflict {
                kind: "Stage".to_string(),
                name: name.to_string(),
            });
        }
        let gone = finalizers.is_empty() && stage.metadata.deletion_timestamp.is_some();
        stage.metadata.finalizers = Some(finalizers);
        stage.metadata.resource_version = Some(rv);
        if gone {
            c.stages.remove(&k);
        }
        c.stage_writes.push((name.to_string(), "finalizers"));
        Ok(())
    }

    async fn patch_stage_ownership(
        &self,
        namespace: &str,
        name: &str,
        owners: Vec<OwnerReference>,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), Error> {
        tokio::task::yield_now().await;
        let mut c = self.lock();
        let rv = c.next_revision();
        let stage = c
            .stages
            .get_mut(&key(namespace, name))
            .ok_or_else(|| Error::not_found("Stage", namespace, name))?;
        stage.metadata.owner_references = Some(owners);
        stage.labels_mut().extend(labels.clone());
        stage.metadata.resource_version = Some(rv);
        c.stage_writes.push((name.to_string(), "ownership"));
        Ok(())
    }

    async fn get_pipeline(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<CDPipeline>, Error> {
        Ok(self.lock().pipelines.get(&key(namespace, name)).cloned())
    }

    async fn get_component(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<EDPComponent>, Error> {
        Ok(self.lock().components.get(&key(namespace, name)).cloned())
    }

    async fn get_image_stream(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<CodebaseImageStream>, Error> {
        Ok(self.image_stream(namespace, name))
    }

    async fn create_image_stream(
        &self,
        namespace: &str,
        stream: &CodebaseImageStream,
    ) -> Result<(), Error> {
        let mut c = self.lock();
        c.check_failure("create_image_stream")?;
        let rv = c.next_revision();
        insert_new(&mut c.image_streams, namespace, stream, "CodebaseImageStream", rv)
    }

    async fn replace_image_stream(
        &self,
        namespace: &str,
        stream: &CodebaseImageStream,
    ) -> Result<(), Error> {
        let mut c = self.lock();
        c.check_failure("replace_image_stream")?;
        let rv = c.next_revision();
        replace_existing(&mut c.image_streams, namespace, stream, "CodebaseImageStream", rv)
    }

    async fn get_jenkins_job(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<JenkinsJob>, Error> {
        Ok(self.jenkins_job(namespace, name))
    }

    async fn create_jenkins_job(&self, namespace: &str, job: &JenkinsJob) -> Result<(), Error> {
        let mut c = self.lock();
        c.check_failure("create_jenkins_job")?;
        let rv = c.next_revision();
        insert_new(&mut c.jenkins_jobs, namespace, job, "JenkinsJob", rv)
    }

    async fn replace_jenkins_job(&self, namespace: &str, job: &JenkinsJob) -> Result<(), Error> {
        let mut c = self.lock();
        let rv = c.next_revision();
        replace_existing(&mut c.jenkins_jobs, namespace, job, "JenkinsJob", rv)
    }

    async fn namespace_exists(&self, name: &str) -> Result<bool, Error> {
        Ok(self.has_namespace(name))
    }

    async fn create_namespace(&self, name: &str) -> Result<(), Error> {
        let mut c = self.lock();
        c.check_failure("create_namespace")?;
        if !c.namespaces.insert(name.to_string()) {
            return Err(Error::AlreadyExists {
                kind: "Namespace".to_string(),
                name: name.to_string(),
            });
        }
        Ok(())
    }

    async fn delete_namespace(&self, name: &str) -> Result<(), Error> {
        let mut c = self.lock();
        c.check_failure("delete_namespace")?;
        if !c.namespaces.remove(name) {
            return Err(Error::not_found("Namespace", "", name));
        }
        Ok(())
    }

    async fn create_space(&self, name: &str, account: &str) -> Result<(), Error> {
        let mut c = self.lock();
        if c.spaces.contains_key(name) {
            return Err(Error::AlreadyExists {
                kind: "Space".to_string(),
                name: name.to_string(),
            });
        }
        c.spaces.insert(name.to_string(), account.to_string());
        c.namespaces.insert(name.to_string());
        Ok(())
    }

    async fn create_project(&self, name: &str, _description: &str) -> Result<(), Error> {
        let mut c = self.lock();
        if !c.projects.insert(name.to_string()) {
            return Err(Error::AlreadyExists {
                kind: "ProjectRequest".to_string(),
                name: name.to_string(),
            });
        }
        c.namespaces.insert(name.to_string());
        Ok(())
    }

    async fn delete_project(&self, name: &str) -> Result<(), Error> {
        let mut c = self.lock();
        c.check_failure("delete_project")?;
        if !c.projects.remove(name) {
            return Err(Error::not_found("Project", "", name));
        }
        c.namespaces.remove(name);
        Ok(())
    }

    async fn get_role(&self, namespace: &str, name: &str) -> Result<Option<Role>, Error> {
        let mut c = self.lock();
        c.check_failure("get_role")?;
        Ok(c.roles.get(&key(namespace, name)).cloned())
    }

    async fn create_role(&self, namespace: &str, role: &Role) -> Result<(), Error> {
        let mut c = self.lock();
        let rv = c.next_revision();
        insert_new(&mut c.roles, namespace, role, "Role", rv)
    }

    async fn get_role_binding(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<RoleBinding>, Error> {
        Ok(self.role_binding(namespace, name))
    }

    async fn create_role_binding(
        &self,
        namespace: &str,
        binding: &RoleBinding,
    ) -> Result<(), Error> {
        let mut c = self.lock();
        let rv = c.next_revision();
        insert_new(&mut c.role_bindings, namespace, binding, "RoleBinding", rv)
    }
}

// =============================================================================
// Fixtures
// =============================================================================

/// A Stage of `pipeline` in `namespace`, owned by the pipeline
pub fn stage(namespace: &str, pipeline: &str, name: &str, order: i32) -> Stage {
    Stage {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: StageSpec {
            name: name.to_string(),
            cd_pipeline: pipeline.to_string(),
            order,
            ..Default::default()
        },
        status: None,
    }
}

/// Mark a Stage for deletion
pub fn deleting(mut stage: Stage) -> Stage {
    stage.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
    stage
}

/// A source image stream for `codebase`
pub fn image_stream(name: &str, codebase: &str) -> CodebaseImageStream {
    CodebaseImageStream::new(
        name,
        CodebaseImageStreamSpec {
            codebase: codebase.to_string(),
            ..Default::default()
        },
    )
}
