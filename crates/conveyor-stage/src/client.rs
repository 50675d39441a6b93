//! Cluster access for the stage controller
//!
//! Every read and write the provisioning chain and deletion protocol issue
//! goes through [`StageKubeClient`], so the chain can run against a mock or
//! an in-memory cluster in tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use conveyor_common::crd::{
    CDPipeline, CodebaseImageStream, EDPComponent, JenkinsJob, Project, ProjectRequest, Space,
    Stage, StageStatus,
};
use conveyor_common::kube_utils::{patch_finalizers, patch_resource_status, HasApiResource};
use conveyor_common::{Error, FIELD_MANAGER};

// =============================================================================
// Trait
// =============================================================================

/// Trait abstracting Kubernetes client operations for Stage provisioning
///
/// Lookups return `Ok(None)` for missing objects. Writes classify API
/// failures with [`Error::from_kube`], so an existing object surfaces as
/// `AlreadyExists` and a lost update as `Conflict`.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StageKubeClient: Send + Sync {
    /// List all Stages in a namespace
    async fn list_stages(&self, namespace: &str) -> Result<Vec<Stage>, Error>;

    /// Patch the status of a Stage
    async fn patch_stage_status(
        &self,
        namespace: &str,
        name: &str,
        status: &StageStatus,
    ) -> Result<(), Error>;

    /// Replace the finalizer list of a Stage, guarded by its resource version
    async fn patch_stage_finalizers(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<String>,
        finalizers: Vec<String>,
    ) -> Result<(), Error>;

    /// Set the owner references of a Stage and merge in its labels
    async fn patch_stage_ownership(
        &self,
        namespace: &str,
        name: &str,
        owners: Vec<OwnerReference>,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), Error>;

    /// Get a CDPipeline by name and namespace
    async fn get_pipeline(&self, namespace: &str, name: &str)
        -> Result<Option<CDPipeline>, Error>;

    /// Get an EDPComponent by name and namespace
    async fn get_component(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<EDPComponent>, Error>;

    /// Get a CodebaseImageStream by name and namespace
    async fn get_image_stream(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<CodebaseImageStream>, Error>;

    /// Create a CodebaseImageStream
    async fn create_image_stream(
        &self,
        namespace: &str,
        stream: &CodebaseImageStream,
    ) -> Result<(), Error>;

    /// Replace a CodebaseImageStream, guarded by its resource version
    async fn replace_image_stream(
        &self,
        namespace: &str,
        stream: &CodebaseImageStream,
    ) -> Result<(), Error>;

    /// Get a JenkinsJob by name and namespace
    async fn get_jenkins_job(&self, namespace: &str, name: &str)
        -> Result<Option<JenkinsJob>, Error>;

    /// Create a JenkinsJob
    async fn create_jenkins_job(&self, namespace: &str, job: &JenkinsJob) -> Result<(), Error>;

    /// Replace a JenkinsJob, guarded by its resource version
    async fn replace_jenkins_job(&self, namespace: &str, job: &JenkinsJob) -> Result<(), Error>;

    /// Check whether a Namespace exists
    async fn namespace_exists(&self, name: &str) -> Result<bool, Error>;

    /// Create a Namespace
    async fn create_namespace(&self, name: &str) -> Result<(), Error>;

    /// Delete a Namespace
    async fn delete_namespace(&self, name: &str) -> Result<(), Error>;

    /// Create a kiosk Space owned by `account`
    async fn create_space(&self, name: &str, account: &str) -> Result<(), Error>;

    /// Request an OpenShift project
    async fn create_project(&self, name: &str, description: &str) -> Result<(), Error>;

    /// Delete an OpenShift project
    async fn delete_project(&self, name: &str) -> Result<(), Error>;

    /// Get a Role by name and namespace
    async fn get_role(&self, namespace: &str, name: &str) -> Result<Option<Role>, Error>;

    /// Create a Role
    async fn create_role(&self, namespace: &str, role: &Role) -> Result<(), Error>;

    /// Get a RoleBinding by name and namespace
    async fn get_role_binding(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<RoleBinding>, Error>;

    /// Create a RoleBinding
    async fn create_role_binding(
        &self,
        namespace: &str,
        binding: &RoleBinding,
    ) -> Result<(), Error>;
}

// =============================================================================
// Implementation
// =============================================================================

/// Real Kubernetes client implementation
pub struct StageKubeClientImpl {
    client: Client,
}

impl StageKubeClientImpl {
    /// Create a new StageKubeClientImpl wrapping the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn get_namespaced<K>(&self, namespace: &str, name: &str) -> Result<Option<K>, Error>
    where
        K: Resource<Scope = kube::core::NamespaceResourceScope>
            + Clone
            + serde::de::DeserializeOwned
            + std::fmt::Debug,
        K::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name)
            .await
            .map_err(|e| Error::from_kube(e, kind_of::<K>(), namespace, name))
    }

    async fn create_namespaced<K>(&self, namespace: &str, obj: &K) -> Result<(), Error>
    where
        K: Resource<Scope = kube::core::NamespaceResourceScope>
            + Clone
            + serde::Serialize
            + serde::de::DeserializeOwned
            + std::fmt::Debug,
        K::DynamicType: Default,
    {
        let name = obj.name_any();
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), obj)
            .await
            .map_err(|e| Error::from_kube(e, kind_of::<K>(), namespace, &name))?;
        debug!(kind = %kind_of::<K>(), namespace, name = %name, "created");
        Ok(())
    }

    async fn replace_namespaced<K>(&self, namespace: &str, obj: &K) -> Result<(), Error>
    where
        K: Resource<Scope = kube::core::NamespaceResourceScope>
            + Clone
            + serde::Serialize
            + serde::de::DeserializeOwned
            + std::fmt::Debug,
        K::DynamicType: Default,
    {
        let name = obj.name_any();
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        api.replace(&name, &PostParams::default(), obj)
            .await
            .map_err(|e| Error::from_kube(e, kind_of::<K>(), namespace, &name))?;
        debug!(kind = %kind_of::<K>(), namespace, name = %name, "replaced");
        Ok(())
    }

    fn stages(&self, namespace: &str) -> Api<Stage> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn kind_of<K>() -> String
where
    K: Resource,
    K::DynamicType: Default,
{
    K::kind(&K::DynamicType::default()).into_owned()
}

#[async_trait]
impl StageKubeClient for StageKubeClientImpl {
    async fn list_stages(&self, namespace: &str) -> Result<Vec<Stage>, Error> {
        let list = self
            .stages(namespace)
            .list(&ListParams::default())
            .await
            .map_err(|e| Error::from_kube(e, "Stage", namespace, ""))?;
        Ok(list.items)
    }

    async fn patch_stage_status(
        &self,
        namespace: &str,
        name: &str,
        status: &StageStatus,
    ) -> Result<(), Error> {
        patch_resource_status(&self.stages(namespace), name, status, FIELD_MANAGER)
            .await
            .map_err(|e| Error::from_kube(e, "Stage", namespace, name))
    }

    async fn patch_stage_finalizers(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<String>,
        finalizers: Vec<String>,
    ) -> Result<(), Error> {
        patch_finalizers(
            &self.stages(namespace),
            name,
            resource_version.as_deref(),
            &finalizers,
            FIELD_MANAGER,
        )
        .await
        .map_err(|e| Error::from_kube(e, "Stage", namespace, name))
    }

    async fn patch_stage_ownership(
        &self,
        namespace: &str,
        name: &str,
        owners: Vec<OwnerReference>,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), Error> {
        let patch = serde_json::json!({
            "metadata": {
                "ownerReferences": owners,
                "labels": labels,
            }
        });
        self.stages(namespace)
            .patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
            .map_err(|e| Error::from_kube(e, "Stage", namespace, name))?;
        Ok(())
    }

    async fn get_pipeline(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<CDPipeline>, Error> {
        self.get_namespaced(namespace, name).await
    }

    async fn get_component(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<EDPComponent>, Error> {
        self.get_namespaced(namespace, name).await
    }

    async fn get_image_stream(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<CodebaseImageStream>, Error> {
        self.get_namespaced(namespace, name).await
    }

    async fn create_image_stream(
        &self,
        namespace: &str,
        stream: &CodebaseImageStream,
    ) -> Result<(), Error> {
        self.create_namespaced(namespace, stream).await
    }

    async fn replace_image_stream(
        &self,
        namespace: &str,
        stream: &CodebaseImageStream,
    ) -> Result<(), Error> {
        self.replace_namespaced(namespace, stream).await
    }

    async fn get_jenkins_job(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<JenkinsJob>, Error> {
        self.get_namespaced(namespace, name).await
    }

    async fn create_jenkins_job(&self, namespace: &str, job: &JenkinsJob) -> Result<(), Error> {
        self.create_namespaced(namespace, job).await
    }

    async fn replace_jenkins_job(&self, namespace: &str, job: &JenkinsJob) -> Result<(), Error> {
        self.replace_namespaced(namespace, job).await
    }

    async fn namespace_exists(&self, name: &str) -> Result<bool, Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let ns = api
            .get_opt(name)
            .await
            .map_err(|e| Error::from_kube(e, "Namespace", "", name))?;
        Ok(ns.is_some())
    }

    async fn create_namespace(&self, name: &str) -> Result<(), Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let mut ns = Namespace::default();
        ns.metadata.name = Some(name.to_string());
        api.create(&PostParams::default(), &ns)
            .await
            .map_err(|e| Error::from_kube(e, "Namespace", "", name))?;
        debug!(namespace = %name, "created namespace");
        Ok(())
    }

    async fn delete_namespace(&self, name: &str) -> Result<(), Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        api.delete(name, &DeleteParams::default())
            .await
            .map_err(|e| Error::from_kube(e, "Namespace", "", name))?;
        Ok(())
    }

    async fn create_space(&self, name: &str, account: &str) -> Result<(), Error> {
        let ar = Space::api_resource();
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &ar);
        let space = DynamicObject::new(name, &ar).data(serde_json::json!({
            "spec": { "account": account }
        }));
        api.create(&PostParams::default(), &space)
            .await
            .map_err(|e| Error::from_kube(e, Space::KIND, "", name))?;
        debug!(space = %name, account, "created space");
        Ok(())
    }

    async fn create_project(&self, name: &str, description: &str) -> Result<(), Error> {
        let ar = ProjectRequest::api_resource();
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &ar);
        let request = DynamicObject::new(name, &ar).data(serde_json::json!({
            "displayName": name,
            "description": description,
        }));
        api.create(&PostParams::default(), &request)
            .await
            .map_err(|e| Error::from_kube(e, ProjectRequest::KIND, "", name))?;
        debug!(project = %name, "requested project");
        Ok(())
    }

    async fn delete_project(&self, name: &str) -> Result<(), Error> {
        let ar = Project::api_resource();
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &ar);
        api.delete(name, &DeleteParams::default())
            .await
            .map_err(|e| Error::from_kube(e, Project::KIND, "", name))?;
        Ok(())
    }

    async fn get_role(&self, namespace: &str, name: &str) -> Result<Option<Role>, Error> {
        self.get_namespaced(namespace, name).await
    }

    async fn create_role(&self, namespace: &str, role: &Role) -> Result<(), Error> {
        self.create_namespaced(namespace, role).await
    }

    async fn get_role_binding(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<RoleBinding>, Error> {
        self.get_namespaced(namespace, name).await
    }

    async fn create_role_binding(
        &self,
        namespace: &str,
        binding: &RoleBinding,
    ) -> Result<(), Error> {
        self.create_namespaced(namespace, binding).await
    }
}
