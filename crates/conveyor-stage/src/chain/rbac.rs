//! Access control in the stage's target namespace
//!
//! The admin console may read deployments there, the CI service account
//! administers it, and on OpenShift the tenant's groups get admin and view
//! rights. Objects that already exist are left as they are.

use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use tracing::{debug, info};

use conveyor_common::crd::Stage;
use conveyor_common::{Error, PlatformConfig};

use crate::client::StageKubeClient;

const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";

/// Role letting the admin console list deployments
pub const VIEW_DEPLOYMENTS_ROLE: &str = "admin-console-view-deployments";
/// Binding of [`VIEW_DEPLOYMENTS_ROLE`] to the admin console
pub const DEPLOYMENTS_VIEWER_BINDING: &str = "ac-deployments-viewer";
/// Binding of the cluster `admin` role to the CI service account
pub const JENKINS_ADMIN_BINDING: &str = "jenkins-admin";

const ADMIN_CONSOLE_SERVICE_ACCOUNT: &str = "edp-admin-console";
const JENKINS_SERVICE_ACCOUNT: &str = "jenkins";

fn meta(name: &str, namespace: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    }
}

fn service_account(name: &str, namespace: &str) -> Subject {
    Subject {
        kind: "ServiceAccount".to_string(),
        name: name.to_string(),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    }
}

fn group(name: String) -> Subject {
    Subject {
        kind: "Group".to_string(),
        name,
        api_group: Some(RBAC_API_GROUP.to_string()),
        ..Default::default()
    }
}

fn binding(
    name: &str,
    namespace: &str,
    role_kind: &str,
    role: &str,
    subjects: Vec<Subject>,
) -> RoleBinding {
    RoleBinding {
        metadata: meta(name, namespace),
        role_ref: RoleRef {
            api_group: RBAC_API_GROUP.to_string(),
            kind: role_kind.to_string(),
            name: role.to_string(),
        },
        subjects: Some(subjects),
    }
}

/// Role granting read access to deployments
pub fn view_deployments_role(target: &str) -> Role {
    Role {
        metadata: meta(VIEW_DEPLOYMENTS_ROLE, target),
        rules: Some(vec![PolicyRule {
            api_groups: Some(vec!["apps".to_string()]),
            resources: Some(vec!["deployments".to_string()]),
            verbs: vec!["get".to_string(), "list".to_string()],
            ..Default::default()
        }]),
    }
}

/// Every RoleBinding the stage needs, in creation order
pub fn role_bindings(source: &str, target: &str, config: &PlatformConfig) -> Vec<RoleBinding> {
    let mut jenkins_subjects = vec![service_account(JENKINS_SERVICE_ACCOUNT, source)];
    if !config.is_kubernetes() {
        jenkins_subjects.push(group(format!("{source}-edp-super-admin")));
        jenkins_subjects.push(group(format!("{source}-edp-admin")));
    }

    let mut bindings = vec![
        binding(
            DEPLOYMENTS_VIEWER_BINDING,
            target,
            "Role",
            VIEW_DEPLOYMENTS_ROLE,
            vec![service_account(ADMIN_CONSOLE_SERVICE_ACCOUNT, source)],
        ),
        binding(JENKINS_ADMIN_BINDING, target, "ClusterRole", "admin", jenkins_subjects),
    ];
    if !config.is_kubernetes() {
        bindings.push(binding(
            &format!("{source}-view"),
            target,
            "ClusterRole",
            "view",
            vec![group(format!("{source}-edp-view"))],
        ));
    }
    bindings
}

async fn ensure_role(kube: &dyn StageKubeClient, role: &Role) -> Result<(), Error> {
    let namespace = role.namespace().unwrap_or_default();
    let name = role.name_any();
    if kube.get_role(&namespace, &name).await?.is_some() {
        debug!(role = %name, namespace = %namespace, "role already present");
        return Ok(());
    }
    kube.create_role(&namespace, role)
        .await
        .map_err(|e| Error::downstream("create", "Role", &name, e))?;
    info!(role = %name, namespace = %namespace, "created role");
    Ok(())
}

async fn ensure_role_binding(
    kube: &dyn StageKubeClient,
    binding: &RoleBinding,
) -> Result<(), Error> {
    let namespace = binding.namespace().unwrap_or_default();
    let name = binding.name_any();
    if kube.get_role_binding(&namespace, &name).await?.is_some() {
        debug!(binding = %name, namespace = %namespace, "role binding already present");
        return Ok(());
    }
    kube.create_role_binding(&namespace, binding)
        .await
        .map_err(|e| Error::downstream("create", "RoleBinding", &name, e))?;
    info!(binding = %name, namespace = %namespace, "created role binding");
    Ok(())
}

/// Create any missing Role and RoleBinding in the stage's target namespace
pub async fn configure(
    kube: &dyn StageKubeClient,
    stage: &Stage,
    config: &PlatformConfig,
) -> Result<(), Error> {
    let source = stage.namespace().unwrap_or_default();
    let target = stage.target_namespace();

    ensure_role(kube, &view_deployments_role(&target)).await?;
    for binding in role_bindings(&source, &target, config) {
        ensure_role_binding(kube, &binding).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockStageKubeClient;
    use crate::testing::{stage, FakeCluster};
    use conveyor_common::Platform;

    fn subject_names(binding: &RoleBinding) -> Vec<String> {
        binding
            .subjects
            .iter()
            .flatten()
            .map(|s| format!("{}:{}", s.kind, s.name))
            .collect()
    }

    #[tokio::test]
    async fn kubernetes_gets_console_and_jenkins_bindings_only() {
        let cluster = FakeCluster::new();
        let config = PlatformConfig::new(Platform::Kubernetes);

        configure(&cluster, &stage("edp", "mobile", "dev", 0), &config)
            .await
            .expect("rbac configured");

        let role = cluster.role("edp-dev", VIEW_DEPLOYMENTS_ROLE).expect("role created");
        let rule = &role.rules.expect("rules")[0];
        assert_eq!(rule.verbs, vec!["get", "list"]);

        assert_eq!(
            cluster.role_binding_names("edp-dev"),
            vec![DEPLOYMENTS_VIEWER_BINDING.to_string(), JENKINS_ADMIN_BINDING.to_string()]
        );
        let jenkins = cluster.role_binding("edp-dev", JENKINS_ADMIN_BINDING).expect("binding");
        assert_eq!(jenkins.role_ref.name, "admin");
        assert_eq!(subject_names(&jenkins), vec!["ServiceAccount:jenkins"]);
    }

    #[tokio::test]
    async fn openshift_adds_tenant_groups() {
        let cluster = FakeCluster::new();
        let config = PlatformConfig::new(Platform::Openshift);

        configure(&cluster, &stage("edp", "mobile", "dev", 0), &config)
            .await
            .expect("rbac configured");

        let jenkins = cluster.role_binding("edp-dev", JENKINS_ADMIN_BINDING).expect("binding");
        assert_eq!(
            subject_names(&jenkins),
            vec![
                "ServiceAccount:jenkins",
                "Group:edp-edp-super-admin",
                "Group:edp-edp-admin"
            ]
        );
        let view = cluster.role_binding("edp-dev", "edp-view").expect("view binding");
        assert_eq!(view.role_ref.kind, "ClusterRole");
        assert_eq!(subject_names(&view), vec!["Group:edp-edp-view"]);
    }

    #[tokio::test]
    async fn existing_objects_are_left_untouched() {
        let cluster = FakeCluster::new();
        let config = PlatformConfig::new(Platform::Kubernetes);
        let mut custom = view_deployments_role("edp-dev");
        custom.rules = None;
        cluster.insert_role("edp-dev", custom);

        let dev = stage("edp", "mobile", "dev", 0);
        configure(&cluster, &dev, &config).await.expect("first pass");
        configure(&cluster, &dev, &config).await.expect("second pass");

        assert!(cluster.role("edp-dev", VIEW_DEPLOYMENTS_ROLE).expect("role").rules.is_none());
        assert_eq!(cluster.role_binding_names("edp-dev").len(), 2);
    }

    #[tokio::test]
    async fn lookup_failure_stops_before_any_create() {
        let mut mock = MockStageKubeClient::new();
        mock.expect_get_role().returning(|ns, name| {
            Err(Error::configuration(format!("Role {ns}/{name}"), "forbidden"))
        });
        mock.expect_create_role().never();
        mock.expect_create_role_binding().never();

        let config = PlatformConfig::new(Platform::Kubernetes);
        let err = configure(&mock, &stage("edp", "mobile", "dev", 0), &config)
            .await
            .expect_err("lookup failure propagates");
        assert!(err.to_string().contains("forbidden"));
    }
}
