use super::component_labels;
use crate::constants::SERVICE_ACCOUNT;
use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, PolicyRule, RoleRef, Subject};
use kube::api::ObjectMeta;

/// Cluster scoped objects are shared by every run, so their names carry the namespace of the run
/// that created them.
pub(crate) fn cluster_role_name(namespace: &str) -> String {
    format!("{}-{}", SERVICE_ACCOUNT, namespace)
}

/// Defines the service account the aggregator and its plugins run as.
pub(super) fn service_account(namespace: &str) -> ServiceAccount {
    ServiceAccount {
        metadata: ObjectMeta {
            name: Some(SERVICE_ACCOUNT.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(component_labels(namespace)),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Defines the cluster role of the aggregator. Plugins query arbitrary resources, so the role is
/// unrestricted.
pub(super) fn cluster_role(namespace: &str) -> ClusterRole {
    ClusterRole {
        metadata: ObjectMeta {
            name: Some(cluster_role_name(namespace)),
            labels: Some(component_labels(namespace)),
            ..Default::default()
        },
        rules: Some(vec![
            PolicyRule {
                api_groups: Some(vec!["*".to_string()]),
                resources: Some(vec!["*".to_string()]),
                verbs: vec!["*".to_string()],
                ..Default::default()
            },
            PolicyRule {
                non_resource_urls: Some(
                    ["/metrics", "/logs", "/logs/*"]
                        .iter()
                        .map(|s| s.to_string())
                        .collect(),
                ),
                verbs: vec!["get".to_string()],
                ..Default::default()
            },
        ]),
        ..Default::default()
    }
}

/// Binds the aggregator's service account to its cluster role.
pub(super) fn cluster_role_binding(namespace: &str) -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some(cluster_role_name(namespace)),
            labels: Some(component_labels(namespace)),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: cluster_role_name(namespace),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: SERVICE_ACCOUNT.to_string(),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        }]),
    }
}
