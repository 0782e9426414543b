use crate::clients::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use k8s_openapi::api::core::v1::{Namespace, Pod};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use std::pin::Pin;
use tokio::io::AsyncRead;

/// A byte stream coming out of the cluster, e.g. container logs or the stdout of an exec session.
pub type ByteStream = Pin<Box<dyn AsyncRead + Send>>;

/// A stream of pods as they are added to the cluster.
pub type PodStream = BoxStream<'static, Result<Pod>>;

/// The REST endpoint that a `(apiVersion, kind)` pair maps to.
#[derive(Debug, Clone)]
pub struct ResourceMapping {
    pub api_resource: ApiResource,
    /// `true` when objects of this kind live inside a namespace.
    pub namespaced: bool,
}

/// # Cluster Gateway
///
/// The narrow set of cluster API calls that the rest of this crate needs. Everything that talks
/// to a cluster goes through this trait so that the coordination logic can be exercised against
/// an in-memory double. Implementations must be safe to share between tasks.
///
/// Calls are cancelled by dropping the returned future. Long lived streams (`watch_added_pods`,
/// `pod_logs`, `exec`) end when they are dropped.
#[async_trait]
pub trait ClusterGateway: Send + Sync {
    /// The `gitVersion` reported by the API server, e.g. `v1.24.3`.
    async fn server_version(&self) -> Result<String>;

    async fn get_namespace(&self, name: &str) -> Result<Namespace>;

    async fn list_namespaces(&self, label_selector: Option<&str>) -> Result<Vec<Namespace>>;

    async fn delete_namespace(&self, name: &str) -> Result<()>;

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod>;

    async fn list_pods(&self, namespace: &str, label_selector: Option<&str>) -> Result<Vec<Pod>>;

    /// Yields each pod the first time it is seen, starting with the pods that already exist. The
    /// underlying watch is reopened transparently when the server times it out.
    async fn watch_added_pods(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<PodStream>;

    async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        follow: bool,
    ) -> Result<ByteStream>;

    /// Run `command` in a container and return its stdout. If the remote side fails, the stream
    /// yields an error instead of a clean end of file.
    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: &[&str],
    ) -> Result<ByteStream>;

    async fn list_cluster_roles(&self, label_selector: &str) -> Result<Vec<ClusterRole>>;

    async fn list_cluster_role_bindings(
        &self,
        label_selector: &str,
    ) -> Result<Vec<ClusterRoleBinding>>;

    async fn delete_cluster_roles(&self, label_selector: &str) -> Result<()>;

    async fn delete_cluster_role_bindings(&self, label_selector: &str) -> Result<()>;

    /// Map an `apiVersion` and `kind` to its REST endpoint using discovery.
    async fn resolve(&self, api_version: &str, kind: &str) -> Result<ResourceMapping>;

    /// Create an object at the endpoint described by `mapping`. `namespace` must be `Some` for
    /// namespaced kinds and `None` for cluster scoped ones.
    async fn create(
        &self,
        mapping: &ResourceMapping,
        namespace: Option<&str>,
        object: &DynamicObject,
    ) -> Result<DynamicObject>;
}
