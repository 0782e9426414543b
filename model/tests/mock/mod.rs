/*!

An in-memory [`ClusterGateway`] so that the coordination logic can be tested without Kubernetes.

Objects live in a single mutex protected `State`. Tests seed the state, run an operation and then
inspect what the operation left behind.

!*/

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, StreamExt};
use k8s_openapi::api::core::v1::{Container, Namespace, NamespaceStatus, Pod, PodSpec};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use kube::api::{DynamicObject, ObjectMeta};
use kube::discovery::ApiResource;
use kube::ResourceExt;
use sonobuoy_model::clients::{
    ByteStream, ClusterGateway, Error, ErrorClass, PodStream, ResourceMapping, Result,
};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::io::StreamReader;

/// The objects the mock cluster knows about.
#[derive(Debug, Default)]
pub struct State {
    pub server_version: Option<String>,
    pub namespaces: BTreeMap<String, Namespace>,
    /// Namespaces being deleted, with the number of reads left before they disappear.
    pub terminating: BTreeMap<String, u32>,
    /// How many reads a deleted namespace stays around for.
    pub namespace_grace_reads: u32,
    pub pods: BTreeMap<(String, String), Pod>,
    /// `(namespace, pod, container)` to the chunks of its log.
    pub logs: BTreeMap<(String, String, String), Vec<Vec<u8>>>,
    pub exec_output: Option<Vec<u8>>,
    /// An error the exec stream ends with once `exec_output` was read, like a failed command.
    pub exec_error: Option<String>,
    pub exec_commands: Vec<Vec<String>>,
    pub cluster_roles: Vec<ClusterRole>,
    pub cluster_role_bindings: Vec<ClusterRoleBinding>,
    /// `(kind, namespace, name)` of every object created through `create`.
    pub objects: BTreeSet<(String, Option<String>, String)>,
    /// Kinds in the order they were created.
    pub created_kinds: Vec<String>,
}

#[derive(Debug, Default, Clone)]
pub struct MockGateway {
    state: Arc<Mutex<State>>,
}

impl MockGateway {
    pub fn new() -> Self {
        let gateway = Self::default();
        gateway.state().server_version = Some("v1.24.3".to_string());
        gateway
    }

    pub fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn add_namespace(&self, name: &str, labels: &[(&str, &str)]) {
        let namespace = Namespace {
            metadata: meta(name, None, labels),
            status: Some(NamespaceStatus {
                phase: Some("Active".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        self.state().namespaces.insert(name.to_string(), namespace);
    }

    pub fn add_pod(&self, pod: Pod) {
        let key = (pod.namespace().unwrap_or_default(), pod.name_any());
        self.state().pods.insert(key, pod);
    }

    pub fn add_logs(&self, namespace: &str, pod: &str, container: &str, chunks: &[&str]) {
        self.state().logs.insert(
            (namespace.to_string(), pod.to_string(), container.to_string()),
            chunks.iter().map(|c| c.as_bytes().to_vec()).collect(),
        );
    }

    pub fn add_cluster_rbac(&self, name: &str, labels: &[(&str, &str)]) {
        let mut state = self.state();
        state.cluster_roles.push(ClusterRole {
            metadata: meta(name, None, labels),
            ..Default::default()
        });
        state.cluster_role_bindings.push(ClusterRoleBinding {
            metadata: meta(name, None, labels),
            ..Default::default()
        });
    }
}

pub fn meta(name: &str, namespace: Option<&str>, labels: &[(&str, &str)]) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: namespace.map(str::to_string),
        labels: Some(
            labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ),
        ..Default::default()
    }
}

/// A pod with one container per name.
pub fn pod(namespace: &str, name: &str, labels: &[(&str, &str)], containers: &[&str]) -> Pod {
    Pod {
        metadata: meta(name, Some(namespace), labels),
        spec: Some(PodSpec {
            containers: containers
                .iter()
                .map(|c| Container {
                    name: c.to_string(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Supports the `key=value` and `key` terms of label selectors.
pub fn matches_selector(labels: &BTreeMap<String, String>, selector: Option<&str>) -> bool {
    let selector = match selector {
        Some(selector) => selector,
        None => return true,
    };
    selector
        .split(',')
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((key, value)) => labels.get(key).map(String::as_str) == Some(value),
            None => labels.contains_key(term),
        })
}

fn not_found(what: &str) -> Error {
    Error::new(ErrorClass::NotFound, format!("{} not found", what))
}

fn byte_stream(chunks: Vec<Vec<u8>>) -> ByteStream {
    Box::pin(StreamReader::new(stream::iter(
        chunks
            .into_iter()
            .map(|chunk| Ok::<_, io::Error>(Bytes::from(chunk))),
    )))
}

fn mapping(group: &str, version: &str, kind: &str, plural: &str, namespaced: bool) -> ResourceMapping {
    let api_version = if group.is_empty() {
        version.to_string()
    } else {
        format!("{}/{}", group, version)
    };
    ResourceMapping {
        api_resource: ApiResource {
            group: group.to_string(),
            version: version.to_string(),
            api_version,
            kind: kind.to_string(),
            plural: plural.to_string(),
        },
        namespaced,
    }
}

#[async_trait]
impl ClusterGateway for MockGateway {
    async fn server_version(&self) -> Result<String> {
        self.state()
            .server_version
            .clone()
            .ok_or_else(|| Error::new(ErrorClass::Other, "the server is unavailable"))
    }

    async fn get_namespace(&self, name: &str) -> Result<Namespace> {
        let mut state = self.state();
        if let Some(reads_left) = state.terminating.get_mut(name) {
            if *reads_left == 0 {
                state.terminating.remove(name);
                state.namespaces.remove(name);
            } else {
                *reads_left -= 1;
            }
        }
        state
            .namespaces
            .get(name)
            .cloned()
            .ok_or_else(|| not_found(name))
    }

    async fn list_namespaces(&self, label_selector: Option<&str>) -> Result<Vec<Namespace>> {
        let mut state = self.state();
        // Listing counts as a read of every terminating namespace.
        let names: Vec<String> = state.terminating.keys().cloned().collect();
        for name in names {
            let done = match state.terminating.get_mut(&name) {
                Some(0) => true,
                Some(reads_left) => {
                    *reads_left -= 1;
                    false
                }
                None => false,
            };
            if done {
                state.terminating.remove(&name);
                state.namespaces.remove(&name);
            }
        }
        Ok(state
            .namespaces
            .values()
            .filter(|ns| matches_selector(ns.labels(), label_selector))
            .cloned()
            .collect())
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        let mut state = self.state();
        if !state.namespaces.contains_key(name) {
            return Err(not_found(name));
        }
        if state.terminating.contains_key(name) {
            return Err(Error::new(ErrorClass::Conflict, "namespace is terminating"));
        }
        let grace = state.namespace_grace_reads;
        state.terminating.insert(name.to_string(), grace);
        if let Some(status) = state
            .namespaces
            .get_mut(name)
            .and_then(|ns| ns.status.as_mut())
        {
            status.phase = Some("Terminating".to_string());
        }
        Ok(())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod> {
        self.state()
            .pods
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| not_found(name))
    }

    async fn list_pods(&self, namespace: &str, label_selector: Option<&str>) -> Result<Vec<Pod>> {
        Ok(self
            .state()
            .pods
            .iter()
            .filter(|((ns, _), pod)| ns == namespace && matches_selector(pod.labels(), label_selector))
            .map(|(_, pod)| pod.clone())
            .collect())
    }

    async fn watch_added_pods(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<PodStream> {
        let pods = self.list_pods(namespace, label_selector).await?;
        Ok(stream::iter(pods.into_iter().map(Ok)).boxed())
    }

    async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        _follow: bool,
    ) -> Result<ByteStream> {
        let chunks = self
            .state()
            .logs
            .get(&(namespace.to_string(), pod.to_string(), container.to_string()))
            .cloned()
            .ok_or_else(|| not_found(&format!("logs of {}/{}", pod, container)))?;
        Ok(byte_stream(chunks))
    }

    async fn exec(
        &self,
        _namespace: &str,
        _pod: &str,
        _container: &str,
        command: &[&str],
    ) -> Result<ByteStream> {
        let mut state = self.state();
        state
            .exec_commands
            .push(command.iter().map(|s| s.to_string()).collect());
        let output = state
            .exec_output
            .clone()
            .ok_or_else(|| Error::new(ErrorClass::Other, "exec is not available"))?;
        let mut chunks = vec![Ok(Bytes::from(output))];
        if let Some(message) = state.exec_error.clone() {
            chunks.push(Err(io::Error::new(io::ErrorKind::Other, message)));
        }
        Ok(Box::pin(StreamReader::new(stream::iter(chunks))))
    }

    async fn list_cluster_roles(&self, label_selector: &str) -> Result<Vec<ClusterRole>> {
        Ok(self
            .state()
            .cluster_roles
            .iter()
            .filter(|role| matches_selector(role.labels(), Some(label_selector)))
            .cloned()
            .collect())
    }

    async fn list_cluster_role_bindings(
        &self,
        label_selector: &str,
    ) -> Result<Vec<ClusterRoleBinding>> {
        Ok(self
            .state()
            .cluster_role_bindings
            .iter()
            .filter(|binding| matches_selector(binding.labels(), Some(label_selector)))
            .cloned()
            .collect())
    }

    async fn delete_cluster_roles(&self, label_selector: &str) -> Result<()> {
        self.state()
            .cluster_roles
            .retain(|role| !matches_selector(role.labels(), Some(label_selector)));
        Ok(())
    }

    async fn delete_cluster_role_bindings(&self, label_selector: &str) -> Result<()> {
        self.state()
            .cluster_role_bindings
            .retain(|binding| !matches_selector(binding.labels(), Some(label_selector)));
        Ok(())
    }

    async fn resolve(&self, api_version: &str, kind: &str) -> Result<ResourceMapping> {
        let known = match (api_version, kind) {
            ("v1", "Namespace") => mapping("", "v1", kind, "namespaces", false),
            ("v1", "ServiceAccount") => mapping("", "v1", kind, "serviceaccounts", true),
            ("v1", "ConfigMap") => mapping("", "v1", kind, "configmaps", true),
            ("v1", "Pod") => mapping("", "v1", kind, "pods", true),
            ("v1", "Service") => mapping("", "v1", kind, "services", true),
            ("rbac.authorization.k8s.io/v1", "ClusterRole") => {
                mapping("rbac.authorization.k8s.io", "v1", kind, "clusterroles", false)
            }
            ("rbac.authorization.k8s.io/v1", "ClusterRoleBinding") => mapping(
                "rbac.authorization.k8s.io",
                "v1",
                kind,
                "clusterrolebindings",
                false,
            ),
            _ => return Err(not_found(&format!("{} {}", api_version, kind))),
        };
        Ok(known)
    }

    async fn create(
        &self,
        mapping: &ResourceMapping,
        namespace: Option<&str>,
        object: &DynamicObject,
    ) -> Result<DynamicObject> {
        let kind = mapping.api_resource.kind.clone();
        let name = object.name_any();
        let key = (kind.clone(), namespace.map(str::to_string), name.clone());
        let mut state = self.state();
        if let Some(namespace) = namespace {
            if !state.namespaces.contains_key(namespace) {
                return Err(not_found(namespace));
            }
        }
        let exists = state.objects.contains(&key)
            || (kind == "Namespace" && state.namespaces.contains_key(&name));
        if exists {
            return Err(Error::new(
                ErrorClass::AlreadyExists,
                format!("{} '{}' already exists", kind, name),
            ));
        }
        if kind == "Namespace" {
            state.namespaces.insert(
                name.clone(),
                Namespace {
                    metadata: object.metadata.clone(),
                    ..Default::default()
                },
            );
        }
        state.objects.insert(key);
        state.created_kinds.push(kind);
        Ok(object.clone())
    }
}

/// A writer whose contents can be read back after it was handed to a printer.
#[derive(Debug, Default, Clone)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).to_string()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
