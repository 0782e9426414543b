use super::error::{self, Result};
use super::gateway::{ByteStream, ClusterGateway, PodStream, ResourceMapping};
use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::mpsc::{channel, Sender};
use futures::{Future, SinkExt, StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::{Namespace, Pod};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use kube::api::{
    AttachParams, DeleteParams, DynamicObject, GroupVersionKind, ListParams, LogParams, PostParams,
};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::{pinned_kind, Scope};
use kube::runtime::watcher;
use kube::{Api, Client, Config, ResourceExt};
use log::{debug, trace};
use snafu::{OptionExt, ResultExt};
use std::collections::HashSet;
use std::io;
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::io::StreamReader;

/// Server side timeout, in seconds, for each watch request. The watcher reopens the watch when it
/// expires.
const WATCH_TIMEOUT_SECS: u32 = 60;
/// Size of the chunks copied out of an exec session.
const EXEC_READ_SIZE: usize = 32 * 1024;
/// How many exec chunks may be buffered before the copying task waits for the reader.
const EXEC_CHANNEL_SIZE: usize = 16;

/// The [`ClusterGateway`] backed by a `kube::Client`.
#[derive(Clone)]
pub struct KubeGateway {
    client: Client,
}

impl KubeGateway {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Create a `KubeGateway` using the default `kube::Client`.
    pub async fn try_default() -> Result<Self> {
        Ok(Self::new(
            Client::try_default()
                .await
                .context(error::InitializationSnafu)?,
        ))
    }

    /// Create a `KubeGateway` from the path to a kubeconfig file.
    pub async fn from_kubeconfig_path(kubeconfig_path: &Path) -> Result<Self> {
        let kubeconfig = Kubeconfig::read_from(kubeconfig_path).context(error::KubeconfigSnafu)?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .context(error::KubeconfigSnafu)?;
        Ok(Self::new(
            Client::try_from(config).context(error::InitializationSnafu)?,
        ))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn list_params(label_selector: Option<&str>) -> ListParams {
    match label_selector {
        Some(selector) => ListParams::default().labels(selector),
        None => ListParams::default(),
    }
}

/// Split an `apiVersion` such as `rbac.authorization.k8s.io/v1` or `v1` into group and version.
fn group_version_kind(api_version: &str, kind: &str) -> GroupVersionKind {
    match api_version.split_once('/') {
        Some((group, version)) => GroupVersionKind::gvk(group, version, kind),
        None => GroupVersionKind::gvk("", api_version, kind),
    }
}

/// Returns the pod if this is the first time its uid has been seen.
fn first_sighting(seen: &mut HashSet<String>, pod: Pod) -> Option<Pod> {
    let key = pod.uid().unwrap_or_else(|| pod.name_any());
    if seen.insert(key) {
        Some(pod)
    } else {
        None
    }
}

#[async_trait]
impl ClusterGateway for KubeGateway {
    async fn server_version(&self) -> Result<String> {
        Ok(self
            .client
            .apiserver_version()
            .await
            .context(error::KubeApiCallSnafu {
                method: "get",
                what: "server version",
            })?
            .git_version)
    }

    async fn get_namespace(&self, name: &str) -> Result<Namespace> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.get(name).await.context(error::KubeApiCallForSnafu {
            operation: "get namespace",
            name,
        })?)
    }

    async fn list_namespaces(&self, label_selector: Option<&str>) -> Result<Vec<Namespace>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api
            .list(&list_params(label_selector))
            .await
            .context(error::KubeApiCallSnafu {
                method: "list",
                what: "namespaces",
            })?
            .items)
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        api.delete(name, &DeleteParams::default())
            .await
            .context(error::KubeApiCallForSnafu {
                operation: "delete namespace",
                name,
            })?;
        Ok(())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod> {
        Ok(self
            .pods(namespace)
            .get(name)
            .await
            .context(error::KubeApiCallForSnafu {
                operation: "get pod",
                name,
            })?)
    }

    async fn list_pods(&self, namespace: &str, label_selector: Option<&str>) -> Result<Vec<Pod>> {
        Ok(self
            .pods(namespace)
            .list(&list_params(label_selector))
            .await
            .context(error::KubeApiCallForSnafu {
                operation: "list pods",
                name: namespace,
            })?
            .items)
    }

    async fn watch_added_pods(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<PodStream> {
        let mut config = watcher::Config::default().timeout(WATCH_TIMEOUT_SECS);
        if let Some(selector) = label_selector {
            config = config.labels(selector);
        }
        let namespace = namespace.to_string();
        let mut seen = HashSet::new();
        let stream = watcher(self.pods(&namespace), config)
            .map(move |event| -> Vec<Result<Pod>> {
                match event {
                    Ok(watcher::Event::Applied(pod)) => {
                        first_sighting(&mut seen, pod).into_iter().map(Ok).collect()
                    }
                    Ok(watcher::Event::Restarted(pods)) => pods
                        .into_iter()
                        .filter_map(|pod| first_sighting(&mut seen, pod))
                        .map(Ok)
                        .collect(),
                    Ok(watcher::Event::Deleted(_)) => Vec::new(),
                    Err(e) => vec![Err(e).context(error::WatchSnafu {
                        namespace: namespace.clone(),
                    })
                    .map_err(Into::into)],
                }
            })
            .flat_map(futures::stream::iter)
            .boxed();
        Ok(stream)
    }

    async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        follow: bool,
    ) -> Result<ByteStream> {
        let log_params = LogParams {
            container: Some(container.to_string()),
            follow,
            ..Default::default()
        };
        let stream = self
            .pods(namespace)
            .log_stream(pod, &log_params)
            .await
            .context(error::KubeApiCallForSnafu {
                operation: format!("stream logs of container '{}'", container),
                name: pod,
            })?
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
            .boxed();
        Ok(Box::pin(StreamReader::new(stream)))
    }

    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: &[&str],
    ) -> Result<ByteStream> {
        let command: Vec<String> = command.iter().map(|arg| arg.to_string()).collect();
        debug!("Running {:?} in {}/{}/{}", command, namespace, pod, container);
        let mut attached = self
            .pods(namespace)
            .exec(pod, command, &AttachParams::default().container(container))
            .await
            .context(error::KubeApiCallForSnafu {
                operation: "exec",
                name: pod,
            })?;
        let stdout = attached.stdout().context(error::MissingStreamSnafu {
            pod,
            what: "stdout",
        })?;
        let stderr = attached.stderr();
        let status = attached.take_status();

        let (mut tx, rx) = channel::<io::Result<Bytes>>(EXEC_CHANNEL_SIZE);
        tokio::spawn(async move {
            if let Err(e) = forward_exec_output(stdout, stderr, status, &mut tx).await {
                // The reader may already be gone, in which case nobody is left to tell.
                let _ = tx.send(Err(e)).await;
            }
            tx.close_channel();
            if let Err(e) = attached.join().await {
                trace!("exec session ended uncleanly: {}", e);
            }
        });
        Ok(Box::pin(StreamReader::new(rx)))
    }

    async fn list_cluster_roles(&self, label_selector: &str) -> Result<Vec<ClusterRole>> {
        let api: Api<ClusterRole> = Api::all(self.client.clone());
        Ok(api
            .list(&list_params(Some(label_selector)))
            .await
            .context(error::KubeApiCallSnafu {
                method: "list",
                what: "cluster roles",
            })?
            .items)
    }

    async fn list_cluster_role_bindings(
        &self,
        label_selector: &str,
    ) -> Result<Vec<ClusterRoleBinding>> {
        let api: Api<ClusterRoleBinding> = Api::all(self.client.clone());
        Ok(api
            .list(&list_params(Some(label_selector)))
            .await
            .context(error::KubeApiCallSnafu {
                method: "list",
                what: "cluster role bindings",
            })?
            .items)
    }

    async fn delete_cluster_roles(&self, label_selector: &str) -> Result<()> {
        let api: Api<ClusterRole> = Api::all(self.client.clone());
        api.delete_collection(&DeleteParams::default(), &list_params(Some(label_selector)))
            .await
            .context(error::KubeApiCallSnafu {
                method: "delete_collection",
                what: "cluster roles",
            })?;
        Ok(())
    }

    async fn delete_cluster_role_bindings(&self, label_selector: &str) -> Result<()> {
        let api: Api<ClusterRoleBinding> = Api::all(self.client.clone());
        api.delete_collection(&DeleteParams::default(), &list_params(Some(label_selector)))
            .await
            .context(error::KubeApiCallSnafu {
                method: "delete_collection",
                what: "cluster role bindings",
            })?;
        Ok(())
    }

    async fn resolve(&self, api_version: &str, kind: &str) -> Result<ResourceMapping> {
        let gvk = group_version_kind(api_version, kind);
        let (api_resource, capabilities) =
            pinned_kind(&self.client, &gvk)
                .await
                .context(error::DiscoverySnafu { api_version, kind })?;
        Ok(ResourceMapping {
            api_resource,
            namespaced: capabilities.scope == Scope::Namespaced,
        })
    }

    async fn create(
        &self,
        mapping: &ResourceMapping,
        namespace: Option<&str>,
        object: &DynamicObject,
    ) -> Result<DynamicObject> {
        let api: Api<DynamicObject> = match namespace {
            Some(namespace) => {
                Api::namespaced_with(self.client.clone(), namespace, &mapping.api_resource)
            }
            None => Api::all_with(self.client.clone(), &mapping.api_resource),
        };
        Ok(api
            .create(&PostParams::default(), object)
            .await
            .context(error::KubeApiCallForSnafu {
                operation: format!("create {}", mapping.api_resource.kind),
                name: object.name_any(),
            })?)
    }
}

/// Copy the stdout of an exec session into `tx`. Returns an error if the remote command reported
/// a failure status or wrote anything to stderr.
async fn forward_exec_output<O, E, S>(
    mut stdout: O,
    stderr: Option<E>,
    status: Option<S>,
    tx: &mut Sender<io::Result<Bytes>>,
) -> io::Result<()>
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
    S: Future<Output = Option<Status>>,
{
    let copy_stdout = async {
        let mut buf = vec![0u8; EXEC_READ_SIZE];
        loop {
            let n = stdout.read(&mut buf).await?;
            if n == 0 {
                return Ok::<_, io::Error>(());
            }
            if tx.send(Ok(Bytes::copy_from_slice(&buf[..n]))).await.is_err() {
                // The reader hung up.
                return Ok(());
            }
        }
    };
    let collect_stderr = async {
        let mut output = String::new();
        if let Some(mut stderr) = stderr {
            stderr.read_to_string(&mut output).await?;
        }
        Ok::<_, io::Error>(output)
    };
    let ((), stderr_output) = tokio::try_join!(copy_stdout, collect_stderr)?;

    if let Some(status) = status {
        if let Some(status) = status.await {
            if status.status.as_deref() == Some("Failure") {
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    format!(
                        "remote command failed: {}",
                        status.message.unwrap_or_default()
                    ),
                ));
            }
        }
    }
    if !stderr_output.trim().is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            format!("remote command wrote to stderr: {}", stderr_output.trim()),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn core_group_version_kind() {
        let gvk = group_version_kind("v1", "Namespace");
        assert_eq!(gvk.group, "");
        assert_eq!(gvk.version, "v1");
        assert_eq!(gvk.kind, "Namespace");
    }

    #[test]
    fn named_group_version_kind() {
        let gvk = group_version_kind("rbac.authorization.k8s.io/v1", "ClusterRole");
        assert_eq!(gvk.group, "rbac.authorization.k8s.io");
        assert_eq!(gvk.version, "v1");
    }
}
