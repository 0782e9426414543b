use crate::error::{self, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use snafu::ResultExt;
use sonobuoy_model::clients::ClusterGateway;
use std::sync::Arc;

/// The name of the worker's container in every plugin pod.
pub const WORKER_CONTAINER: &str = "sonobuoy-worker";

/// Tells the worker whether the plugin it sits next to is finished.
#[async_trait]
pub trait ContainerMonitor: Send + Sync {
    /// `true` once every other container of the pod has exited with code 0.
    async fn others_succeeded(&self) -> Result<bool>;
}

/// Used when the worker does not know its own pod. The plugin has to write the done file.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMonitor;

#[async_trait]
impl ContainerMonitor for NoMonitor {
    async fn others_succeeded(&self) -> Result<bool> {
        Ok(false)
    }
}

/// Reads the worker's own pod from the cluster.
pub struct PodMonitor {
    gateway: Arc<dyn ClusterGateway>,
    namespace: String,
    pod: String,
}

impl PodMonitor {
    pub fn new<S1, S2>(gateway: Arc<dyn ClusterGateway>, namespace: S1, pod: S2) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        Self {
            gateway,
            namespace: namespace.into(),
            pod: pod.into(),
        }
    }
}

#[async_trait]
impl ContainerMonitor for PodMonitor {
    async fn others_succeeded(&self) -> Result<bool> {
        let pod = self
            .gateway
            .get_pod(&self.namespace, &self.pod)
            .await
            .context(error::MonitorSnafu)?;
        Ok(other_containers_succeeded(&pod, WORKER_CONTAINER))
    }
}

/// `true` when every container but `own` has terminated with exit code 0. A pod with no other
/// container never counts as finished.
pub fn other_containers_succeeded(pod: &Pod, own: &str) -> bool {
    let statuses: Vec<_> = pod
        .status
        .iter()
        .flat_map(|status| status.container_statuses.iter().flatten())
        .filter(|status| status.name != own)
        .collect();
    !statuses.is_empty()
        && statuses.iter().all(|status| {
            status
                .state
                .as_ref()
                .and_then(|state| state.terminated.as_ref())
                .map(|terminated| terminated.exit_code == 0)
                .unwrap_or(false)
        })
}

#[cfg(test)]
mod test {
    use super::*;
    use k8s_openapi::api::core::v1::{
        ContainerState, ContainerStateRunning, ContainerStateTerminated, ContainerStatus,
        PodStatus,
    };

    fn status(name: &str, state: ContainerState) -> ContainerStatus {
        ContainerStatus {
            name: name.to_string(),
            state: Some(state),
            ..Default::default()
        }
    }

    fn terminated(exit_code: i32) -> ContainerState {
        ContainerState {
            terminated: Some(ContainerStateTerminated {
                exit_code,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn pod_with(statuses: Vec<ContainerStatus>) -> Pod {
        Pod {
            status: Some(PodStatus {
                container_statuses: Some(statuses),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn finished_plugins() {
        let running = ContainerState {
            running: Some(ContainerStateRunning::default()),
            ..Default::default()
        };
        assert!(other_containers_succeeded(
            &pod_with(vec![
                status("e2e", terminated(0)),
                status(WORKER_CONTAINER, running.clone()),
            ]),
            WORKER_CONTAINER
        ));
        assert!(!other_containers_succeeded(
            &pod_with(vec![
                status("e2e", terminated(1)),
                status(WORKER_CONTAINER, running.clone()),
            ]),
            WORKER_CONTAINER
        ));
        assert!(!other_containers_succeeded(
            &pod_with(vec![
                status("e2e", running.clone()),
                status(WORKER_CONTAINER, running.clone()),
            ]),
            WORKER_CONTAINER
        ));
        assert!(!other_containers_succeeded(
            &pod_with(vec![status(WORKER_CONTAINER, running)]),
            WORKER_CONTAINER
        ));
    }
}
