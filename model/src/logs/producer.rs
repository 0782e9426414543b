use super::{LogConfig, LogMessage};
use crate::clients::{ClusterGateway, PodStream};
use crate::error::Error;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use log::{debug, trace};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio_util::sync::CancellationToken;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(32);

/// Where the pods whose logs are read come from.
pub(super) enum PodSource {
    /// A fixed set, listed once.
    Listed(Vec<Pod>),
    /// Every pod the watch reports, for as long as it runs.
    Watched(PodStream),
}

/// Send each discovered pod to `pods`. A watch failure is sent to `errors` and ends discovery.
pub(super) async fn discover_pods(
    source: PodSource,
    pods: Sender<Pod>,
    errors: Sender<Error>,
    cancel: CancellationToken,
) {
    match source {
        PodSource::Listed(list) => {
            for pod in list {
                if pods.send(pod).await.is_err() {
                    return;
                }
            }
        }
        PodSource::Watched(mut stream) => loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return,
                next = stream.next() => next,
            };
            match next {
                None => return,
                Some(Ok(pod)) => {
                    if pods.send(pod).await.is_err() {
                        return;
                    }
                }
                Some(Err(source)) => {
                    let _ = errors
                        .send(Error::Client {
                            action: "watch for new pods".to_string(),
                            source,
                        })
                        .await;
                    return;
                }
            }
        },
    }
}

/// Start one producer per container of each pod received on `pods`. The message and error
/// senders are cloned into the producers, so both channels close once discovery is over and the
/// last producer returns.
pub(super) async fn spawn_producers(
    gateway: Arc<dyn ClusterGateway>,
    config: LogConfig,
    mut pods: Receiver<Pod>,
    messages: Sender<LogMessage>,
    errors: Sender<Error>,
    cancel: CancellationToken,
) {
    loop {
        let pod = tokio::select! {
            _ = cancel.cancelled() => return,
            pod = pods.recv() => match pod {
                Some(pod) => pod,
                None => return,
            },
        };
        let containers: Vec<String> = pod
            .spec
            .iter()
            .flat_map(|spec| spec.containers.iter())
            .map(|container| container.name.clone())
            .collect();
        for container in containers {
            let producer = ContainerProducer {
                gateway: Arc::clone(&gateway),
                namespace: config.namespace.clone(),
                pod: pod.name_any(),
                container,
                follow: config.follow,
                scratch_size: config.scratch_size,
            };
            debug!("Reading logs of {}/{}", producer.pod, producer.container);
            tokio::spawn(producer.run(messages.clone(), errors.clone(), cancel.clone()));
        }
    }
}

/// Reads the logs of a single container.
struct ContainerProducer {
    gateway: Arc<dyn ClusterGateway>,
    namespace: String,
    pod: String,
    container: String,
    follow: bool,
    scratch_size: usize,
}

impl ContainerProducer {
    fn preamble(&self) -> String {
        format!(
            "namespace={} pod={} container={}\n",
            self.namespace, self.pod, self.container
        )
    }

    async fn run(
        self,
        messages: Sender<LogMessage>,
        errors: Sender<Error>,
        cancel: CancellationToken,
    ) {
        let result = tokio::select! {
            _ = cancel.cancelled() => Ok(()),
            result = self.stream(&messages) => result,
        };
        if let Err(e) = result {
            let _ = errors.send(e).await;
        }
    }

    async fn stream(&self, messages: &Sender<LogMessage>) -> Result<(), Error> {
        if self.follow {
            self.wait_until_started().await?;
        }
        let mut logs = self
            .gateway
            .pod_logs(&self.namespace, &self.pod, &self.container, self.follow)
            .await
            .map_err(|source| Error::Client {
                action: format!("open logs of {}/{}", self.pod, self.container),
                source,
            })?;
        let preamble = self.preamble();
        let mut scratch = vec![0u8; self.scratch_size];
        loop {
            let n = logs
                .read(&mut scratch)
                .await
                .map_err(|source| Error::LogRead {
                    pod: self.pod.clone(),
                    container: self.container.clone(),
                    source,
                })?;
            if n == 0 {
                trace!("Logs of {}/{} ended", self.pod, self.container);
                return Ok(());
            }
            let message = LogMessage {
                preamble: preamble.clone(),
                data: bytes::Bytes::copy_from_slice(&scratch[..n]),
            };
            if messages.send(message).await.is_err() {
                // Nobody is reading anymore.
                return Ok(());
            }
        }
    }

    /// Logs can only be followed once the container has started. Poll with exponential backoff
    /// until it is running, or has already finished.
    async fn wait_until_started(&self) -> Result<(), Error> {
        let mut backoff = INITIAL_BACKOFF;
        loop {
            let pod = self
                .gateway
                .get_pod(&self.namespace, &self.pod)
                .await
                .map_err(|source| Error::Client {
                    action: format!("get pod {}", self.pod),
                    source,
                })?;
            if container_started(&pod, &self.container) {
                return Ok(());
            }
            trace!(
                "Container {}/{} is not running yet, checking again in {:?}",
                self.pod,
                self.container,
                backoff
            );
            tokio::time::sleep(backoff).await;
            backoff = next_backoff(backoff);
        }
    }
}

pub(super) fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(MAX_BACKOFF)
}

fn container_started(pod: &Pod, container: &str) -> bool {
    pod.status
        .iter()
        .flat_map(|status| status.container_statuses.iter().flatten())
        .filter(|status| status.name == container)
        .filter_map(|status| status.state.as_ref())
        .any(|state| state.running.is_some() || state.terminated.is_some())
}
