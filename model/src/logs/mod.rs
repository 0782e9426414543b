/*!

Merges the logs of every container of a run into one byte stream.

Pods are discovered once (or continuously when following), one producer task reads each
container, and a single header applier serializes their chunks. Whenever the source of the next
chunk differs from the previous one a `namespace=… pod=… container=…` line is written first, so
any run of bytes between two such lines comes from one container.

!*/

mod producer;
mod reader;

pub use reader::LogReader;

use crate::clients::ClusterGateway;
use crate::constants::{DEFAULT_NAMESPACE, LABEL_PLUGIN};
use crate::error::{self, Result};
use bytes::Bytes;
use producer::{discover_pods, spawn_producers, PodSource};
use snafu::ResultExt;
use std::sync::Arc;
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tokio_util::sync::CancellationToken;

/// The amount of data a producer reads from a container at once.
pub const DEFAULT_SCRATCH_SIZE: usize = 4096;
const CHANNEL_SIZE: usize = 64;

/// Which logs to read.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub namespace: String,
    /// Only read the logs of this plugin's pods.
    pub plugin: Option<String>,
    /// Keep streaming, including pods that show up later.
    pub follow: bool,
    pub scratch_size: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            plugin: None,
            follow: false,
            scratch_size: DEFAULT_SCRATCH_SIZE,
        }
    }
}

impl LogConfig {
    fn label_selector(&self) -> Option<String> {
        self.plugin
            .as_ref()
            .map(|plugin| format!("{}={}", LABEL_PLUGIN, plugin))
    }
}

/// A chunk of one container's logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LogMessage {
    /// Identifies the container.
    pub(crate) preamble: String,
    /// A copy of what was read.
    pub(crate) data: Bytes,
}

/// Open the merged log stream described by `config`.
///
/// Listing the pods or opening the watch happens before this returns, so those failures are
/// returned directly. Later failures are reported through the reader.
pub async fn logs(gateway: Arc<dyn ClusterGateway>, config: &LogConfig) -> Result<LogReader> {
    let mut config = config.clone();
    if config.scratch_size == 0 {
        config.scratch_size = DEFAULT_SCRATCH_SIZE;
    }
    let selector = config.label_selector();
    let source = if config.follow {
        PodSource::Watched(
            gateway
                .watch_added_pods(&config.namespace, selector.as_deref())
                .await
                .context(error::ClientSnafu {
                    action: "watch pods",
                })?,
        )
    } else {
        PodSource::Listed(
            gateway
                .list_pods(&config.namespace, selector.as_deref())
                .await
                .context(error::ClientSnafu {
                    action: "list pods",
                })?,
        )
    };

    let cancel = CancellationToken::new();
    let (pods_tx, pods_rx) = channel(CHANNEL_SIZE);
    let (messages_tx, messages_rx) = channel(CHANNEL_SIZE);
    let (bytes_tx, bytes_rx) = channel(CHANNEL_SIZE);
    let (errors_tx, errors_rx) = channel(CHANNEL_SIZE);

    tokio::spawn(discover_pods(
        source,
        pods_tx,
        errors_tx.clone(),
        cancel.clone(),
    ));
    tokio::spawn(spawn_producers(
        gateway,
        config,
        pods_rx,
        messages_tx,
        errors_tx,
        cancel.clone(),
    ));
    tokio::spawn(apply_headers(messages_rx, bytes_tx, cancel.clone()));

    Ok(LogReader::from_channels(bytes_rx, errors_rx).with_drop_guard(cancel.drop_guard()))
}

/// Turn messages into raw bytes, writing a message's preamble only when it differs from the
/// previous one. Closes `bytes` once every producer is done.
pub(crate) async fn apply_headers(
    mut messages: Receiver<LogMessage>,
    bytes: Sender<Bytes>,
    cancel: CancellationToken,
) {
    let mut last_preamble: Option<String> = None;
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => return,
            message = messages.recv() => match message {
                Some(message) => message,
                None => return,
            },
        };
        if last_preamble.as_deref() != Some(message.preamble.as_str()) {
            if bytes
                .send(Bytes::from(message.preamble.clone()))
                .await
                .is_err()
            {
                return;
            }
            last_preamble = Some(message.preamble);
        }
        if bytes.send(message.data).await.is_err() {
            return;
        }
    }
}

/// Build a reader over messages sent by hand, for exercising the header applier and reader
/// together.
#[cfg(test)]
pub(crate) fn reader_over_messages(
    messages: Receiver<LogMessage>,
    errors: Receiver<crate::error::Error>,
) -> LogReader {
    let cancel = CancellationToken::new();
    let (bytes_tx, bytes_rx) = channel(CHANNEL_SIZE);
    tokio::spawn(apply_headers(messages, bytes_tx, cancel.clone()));
    LogReader::from_channels(bytes_rx, errors).with_drop_guard(cancel.drop_guard())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::Error;
    use tokio::io::AsyncReadExt;

    fn message(source: &str, data: &str) -> LogMessage {
        LogMessage {
            preamble: format!("namespace=sonobuoy pod={} container=plugin\n", source),
            data: Bytes::copy_from_slice(data.as_bytes()),
        }
    }

    #[tokio::test]
    async fn preambles_only_when_the_source_changes() {
        let (messages_tx, messages_rx) = channel(16);
        let (errors_tx, errors_rx) = channel::<Error>(1);
        for m in [
            message("a", "one "),
            message("a", "two\n"),
            message("b", "three\n"),
            message("a", "four\n"),
        ] {
            messages_tx.send(m).await.unwrap();
        }
        drop(messages_tx);
        drop(errors_tx);

        let mut reader = reader_over_messages(messages_rx, errors_rx);
        let mut out = String::new();
        reader.read_to_string(&mut out).await.unwrap();
        assert_eq!(
            out,
            "namespace=sonobuoy pod=a container=plugin\n\
            one two\n\
            namespace=sonobuoy pod=b container=plugin\n\
            three\n\
            namespace=sonobuoy pod=a container=plugin\n\
            four\n"
        );
    }

    #[test]
    fn plugin_selector() {
        let config = LogConfig {
            plugin: Some("e2e".to_string()),
            ..Default::default()
        };
        assert_eq!(config.label_selector().as_deref(), Some("sonobuoy-plugin=e2e"));
        assert_eq!(LogConfig::default().label_selector(), None);
    }
}
