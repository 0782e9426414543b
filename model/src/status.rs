use crate::constants::STATUS_ANNOTATION;
use crate::error::{self, Result};
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use serde_plain::derive_display_from_serialize;
use snafu::{OptionExt, ResultExt};
use std::collections::BTreeMap;
use tabled::{Style, Table, Tabled};

/// The overall state of a run, as written by the aggregator.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    Running,
    PostProcessing,
    Complete,
    Failed,
    #[serde(other)]
    Unknown,
}

derive_display_from_serialize!(RunStatus);

impl Default for RunStatus {
    fn default() -> Self {
        Self::Unknown
    }
}

impl RunStatus {
    /// Once a run reaches a terminal status it never leaves it.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Complete | RunStatus::Failed)
    }
}

/// Progress a plugin reports through the progress relay.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressUpdate {
    pub name: String,
    pub node: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub msg: String,
    pub total: i64,
    pub completed: i64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<String>,
}

/// The status of one plugin on one node.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PluginStatus {
    pub plugin: String,
    pub node: String,
    pub status: String,
    pub result_status: String,
    pub result_counts: Option<BTreeMap<String, i64>>,
    pub progress: Option<ProgressUpdate>,
}

/// The JSON document the aggregator keeps in its pod's status annotation.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorStatus {
    pub plugins: Vec<PluginStatus>,
    pub status: RunStatus,
}

impl AggregatorStatus {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context(error::StatusParseSnafu)
    }

    /// Read the status annotation of the aggregator pod. `None` when the aggregator has not
    /// written one yet.
    pub fn from_pod(pod: &Pod) -> Option<Result<Self>> {
        pod.annotations()
            .get(STATUS_ANNOTATION)
            .map(|json| Self::from_json(json))
    }

    /// Like `from_pod` but a missing annotation is an error.
    pub fn require_from_pod(pod: &Pod) -> Result<Self> {
        Self::from_pod(pod).context(error::StatusMissingSnafu)?
    }

    /// A multi-line summary used for progress output. Each plugin gets its own line so that
    /// unchanged plugins can be deduplicated between ticks.
    pub fn summary(&self) -> String {
        let mut lines = vec![format!("Run status: {}", self.status)];
        for plugin in &self.plugins {
            let mut line = format!("{} on {}: {}", plugin.plugin, plugin.node, plugin.status);
            if !plugin.result_status.is_empty() {
                line.push_str(&format!(", result {}", plugin.result_status));
            }
            if let Some(progress) = &plugin.progress {
                line.push_str(&format!(", {}", progress_text(progress)));
            }
            lines.push(line);
        }
        lines.join("\n")
    }

    /// A table with one row per plugin and node.
    pub fn to_table(&self) -> String {
        let rows: Vec<StatusRow> = self.plugins.iter().map(StatusRow::from).collect();
        Table::new(rows).with(Style::blank()).to_string()
    }
}

fn progress_text(progress: &ProgressUpdate) -> String {
    let mut text = if progress.total > 0 {
        format!("{}/{}", progress.completed, progress.total)
    } else {
        format!("{} completed", progress.completed)
    };
    if !progress.failures.is_empty() {
        text.push_str(&format!(" ({} failures)", progress.failures.len()));
    }
    if !progress.msg.is_empty() {
        text.push_str(&format!(" {}", progress.msg));
    }
    text
}

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "PLUGIN")]
    plugin: String,
    #[tabled(rename = "NODE")]
    node: String,
    #[tabled(rename = "STATUS")]
    status: String,
    #[tabled(rename = "RESULT")]
    result: String,
    #[tabled(rename = "PROGRESS")]
    progress: String,
}

impl From<&PluginStatus> for StatusRow {
    fn from(status: &PluginStatus) -> Self {
        Self {
            plugin: status.plugin.clone(),
            node: status.node.clone(),
            status: status.status.clone(),
            result: status.result_status.clone(),
            progress: status
                .progress
                .as_ref()
                .map(progress_text)
                .unwrap_or_default(),
        }
    }
}

/// Describe a pod that has no status annotation yet, e.g. because its image is still being
/// pulled.
pub fn pod_status_message(pod: &Pod) -> String {
    let name = pod.name_any();
    let status = match &pod.status {
        Some(status) => status,
        None => return format!("Pod {} has no status yet", name),
    };
    let mut message = format!(
        "Pod {} is {}",
        name,
        status.phase.as_deref().unwrap_or("Unknown")
    );
    for condition in status.conditions.iter().flatten() {
        if condition.status == "True" {
            continue;
        }
        message.push_str(&format!("; {}", condition.type_));
        if let Some(reason) = &condition.reason {
            message.push_str(&format!(": {}", reason));
        }
        if let Some(condition_message) = &condition.message {
            message.push_str(&format!(" ({})", condition_message));
        }
        if condition.reason.as_deref() != Some("ContainersNotReady") {
            continue;
        }
        for container in status.container_statuses.iter().flatten() {
            let state = match &container.state {
                Some(state) => state,
                None => continue,
            };
            if let Some(waiting) = &state.waiting {
                message.push_str(&format!(
                    "; container {} waiting: {} {}",
                    container.name,
                    waiting.reason.as_deref().unwrap_or_default(),
                    waiting.message.as_deref().unwrap_or_default()
                ));
            } else if let Some(terminated) = &state.terminated {
                message.push_str(&format!(
                    "; container {} terminated: {} {}",
                    container.name,
                    terminated.reason.as_deref().unwrap_or_default(),
                    terminated.message.as_deref().unwrap_or_default()
                ));
            }
        }
    }
    message.trim_end().to_string()
}
