use crate::error::{self, Result};
use serde::Deserialize;
use snafu::{ensure, ResultExt};
use sonobuoy_model::constants::{DONE_FILE_NAME, PLUGIN_RESULTS_DIR, PROGRESS_PORT};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_DONE_FILE_DELAY_SECS: u64 = 5;

/// The worker's settings, read from the environment the aggregator gives the plugin pod.
///
/// # Example
///
/// ```text
/// RESULTS_DIR=/tmp/sonobuoy/results
/// AGGREGATOR_URL=https://10.0.0.12:8080
/// NODE_NAME=node-1
/// PLUGIN_NAME=e2e
/// RESULT_TYPE=e2e
/// SONOBUOY_PROGRESS_PORT=8099
/// SONOBUOY_DONE_FILE_DELAY=5
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Where the plugin writes its results and the done file.
    #[serde(default = "results_dir")]
    pub results_dir: PathBuf,

    /// The base URL of the aggregator, e.g. `https://10.0.0.12:8080`.
    pub aggregator_url: String,

    /// Only required for `single-node` plugins.
    #[serde(default)]
    pub node_name: String,

    pub plugin_name: String,

    /// The name results are reported under. Defaults to `plugin_name`.
    #[serde(default)]
    pub result_type: String,

    #[serde(default = "progress_port", rename = "sonobuoy_progress_port")]
    pub progress_port: u16,

    /// Seconds to wait after the done file shows up before uploading.
    #[serde(
        default = "done_file_delay",
        rename = "sonobuoy_done_file_delay"
    )]
    pub done_file_delay_secs: u64,

    /// The worker's own pod, used to tell when the plugin container has exited.
    #[serde(default)]
    pub pod_name: Option<String>,

    #[serde(default)]
    pub pod_namespace: Option<String>,
}

fn results_dir() -> PathBuf {
    PathBuf::from(PLUGIN_RESULTS_DIR)
}

fn progress_port() -> u16 {
    PROGRESS_PORT
}

fn done_file_delay() -> u64 {
    DEFAULT_DONE_FILE_DELAY_SECS
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self> {
        envy::from_env::<Self>()
            .context(error::ConfigSnafu)?
            .validated()
    }

    /// Check the settings and fill in defaults that depend on other settings.
    pub fn validated(mut self) -> Result<Self> {
        ensure!(
            !self.aggregator_url.trim().is_empty(),
            error::InvalidConfigSnafu {
                reason: "AGGREGATOR_URL must not be empty"
            }
        );
        ensure!(
            !self.plugin_name.trim().is_empty(),
            error::InvalidConfigSnafu {
                reason: "PLUGIN_NAME must not be empty"
            }
        );
        if self.result_type.is_empty() {
            self.result_type = self.plugin_name.clone();
        }
        self.aggregator_url = self.aggregator_url.trim_end_matches('/').to_string();
        Ok(self)
    }

    pub fn done_file(&self) -> PathBuf {
        self.results_dir.join(DONE_FILE_NAME)
    }

    pub fn done_file_delay(&self) -> Duration {
        Duration::from_secs(self.done_file_delay_secs)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<WorkerConfig> {
        envy::from_iter::<_, WorkerConfig>(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string())),
        )
        .context(error::ConfigSnafu)?
        .validated()
    }

    #[test]
    fn defaults() {
        let config = from_pairs(&[
            ("AGGREGATOR_URL", "https://10.0.0.12:8080/"),
            ("PLUGIN_NAME", "e2e"),
        ])
        .unwrap();
        assert_eq!(config.results_dir, PathBuf::from("/tmp/sonobuoy/results"));
        assert_eq!(config.aggregator_url, "https://10.0.0.12:8080");
        assert_eq!(config.result_type, "e2e");
        assert_eq!(config.progress_port, 8099);
        assert_eq!(config.done_file_delay(), Duration::from_secs(5));
        assert_eq!(config.done_file(), PathBuf::from("/tmp/sonobuoy/results/done"));
    }

    #[test]
    fn overrides() {
        let config = from_pairs(&[
            ("AGGREGATOR_URL", "https://10.0.0.12:8080"),
            ("PLUGIN_NAME", "systemd-logs"),
            ("RESULT_TYPE", "logs"),
            ("NODE_NAME", "node-1"),
            ("SONOBUOY_PROGRESS_PORT", "9000"),
            ("SONOBUOY_DONE_FILE_DELAY", "0"),
        ])
        .unwrap();
        assert_eq!(config.result_type, "logs");
        assert_eq!(config.node_name, "node-1");
        assert_eq!(config.progress_port, 9000);
        assert_eq!(config.done_file_delay(), Duration::ZERO);
    }

    #[test]
    fn required_settings() {
        assert!(from_pairs(&[("PLUGIN_NAME", "e2e")]).is_err());
        assert!(from_pairs(&[("AGGREGATOR_URL", "https://x"), ("PLUGIN_NAME", " ")]).is_err());
    }
}
