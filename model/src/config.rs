use crate::constants::{DEFAULT_AGGREGATOR_IMAGE, DEFAULT_NAMESPACE, RUN_POLL_INTERVAL};
use crate::error::{self, Result};
use crate::output::WaitOutputMode;
use crate::plugin::{Plugin, PluginTransform};
use crate::preflight::PreflightConfig;
use crate::version::KubeVersion;
use regex::Regex;
use std::collections::BTreeMap;
use std::time::Duration;

/// Kubernetes namespaces are DNS-1123 labels.
const NAMESPACE_MAX_LEN: usize = 63;

lazy_static::lazy_static! {
    static ref DNS_1123_LABEL: Regex = {
        #[allow(clippy::unwrap_used)]
        Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").unwrap()
    };
}

/// Everything needed to render the resources of a run.
#[derive(Debug, Clone)]
pub struct GenConfig {
    pub namespace: String,
    pub aggregator_image: String,
    pub image_pull_policy: Option<String>,
    /// Create the cluster role and binding the aggregator needs.
    pub enable_rbac: bool,
    /// The cluster version handed to plugins. When `None` the run uses the server's version.
    pub kube_version: Option<KubeVersion>,
    /// How long the aggregator waits for plugin results before giving up.
    pub aggregator_timeout: Duration,
    pub plugins: Vec<Plugin>,
    /// Plugin name to environment overrides. An empty value removes the variable.
    pub env_overrides: BTreeMap<String, BTreeMap<String, String>>,
    /// Plugin name to the functions applied to it, in order.
    pub transforms: BTreeMap<String, Vec<PluginTransform>>,
}

impl Default for GenConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            aggregator_image: DEFAULT_AGGREGATOR_IMAGE.to_string(),
            image_pull_policy: None,
            enable_rbac: true,
            kube_version: None,
            aggregator_timeout: Duration::from_secs(6 * 60 * 60),
            plugins: Vec::new(),
            env_overrides: BTreeMap::new(),
            transforms: BTreeMap::new(),
        }
    }
}

impl GenConfig {
    pub fn validate(&self) -> Result<()> {
        validate_namespace(&self.namespace)?;
        if self.aggregator_image.trim().is_empty() {
            return error::InvalidConfigSnafu {
                reason: "the aggregator image must not be empty",
            }
            .fail();
        }
        if self.plugins.is_empty() {
            return error::InvalidConfigSnafu {
                reason: "at least one plugin is required",
            }
            .fail();
        }
        Ok(())
    }
}

/// The configuration of a single `run` invocation.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub gen: GenConfig,
    /// Pre-rendered manifest bytes. When present they are applied instead of generating one.
    pub manifest: Option<Vec<u8>>,
    /// `None` skips the preflight checks.
    pub preflight: Option<PreflightConfig>,
    /// How long to wait for the run to finish. `None` or zero returns right after apply.
    pub wait: Option<Duration>,
    pub wait_output: WaitOutputMode,
    pub poll_interval: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            gen: GenConfig::default(),
            manifest: None,
            preflight: Some(PreflightConfig::default()),
            wait: None,
            wait_output: WaitOutputMode::default(),
            poll_interval: RUN_POLL_INTERVAL,
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<()> {
        if self.manifest.is_none() {
            self.gen.validate()?;
        } else {
            validate_namespace(&self.gen.namespace)?;
        }
        if self.poll_interval.is_zero() {
            return error::InvalidConfigSnafu {
                reason: "the poll interval must be greater than zero",
            }
            .fail();
        }
        if let Some(preflight) = &self.preflight {
            if preflight.namespace != self.gen.namespace {
                return error::InvalidConfigSnafu {
                    reason: format!(
                        "the preflight namespace '{}' does not match the run namespace '{}'",
                        preflight.namespace, self.gen.namespace
                    ),
                }
                .fail();
            }
        }
        Ok(())
    }

    /// The wait duration, if the run should wait at all.
    pub fn wait_duration(&self) -> Option<Duration> {
        self.wait.filter(|wait| !wait.is_zero())
    }
}

pub fn validate_namespace(namespace: &str) -> Result<()> {
    if namespace.len() > NAMESPACE_MAX_LEN || !DNS_1123_LABEL.is_match(namespace) {
        return error::InvalidConfigSnafu {
            reason: format!(
                "'{}' is not a valid namespace name, it must be a lowercase RFC 1123 label",
                namespace
            ),
        }
        .fail();
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::plugin::systemd_logs_plugin;

    #[test]
    fn namespace_names() {
        validate_namespace("sonobuoy").unwrap();
        validate_namespace("a-1").unwrap();
        assert!(validate_namespace("").is_err());
        assert!(validate_namespace("Sonobuoy").is_err());
        assert!(validate_namespace("-leading").is_err());
        assert!(validate_namespace(&"a".repeat(64)).is_err());
    }

    #[test]
    fn run_config_requires_plugins_without_manifest() {
        let config = RunConfig::default();
        assert!(config.validate().is_err());

        let mut config = RunConfig::default();
        config.gen.plugins.push(systemd_logs_plugin(None));
        config.validate().unwrap();

        let config = RunConfig {
            manifest: Some(b"kind: Namespace".to_vec()),
            ..Default::default()
        };
        config.validate().unwrap();
    }

    #[test]
    fn zero_wait_means_no_wait() {
        let config = RunConfig {
            wait: Some(Duration::ZERO),
            ..Default::default()
        };
        assert_eq!(config.wait_duration(), None);
    }
}
