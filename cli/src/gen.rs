use crate::duration::parse_duration;
use anyhow::{Context, Result};
use clap::{Args, Parser};
use sonobuoy_model::constants::{DEFAULT_AGGREGATOR_IMAGE, DEFAULT_NAMESPACE};
use sonobuoy_model::{
    e2e_plugin, focus_regex, group_env_overrides, systemd_logs_plugin, E2eMode, EnvOverride,
    GenConfig, KubeVersion, Plugin,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

const E2E: &str = "e2e";
const SYSTEMD_LOGS: &str = "systemd-logs";

/// The options that describe what a run is made of. Shared by `gen` and `run`.
#[derive(Debug, Args)]
pub(crate) struct GenArgs {
    /// The namespace the run is created in.
    #[clap(long, short = 'n', default_value = DEFAULT_NAMESPACE)]
    pub(crate) namespace: String,

    /// A built-in plugin to run [e2e|systemd-logs]. Can be repeated. When neither this nor
    /// `--plugin-file` is given, both built-in plugins run.
    #[clap(long = "plugin", short = 'p')]
    plugins: Vec<String>,

    /// A plugin definition file to run. Can be repeated.
    #[clap(long = "plugin-file")]
    plugin_files: Vec<PathBuf>,

    /// The e2e test selection [non-disruptive-conformance|conformance-lite|certified-conformance|quick].
    #[clap(long, default_value = "non-disruptive-conformance")]
    mode: E2eMode,

    /// Run the e2e tests matching this regular expression instead of the mode's selection.
    #[clap(long = "e2e-focus", conflicts_with = "e2e-focus-from")]
    e2e_focus: Option<String>,

    /// Run exactly the e2e tests named in this file, one per line.
    #[clap(long = "e2e-focus-from")]
    e2e_focus_from: Option<PathBuf>,

    /// Override the conformance image of the e2e plugin.
    #[clap(long = "e2e-image")]
    e2e_image: Option<String>,

    /// Override the image of the systemd-logs plugin.
    #[clap(long = "systemd-logs-image")]
    systemd_logs_image: Option<String>,

    /// The aggregator image.
    #[clap(long = "aggregator-image", default_value = DEFAULT_AGGREGATOR_IMAGE)]
    aggregator_image: String,

    /// The image pull policy of the aggregator.
    #[clap(long = "image-pull-policy")]
    image_pull_policy: Option<String>,

    /// Do not create the cluster role and binding of the aggregator.
    #[clap(long = "disable-rbac")]
    disable_rbac: bool,

    /// Set an environment variable of a plugin, `plugin.KEY=VALUE`. An empty value removes the
    /// variable. Can be repeated.
    #[clap(long = "plugin-env")]
    plugin_env: Vec<EnvOverride>,

    /// The Kubernetes version plugins are told they test. `run` asks the cluster when absent.
    #[clap(long = "kubernetes-version")]
    pub(crate) kubernetes_version: Option<KubeVersion>,

    /// How long the aggregator waits for results, e.g. `6h`.
    #[clap(long = "aggregator-timeout", parse(try_from_str = parse_duration))]
    aggregator_timeout: Option<Duration>,
}

impl GenArgs {
    /// Build the generation config for a cluster running `kube_version`.
    pub(crate) fn gen_config(&self, kube_version: KubeVersion) -> Result<GenConfig> {
        let mut config = GenConfig {
            namespace: self.namespace.clone(),
            aggregator_image: self.aggregator_image.clone(),
            image_pull_policy: self.image_pull_policy.clone(),
            enable_rbac: !self.disable_rbac,
            kube_version: Some(kube_version),
            plugins: self.plugins(kube_version)?,
            env_overrides: group_env_overrides(self.plugin_env.iter().cloned()),
            ..Default::default()
        };
        if let Some(timeout) = self.aggregator_timeout {
            config.aggregator_timeout = timeout;
        }
        Ok(config)
    }

    fn plugins(&self, kube_version: KubeVersion) -> Result<Vec<Plugin>> {
        let mut names = self.plugins.clone();
        if names.is_empty() && self.plugin_files.is_empty() {
            names = vec![E2E.to_string(), SYSTEMD_LOGS.to_string()];
        }
        let mut plugins = Vec::new();
        for name in &names {
            match name.as_str() {
                E2E => plugins.push(e2e_plugin(
                    self.mode,
                    &kube_version,
                    self.e2e_image.clone(),
                    self.focus()?,
                )),
                SYSTEMD_LOGS => plugins.push(systemd_logs_plugin(self.systemd_logs_image.clone())),
                other => anyhow::bail!(
                    "Unknown plugin '{}', use --plugin-file to run a plugin definition",
                    other
                ),
            }
        }
        for path in &self.plugin_files {
            plugins.push(read_plugin(path)?);
        }
        Ok(plugins)
    }

    fn focus(&self) -> Result<Option<String>> {
        match (&self.e2e_focus, &self.e2e_focus_from) {
            (Some(focus), _) => Ok(Some(focus.clone())),
            (None, Some(path)) => {
                let names = std::fs::read_to_string(path).context(format!(
                    "Unable to read test names from '{}'",
                    path.display()
                ))?;
                let names: Vec<&str> = names
                    .lines()
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .collect();
                anyhow::ensure!(!names.is_empty(), "'{}' names no tests", path.display());
                Ok(Some(focus_regex(names)))
            }
            (None, None) => Ok(None),
        }
    }
}

fn read_plugin(path: &Path) -> Result<Plugin> {
    let yaml = std::fs::read_to_string(path)
        .context(format!("Unable to read plugin file '{}'", path.display()))?;
    Plugin::from_yaml(&yaml).context(format!("Unable to parse plugin file '{}'", path.display()))
}

/// Print the manifest of a run.
#[derive(Debug, Parser)]
pub(crate) struct Gen {
    #[clap(flatten)]
    gen: GenArgs,
}

impl Gen {
    pub(crate) fn run(self) -> Result<()> {
        let kube_version = self
            .gen
            .kubernetes_version
            .context("--kubernetes-version is required to generate a manifest offline")?;
        let config = self.gen.gen_config(kube_version)?;
        let manifest =
            sonobuoy_model::generate_manifest(&config).context("Unable to generate manifest")?;
        let mut stdout = std::io::stdout();
        stdout
            .write_all(&manifest)
            .context("Unable to write manifest")?;
        stdout.flush().context("Unable to write manifest")?;
        Ok(())
    }
}
