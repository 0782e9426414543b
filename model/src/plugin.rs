use crate::config::GenConfig;
use crate::constants::{
    DEFAULT_CONFORMANCE_IMAGE_REPO, DEFAULT_SYSTEMD_LOGS_IMAGE, ENV_CONFIG_DIR, ENV_K8S_VERSION,
    ENV_MARKER, ENV_PROGRESS_PORT, ENV_RESULTS_DIR, PLUGIN_CONFIG_DIR, PLUGIN_RESULTS_DIR,
    PROGRESS_PORT,
};
use crate::error::{self, Result};
use crate::version::KubeVersion;
use k8s_openapi::api::core::v1::{
    Container, EnvVar, EnvVarSource, HostPathVolumeSource, ObjectFieldSelector, PodSpec,
    SecurityContext, Volume, VolumeMount,
};
use serde::{Deserialize, Serialize};
use serde_plain::{derive_display_from_serialize, derive_fromstr_from_deserialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt::{Debug, Formatter};
use std::str::FromStr;
use std::sync::Arc;

/// The characters that have a special meaning in a regular expression.
const REGEX_METACHARACTERS: &str = r"\.+*?()|[]{}^$";

/// How the aggregator schedules a plugin.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Driver {
    /// A single pod for the whole cluster.
    Job,
    /// One pod per node.
    DaemonSet,
}

derive_display_from_serialize!(Driver);
derive_fromstr_from_deserialize!(Driver);

/// The `sonobuoy-config` block of a plugin definition.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PluginConfig {
    pub driver: Driver,
    pub plugin_name: String,
    /// How the aggregator should interpret the results, e.g. `junit` or `raw`.
    pub result_format: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub result_files: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skip_cleanup: bool,
}

/// A plugin definition, in the same shape as the YAML files that users write.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Plugin {
    #[serde(rename = "sonobuoy-config")]
    pub config: PluginConfig,
    /// The plugin's main container.
    pub spec: Container,
    #[serde(rename = "podSpec", default, skip_serializing_if = "Option::is_none")]
    pub pod_spec: Option<PodSpec>,
    #[serde(rename = "extra-volumes", default, skip_serializing_if = "Vec::is_empty")]
    pub extra_volumes: Vec<Volume>,
    /// Files (name to contents) that are mounted into the plugin's config directory.
    #[serde(rename = "config-map", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config_map: BTreeMap<String, String>,
}

impl Plugin {
    pub fn new<S1, S2>(name: S1, driver: Driver, result_format: S2, spec: Container) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        Self {
            config: PluginConfig {
                driver,
                plugin_name: name.into(),
                result_format: result_format.into(),
                result_files: Vec::new(),
                skip_cleanup: false,
            },
            spec,
            pod_spec: None,
            extra_volumes: Vec::new(),
            config_map: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.plugin_name
    }

    /// The value of an environment variable of the main container, if it is set to a literal.
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.spec
            .env
            .as_ref()?
            .iter()
            .find(|env| env.name == key)
            .and_then(|env| env.value.as_deref())
    }

    /// Set an environment variable on the main container, replacing any previous definition.
    pub fn set_env<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        let key = key.into();
        let value = value.into();
        let env = self.spec.env.get_or_insert_with(Vec::new);
        match env.iter_mut().find(|env| env.name == key) {
            Some(existing) => {
                existing.value = Some(value);
                existing.value_from = None;
            }
            None => env.push(EnvVar {
                name: key,
                value: Some(value),
                value_from: None,
            }),
        }
    }

    pub fn remove_env(&mut self, key: &str) {
        if let Some(env) = self.spec.env.as_mut() {
            env.retain(|env| env.name != key);
        }
    }

    /// Parse a plugin definition from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| error::Error::InvalidConfig {
            reason: format!("unable to parse plugin definition: {}", e),
        })
    }
}

/// A function applied to a plugin after all environment handling is done. Transforms for the same
/// plugin run in the order they were given.
#[derive(Clone)]
pub struct PluginTransform(Arc<dyn Fn(Plugin) -> Plugin + Send + Sync>);

impl PluginTransform {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Plugin) -> Plugin + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn apply(&self, plugin: Plugin) -> Plugin {
        (self.0)(plugin)
    }
}

impl Debug for PluginTransform {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("PluginTransform")
    }
}

/// A user provided environment override in the form `plugin.KEY=VALUE`. An empty value removes
/// the variable.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EnvOverride {
    pub plugin: String,
    pub key: String,
    pub value: String,
}

impl FromStr for EnvOverride {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (name, value) = s
            .split_once('=')
            .ok_or_else(|| format!("expected 'plugin.KEY=VALUE' but got '{}'", s))?;
        let (plugin, key) = name
            .split_once('.')
            .ok_or_else(|| format!("expected 'plugin.KEY=VALUE' but got '{}'", s))?;
        if plugin.is_empty() || key.is_empty() {
            return Err(format!("expected 'plugin.KEY=VALUE' but got '{}'", s));
        }
        Ok(Self {
            plugin: plugin.to_string(),
            key: key.to_string(),
            value: value.to_string(),
        })
    }
}

/// Group overrides by plugin, later values for the same key win.
pub fn group_env_overrides<I>(overrides: I) -> BTreeMap<String, BTreeMap<String, String>>
where
    I: IntoIterator<Item = EnvOverride>,
{
    let mut grouped: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
    for o in overrides {
        grouped.entry(o.plugin).or_default().insert(o.key, o.value);
    }
    grouped
}

/// The environment every plugin receives before user overrides are applied.
fn canonical_env(kube_version: Option<&KubeVersion>) -> Vec<(&'static str, String)> {
    vec![
        (ENV_MARKER, "true".to_string()),
        (
            ENV_K8S_VERSION,
            kube_version.map(|v| v.with_v()).unwrap_or_default(),
        ),
        (ENV_RESULTS_DIR, PLUGIN_RESULTS_DIR.to_string()),
        (ENV_PROGRESS_PORT, PROGRESS_PORT.to_string()),
        (ENV_CONFIG_DIR, PLUGIN_CONFIG_DIR.to_string()),
    ]
}

/// Prepare the plugins of a run: inject the canonical environment, apply the user's environment
/// overrides, then run each plugin's transforms.
pub fn prepare_plugins(config: &GenConfig) -> Result<Vec<Plugin>> {
    let mut names = HashSet::new();
    for plugin in &config.plugins {
        if !names.insert(plugin.name()) {
            return error::InvalidConfigSnafu {
                reason: format!("plugin '{}' is defined more than once", plugin.name()),
            }
            .fail();
        }
    }
    for plugin_name in config
        .env_overrides
        .keys()
        .chain(config.transforms.keys())
    {
        if !names.contains(plugin_name.as_str()) {
            return error::InvalidConfigSnafu {
                reason: format!(
                    "plugin '{}' was given overrides but is not part of the run",
                    plugin_name
                ),
            }
            .fail();
        }
    }

    let env = canonical_env(config.kube_version.as_ref());
    let mut prepared = Vec::with_capacity(config.plugins.len());
    for plugin in &config.plugins {
        let mut plugin = plugin.clone();
        for (key, value) in &env {
            plugin.set_env(*key, value.as_str());
        }
        if let Some(overrides) = config.env_overrides.get(plugin.name()) {
            for (key, value) in overrides {
                if value.is_empty() {
                    plugin.remove_env(key);
                } else {
                    plugin.set_env(key.as_str(), value.as_str());
                }
            }
        }
        if let Some(transforms) = config.transforms.get(plugin.name()) {
            for transform in transforms {
                plugin = transform.apply(plugin);
            }
        }
        prepared.push(plugin);
    }
    Ok(prepared)
}

/// Escape every regular expression metacharacter in `s`. Unlike `regex::escape`, characters such
/// as `-` and ` ` are left alone so that the output stays readable by the e2e binary's regex
/// engine.
pub fn quote_meta(s: &str) -> String {
    let mut quoted = String::with_capacity(s.len() * 2);
    for c in s.chars() {
        if REGEX_METACHARACTERS.contains(c) {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted
}

/// Build an e2e focus expression that matches exactly the given test names.
pub fn focus_regex<I, S>(test_names: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    test_names
        .into_iter()
        .map(|name| quote_meta(name.as_ref()))
        .collect::<Vec<_>>()
        .join("|")
}

/// The test selections of the e2e plugin.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum E2eMode {
    /// All tests marked `Conformance` that are known not to disrupt other workloads.
    NonDisruptiveConformance,
    /// Non-disruptive conformance without the slowest and serial tests.
    ConformanceLite,
    /// The full conformance suite.
    CertifiedConformance,
    /// A single fast test, useful to check that the cluster is reachable.
    Quick,
}

impl Default for E2eMode {
    fn default() -> Self {
        Self::NonDisruptiveConformance
    }
}

derive_display_from_serialize!(E2eMode);
derive_fromstr_from_deserialize!(E2eMode);

impl E2eMode {
    pub fn focus(&self) -> &'static str {
        match self {
            E2eMode::Quick => "Pods should be submitted and removed",
            E2eMode::NonDisruptiveConformance
            | E2eMode::ConformanceLite
            | E2eMode::CertifiedConformance => r"\[Conformance\]",
        }
    }

    pub fn skip(&self) -> &'static str {
        match self {
            E2eMode::NonDisruptiveConformance => r"\[Disruptive\]|NoExecuteTaintManager",
            E2eMode::ConformanceLite => {
                r"\[Disruptive\]|NoExecuteTaintManager|\[Serial\]|\[Slow\]"
            }
            E2eMode::CertifiedConformance | E2eMode::Quick => "",
        }
    }
}

fn env(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        value_from: None,
    }
}

fn results_mount() -> VolumeMount {
    VolumeMount {
        name: "results".to_string(),
        mount_path: PLUGIN_RESULTS_DIR.to_string(),
        ..Default::default()
    }
}

/// The upstream Kubernetes end-to-end test plugin. `focus` replaces the mode's focus expression
/// when given.
pub fn e2e_plugin(
    mode: E2eMode,
    kube_version: &KubeVersion,
    image: Option<String>,
    focus: Option<String>,
) -> Plugin {
    let image = image.unwrap_or_else(|| {
        format!(
            "{}:{}",
            DEFAULT_CONFORMANCE_IMAGE_REPO,
            kube_version.with_v()
        )
    });
    let container = Container {
        name: "e2e".to_string(),
        image: Some(image),
        command: Some(vec!["/run_e2e.sh".to_string()]),
        image_pull_policy: Some("IfNotPresent".to_string()),
        env: Some(vec![
            env("E2E_FOCUS", focus.as_deref().unwrap_or_else(|| mode.focus())),
            env("E2E_SKIP", mode.skip()),
            env("E2E_PARALLEL", "false"),
            env("E2E_USE_GO_RUNNER", "true"),
            env(
                "E2E_EXTRA_ARGS",
                &format!(
                    "--progress-report-url=http://localhost:{}/progress",
                    PROGRESS_PORT
                ),
            ),
            env("RESULTS_DIR", PLUGIN_RESULTS_DIR),
        ]),
        volume_mounts: Some(vec![results_mount()]),
        ..Default::default()
    };
    let mut plugin = Plugin::new("e2e", Driver::Job, "junit", container);
    plugin.config.result_files = vec!["junit_01.xml".to_string()];
    plugin
}

/// The plugin that collects the systemd journal of every node.
pub fn systemd_logs_plugin(image: Option<String>) -> Plugin {
    let container = Container {
        name: "systemd-logs".to_string(),
        image: Some(image.unwrap_or_else(|| DEFAULT_SYSTEMD_LOGS_IMAGE.to_string())),
        command: Some(vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            "/get_systemd_logs.sh; while true; do echo \"Plugin is complete. Sleeping \
            indefinitely to avoid container exit and automatic restarts from Kubernetes\"; \
            sleep 3600; done"
                .to_string(),
        ]),
        image_pull_policy: Some("IfNotPresent".to_string()),
        env: Some(vec![
            env("CHROOT_DIR", "/node"),
            env("RESULTS_DIR", PLUGIN_RESULTS_DIR),
            EnvVar {
                name: "NODE_NAME".to_string(),
                value: None,
                value_from: Some(EnvVarSource {
                    field_ref: Some(ObjectFieldSelector {
                        field_path: "spec.nodeName".to_string(),
                        api_version: Some("v1".to_string()),
                    }),
                    ..Default::default()
                }),
            },
        ]),
        security_context: Some(SecurityContext {
            privileged: Some(true),
            ..Default::default()
        }),
        volume_mounts: Some(vec![
            results_mount(),
            VolumeMount {
                name: "root".to_string(),
                mount_path: "/node".to_string(),
                ..Default::default()
            },
        ]),
        ..Default::default()
    };
    let mut plugin = Plugin::new("systemd-logs", Driver::DaemonSet, "raw", container);
    plugin.extra_volumes = vec![Volume {
        name: "root".to_string(),
        host_path: Some(HostPathVolumeSource {
            path: "/".to_string(),
            type_: None,
        }),
        ..Default::default()
    }];
    plugin
}

#[cfg(test)]
mod test {
    use super::*;
    use maplit::btreemap;

    fn container(name: &str) -> Container {
        Container {
            name: name.to_string(),
            image: Some("busybox".to_string()),
            env: Some(vec![env("EXISTING", "1")]),
            ..Default::default()
        }
    }

    fn gen_config(plugins: Vec<Plugin>) -> GenConfig {
        GenConfig {
            plugins,
            kube_version: Some(KubeVersion::new(1, 24, 3)),
            ..Default::default()
        }
    }

    #[test]
    fn focus_single_name() {
        assert_eq!(
            focus_regex(["[sig-apps] test-1 (1.15) [Conformance]"]),
            r"\[sig-apps\] test-1 \(1\.15\) \[Conformance\]"
        );
    }

    #[test]
    fn focus_multiple_names() {
        assert_eq!(focus_regex(["a.b", "c|d"]), r"a\.b|c\|d");
        assert_eq!(focus_regex(Vec::<String>::new()), "");
    }

    #[test]
    fn quote_meta_escapes_every_metacharacter() {
        assert_eq!(quote_meta(r"\.+*?()|[]{}^$"), r"\\\.\+\*\?\(\)\|\[\]\{\}\^\$");
        assert_eq!(quote_meta("plain-text_1"), "plain-text_1");
    }

    #[test]
    fn canonical_env_is_injected() {
        let config = gen_config(vec![Plugin::new("p", Driver::Job, "raw", container("p"))]);
        let plugins = prepare_plugins(&config).unwrap();
        let plugin = &plugins[0];
        assert_eq!(plugin.env_value("SONOBUOY"), Some("true"));
        assert_eq!(plugin.env_value("SONOBUOY_K8S_VERSION"), Some("v1.24.3"));
        assert_eq!(
            plugin.env_value("SONOBUOY_RESULTS_DIR"),
            Some("/tmp/sonobuoy/results")
        );
        assert_eq!(plugin.env_value("SONOBUOY_PROGRESS_PORT"), Some("8099"));
        assert_eq!(
            plugin.env_value("SONOBUOY_CONFIG_DIR"),
            Some("/tmp/sonobuoy/config")
        );
        assert_eq!(plugin.env_value("EXISTING"), Some("1"));
    }

    #[test]
    fn overrides_win_and_empty_values_remove() {
        let mut config = gen_config(vec![Plugin::new("p", Driver::Job, "raw", container("p"))]);
        config.env_overrides = btreemap! {
            "p".to_string() => btreemap! {
                "SONOBUOY_RESULTS_DIR".to_string() => "/elsewhere".to_string(),
                "EXISTING".to_string() => "".to_string(),
                "NEW".to_string() => "x".to_string(),
            }
        };
        let plugins = prepare_plugins(&config).unwrap();
        let plugin = &plugins[0];
        assert_eq!(plugin.env_value("SONOBUOY_RESULTS_DIR"), Some("/elsewhere"));
        assert_eq!(plugin.env_value("EXISTING"), None);
        assert_eq!(plugin.env_value("NEW"), Some("x"));
    }

    #[test]
    fn transforms_run_in_order_after_overrides() {
        let mut config = gen_config(vec![Plugin::new("p", Driver::Job, "raw", container("p"))]);
        config.env_overrides = btreemap! {
            "p".to_string() => btreemap! { "ORDER".to_string() => "override".to_string() }
        };
        config.transforms = btreemap! {
            "p".to_string() => vec![
                PluginTransform::new(|mut p: Plugin| {
                    let value = format!("{}-first", p.env_value("ORDER").unwrap_or_default());
                    p.set_env("ORDER", value);
                    p
                }),
                PluginTransform::new(|mut p: Plugin| {
                    let value = format!("{}-second", p.env_value("ORDER").unwrap_or_default());
                    p.set_env("ORDER", value);
                    p
                }),
            ]
        };
        let plugins = prepare_plugins(&config).unwrap();
        assert_eq!(plugins[0].env_value("ORDER"), Some("override-first-second"));
    }

    #[test]
    fn duplicate_plugins_are_rejected() {
        let config = gen_config(vec![
            Plugin::new("p", Driver::Job, "raw", container("a")),
            Plugin::new("p", Driver::DaemonSet, "raw", container("b")),
        ]);
        assert!(matches!(
            prepare_plugins(&config),
            Err(error::Error::InvalidConfig { .. })
        ));
    }

    #[test]
    fn overrides_for_unknown_plugins_are_rejected() {
        let mut config = gen_config(vec![Plugin::new("p", Driver::Job, "raw", container("p"))]);
        config.env_overrides = btreemap! {
            "missing".to_string() => btreemap! { "A".to_string() => "b".to_string() }
        };
        assert!(matches!(
            prepare_plugins(&config),
            Err(error::Error::InvalidConfig { .. })
        ));
    }

    #[test]
    fn env_override_parsing() {
        let o: EnvOverride = "e2e.E2E_FOCUS=Pods.*".parse().unwrap();
        assert_eq!(o.plugin, "e2e");
        assert_eq!(o.key, "E2E_FOCUS");
        assert_eq!(o.value, "Pods.*");
        let removal: EnvOverride = "e2e.E2E_SKIP=".parse().unwrap();
        assert_eq!(removal.value, "");
        assert!("E2E_FOCUS=x".parse::<EnvOverride>().is_err());
        assert!("e2e.E2E_FOCUS".parse::<EnvOverride>().is_err());
    }

    #[test]
    fn plugin_definition_yaml_shape() {
        let yaml = r#"
sonobuoy-config:
  driver: DaemonSet
  plugin-name: custom
  result-format: raw
spec:
  name: plugin
  image: example/plugin:v1
config-map:
  settings.json: "{}"
"#;
        let plugin = Plugin::from_yaml(yaml).unwrap();
        assert_eq!(plugin.name(), "custom");
        assert_eq!(plugin.config.driver, Driver::DaemonSet);
        assert_eq!(plugin.config_map["settings.json"], "{}");
        let back = serde_yaml::to_string(&plugin).unwrap();
        assert!(back.contains("plugin-name: custom"));
        assert!(!back.contains("podSpec"));
    }

    #[test]
    fn e2e_modes() {
        assert_eq!("quick".parse::<E2eMode>().unwrap(), E2eMode::Quick);
        assert_eq!(E2eMode::default().to_string(), "non-disruptive-conformance");
        let plugin = e2e_plugin(E2eMode::Quick, &KubeVersion::new(1, 24, 3), None, None);
        assert_eq!(
            plugin.spec.image.as_deref(),
            Some("registry.k8s.io/conformance:v1.24.3")
        );
        assert_eq!(
            plugin.env_value("E2E_FOCUS"),
            Some("Pods should be submitted and removed")
        );
    }
}
