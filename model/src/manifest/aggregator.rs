use super::component_labels;
use crate::config::GenConfig;
use crate::constants::{
    AGGREGATOR_CONFIG_DIR, AGGREGATOR_CONFIG_MAP, AGGREGATOR_CONTAINER, AGGREGATOR_POD,
    AGGREGATOR_PORT, AGGREGATOR_RESULTS_PATH, AGGREGATOR_SERVICE, COMPONENT_AGGREGATOR,
    LABEL_SONOBUOY_COMPONENT, LABEL_TIER, PLUGINS_CONFIG_MAP, PLUGIN_SEARCH_PATH, PROGRESS_PORT,
    SERVICE_ACCOUNT, SPLAT_BINARY,
};
use crate::error::{self, Result};
use crate::plugin::Plugin;
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource, EnvVar,
    EnvVarSource, ObjectFieldSelector, Pod, PodSpec, Service, ServicePort, ServiceSpec, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;
use maplit::btreemap;
use serde::Serialize;
use snafu::ResultExt;
use std::collections::BTreeMap;

const CONFIG_FILE: &str = "config.json";
const CONFIG_VOLUME: &str = "sonobuoy-config-volume";
const PLUGINS_VOLUME: &str = "sonobuoy-plugins-volume";
const OUTPUT_VOLUME: &str = "output-volume";

/// The aggregator's own configuration file, mounted from a config map.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct AggregatorConfig<'a> {
    namespace: &'a str,
    results_dir: &'a str,
    plugin_search_path: Vec<&'a str>,
    worker_image: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_pull_policy: Option<&'a str>,
    progress_updates_port: String,
    server: ServerConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
struct ServerConfig {
    bindaddress: String,
    bindport: u16,
    timeoutseconds: u64,
}

fn aggregator_labels(namespace: &str) -> BTreeMap<String, String> {
    let mut labels = component_labels(namespace);
    labels.insert(
        LABEL_SONOBUOY_COMPONENT.to_string(),
        COMPONENT_AGGREGATOR.to_string(),
    );
    labels.insert(LABEL_TIER.to_string(), "analysis".to_string());
    labels
}

/// Defines the config map holding the aggregator's `config.json`.
pub(super) fn config_map(config: &GenConfig) -> Result<ConfigMap> {
    let aggregator_config = AggregatorConfig {
        namespace: &config.namespace,
        results_dir: AGGREGATOR_RESULTS_PATH,
        plugin_search_path: vec![PLUGIN_SEARCH_PATH],
        worker_image: &config.aggregator_image,
        image_pull_policy: config.image_pull_policy.as_deref(),
        progress_updates_port: PROGRESS_PORT.to_string(),
        server: ServerConfig {
            bindaddress: "0.0.0.0".to_string(),
            bindport: AGGREGATOR_PORT,
            timeoutseconds: config.aggregator_timeout.as_secs(),
        },
    };
    let json = serde_json::to_string_pretty(&aggregator_config).context(
        error::SerializeJsonSnafu {
            what: "aggregator config",
        },
    )?;
    Ok(ConfigMap {
        metadata: ObjectMeta {
            name: Some(AGGREGATOR_CONFIG_MAP.to_string()),
            namespace: Some(config.namespace.clone()),
            labels: Some(component_labels(&config.namespace)),
            ..Default::default()
        },
        data: Some(btreemap! { CONFIG_FILE.to_string() => json }),
        ..Default::default()
    })
}

/// Defines the config map holding one plugin definition per key.
pub(super) fn plugins_config_map(namespace: &str, plugins: &[Plugin]) -> Result<ConfigMap> {
    let mut data = BTreeMap::new();
    for (i, plugin) in plugins.iter().enumerate() {
        let yaml = serde_yaml::to_string(plugin).context(error::SerializeSnafu {
            what: format!("plugin '{}'", plugin.name()),
        })?;
        data.insert(format!("plugin-{}.yaml", i), yaml);
    }
    Ok(ConfigMap {
        metadata: ObjectMeta {
            name: Some(PLUGINS_CONFIG_MAP.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(component_labels(namespace)),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    })
}

/// Defines the aggregator pod.
pub(super) fn pod(config: &GenConfig) -> Pod {
    let volume_mount = |name: &str, path: &str| VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        ..Default::default()
    };
    let config_map_volume = |name: &str, config_map: &str| Volume {
        name: name.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: Some(config_map.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    };

    Pod {
        metadata: ObjectMeta {
            name: Some(AGGREGATOR_POD.to_string()),
            namespace: Some(config.namespace.clone()),
            labels: Some(aggregator_labels(&config.namespace)),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: AGGREGATOR_CONTAINER.to_string(),
                image: Some(config.aggregator_image.clone()),
                image_pull_policy: config.image_pull_policy.clone(),
                command: Some(vec![SPLAT_BINARY.to_string()]),
                args: Some(
                    ["aggregator", "--no-exit", "--level=info", "-v=4", "--alsologtostderr"]
                        .iter()
                        .map(|s| s.to_string())
                        .collect(),
                ),
                env: Some(vec![EnvVar {
                    name: "SONOBUOY_ADVERTISE_IP".to_string(),
                    value_from: Some(EnvVarSource {
                        field_ref: Some(ObjectFieldSelector {
                            field_path: "status.podIP".to_string(),
                            api_version: Some("v1".to_string()),
                        }),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]),
                ports: Some(vec![ContainerPort {
                    container_port: i32::from(AGGREGATOR_PORT),
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                }]),
                volume_mounts: Some(vec![
                    volume_mount(CONFIG_VOLUME, AGGREGATOR_CONFIG_DIR),
                    volume_mount(PLUGINS_VOLUME, PLUGIN_SEARCH_PATH),
                    volume_mount(OUTPUT_VOLUME, AGGREGATOR_RESULTS_PATH),
                ]),
                ..Default::default()
            }],
            restart_policy: Some("Never".to_string()),
            service_account_name: config.enable_rbac.then(|| SERVICE_ACCOUNT.to_string()),
            volumes: Some(vec![
                config_map_volume(CONFIG_VOLUME, AGGREGATOR_CONFIG_MAP),
                config_map_volume(PLUGINS_VOLUME, PLUGINS_CONFIG_MAP),
                Volume {
                    name: OUTPUT_VOLUME.to_string(),
                    empty_dir: Some(EmptyDirVolumeSource::default()),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Defines the service plugins use to reach the aggregator.
pub(super) fn service(namespace: &str) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(AGGREGATOR_SERVICE.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(aggregator_labels(namespace)),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(btreemap! {
                LABEL_SONOBUOY_COMPONENT.to_string() => COMPONENT_AGGREGATOR.to_string(),
            }),
            ports: Some(vec![ServicePort {
                port: i32::from(AGGREGATOR_PORT),
                protocol: Some("TCP".to_string()),
                target_port: Some(IntOrString::Int(i32::from(AGGREGATOR_PORT))),
                ..Default::default()
            }]),
            type_: Some("ClusterIP".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}
