/*!

Renders the resources of a run as a multi-document YAML stream. Documents are emitted in the order
they must be created: the namespace first, then the identities and permissions the aggregator runs
with, then its configuration and finally the aggregator itself.

!*/

mod aggregator;
mod rbac;

use crate::config::GenConfig;
use crate::constants::{COMPONENT_SONOBUOY, LABEL_COMPONENT, LABEL_NAMESPACE};
use crate::error::{self, Result};
use crate::plugin::prepare_plugins;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::ObjectMeta;
use maplit::btreemap;
use serde::Serialize;
use snafu::ResultExt;
use std::collections::BTreeMap;

pub(crate) use rbac::cluster_role_name;

const DOCUMENT_MARKER: &str = "---\n";

/// The labels every object of a run carries. Cluster scoped objects are found for cleanup with
/// these.
pub(crate) fn component_labels(namespace: &str) -> BTreeMap<String, String> {
    btreemap! {
        LABEL_COMPONENT.to_string() => COMPONENT_SONOBUOY.to_string(),
        LABEL_NAMESPACE.to_string() => namespace.to_string(),
    }
}

fn namespace(name: &str) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(component_labels(name)),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Collects serialized documents into a single stream.
#[derive(Debug, Default)]
struct ManifestWriter {
    out: String,
}

impl ManifestWriter {
    fn push<T: Serialize>(&mut self, what: &str, object: &T) -> Result<()> {
        let yaml = serde_yaml::to_string(object).context(error::SerializeSnafu { what })?;
        let body = yaml.strip_prefix(DOCUMENT_MARKER).unwrap_or(&yaml);
        self.out.push_str(DOCUMENT_MARKER);
        self.out.push_str(body);
        if !body.ends_with('\n') {
            self.out.push('\n');
        }
        Ok(())
    }

    fn into_bytes(self) -> Vec<u8> {
        self.out.into_bytes()
    }
}

/// Render the resources for a run described by `config`.
pub fn generate_manifest(config: &GenConfig) -> Result<Vec<u8>> {
    config.validate()?;
    let plugins = prepare_plugins(config)?;
    let ns = config.namespace.as_str();

    let mut writer = ManifestWriter::default();
    writer.push("namespace", &namespace(ns))?;
    if config.enable_rbac {
        writer.push("service account", &rbac::service_account(ns))?;
        writer.push("cluster role", &rbac::cluster_role(ns))?;
        writer.push("cluster role binding", &rbac::cluster_role_binding(ns))?;
    }
    writer.push("aggregator config map", &aggregator::config_map(config)?)?;
    writer.push(
        "plugins config map",
        &aggregator::plugins_config_map(ns, &plugins)?,
    )?;
    writer.push("aggregator pod", &aggregator::pod(config))?;
    writer.push("aggregator service", &aggregator::service(ns))?;
    Ok(writer.into_bytes())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::plugin::{e2e_plugin, systemd_logs_plugin, E2eMode, Plugin};
    use crate::version::KubeVersion;
    use k8s_openapi::api::core::v1::ConfigMap;
    use serde::Deserialize;

    fn config() -> GenConfig {
        let version = KubeVersion::new(1, 24, 3);
        GenConfig {
            namespace: "conformance".to_string(),
            kube_version: Some(version),
            plugins: vec![
                e2e_plugin(E2eMode::Quick, &version, None, None),
                systemd_logs_plugin(None),
            ],
            ..Default::default()
        }
    }

    fn documents(manifest: &[u8]) -> Vec<serde_yaml::Value> {
        serde_yaml::Deserializer::from_slice(manifest)
            .map(|doc| serde_yaml::Value::deserialize(doc).unwrap())
            .collect()
    }

    fn kinds(docs: &[serde_yaml::Value]) -> Vec<String> {
        docs.iter()
            .map(|doc| doc["kind"].as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn documents_are_in_dependency_order() {
        let manifest = generate_manifest(&config()).unwrap();
        let docs = documents(&manifest);
        assert_eq!(
            kinds(&docs),
            vec![
                "Namespace",
                "ServiceAccount",
                "ClusterRole",
                "ClusterRoleBinding",
                "ConfigMap",
                "ConfigMap",
                "Pod",
                "Service"
            ]
        );
        let pod = &docs[6];
        assert_eq!(pod["metadata"]["name"].as_str(), Some("sonobuoy"));
        assert_eq!(pod["metadata"]["namespace"].as_str(), Some("conformance"));
        assert_eq!(
            pod["spec"]["containers"][0]["name"].as_str(),
            Some("kube-sonobuoy")
        );
    }

    #[test]
    fn cluster_objects_are_labelled_with_the_namespace() {
        let manifest = generate_manifest(&config()).unwrap();
        let docs = documents(&manifest);
        for doc in &docs[2..4] {
            assert_eq!(
                doc["metadata"]["labels"]["component"].as_str(),
                Some("sonobuoy")
            );
            assert_eq!(
                doc["metadata"]["labels"]["namespace"].as_str(),
                Some("conformance")
            );
            assert_eq!(
                doc["metadata"]["name"].as_str(),
                Some("sonobuoy-serviceaccount-conformance")
            );
        }
    }

    #[test]
    fn rbac_can_be_disabled() {
        let mut config = config();
        config.enable_rbac = false;
        let manifest = generate_manifest(&config).unwrap();
        let docs = documents(&manifest);
        assert_eq!(
            kinds(&docs),
            vec!["Namespace", "ConfigMap", "ConfigMap", "Pod", "Service"]
        );
        assert!(docs[3]["spec"]["serviceAccountName"].is_null());
    }

    #[test]
    fn plugins_are_prepared_before_rendering() {
        let manifest = generate_manifest(&config()).unwrap();
        let docs = documents(&manifest);
        let plugins: ConfigMap = serde_yaml::from_value(docs[5].clone()).unwrap();
        let data = plugins.data.unwrap();
        assert_eq!(data.len(), 2);
        let e2e = Plugin::from_yaml(&data["plugin-0.yaml"]).unwrap();
        assert_eq!(e2e.name(), "e2e");
        assert_eq!(e2e.env_value("SONOBUOY_K8S_VERSION"), Some("v1.24.3"));
        let systemd = Plugin::from_yaml(&data["plugin-1.yaml"]).unwrap();
        assert_eq!(systemd.name(), "systemd-logs");
        assert_eq!(systemd.env_value("SONOBUOY"), Some("true"));
    }

    #[test]
    fn duplicate_plugins_fail_generation() {
        let mut config = config();
        config.plugins.push(systemd_logs_plugin(None));
        assert!(generate_manifest(&config).is_err());
    }
}
