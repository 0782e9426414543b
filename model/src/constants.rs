use std::time::Duration;

/// Helper macro to avoid retyping the base domain-like name of the system when creating further
/// string constants from it. When given no parameters, this returns the base domain-like name.
/// When given a string literal parameter it adds `/parameter` to the end.
macro_rules! sonobuoy {
    () => {
        "sonobuoy.hept.io"
    };
    ($s:literal) => {
        concat!(sonobuoy!(), "/", $s)
    };
}

// System identifiers
pub const SONOBUOY: &str = sonobuoy!();
pub const DEFAULT_NAMESPACE: &str = "sonobuoy";
pub const DEFAULT_AGGREGATOR_IMAGE: &str = "sonobuoy/sonobuoy:v0.56.16";
pub const DEFAULT_SYSTEMD_LOGS_IMAGE: &str = "sonobuoy/systemd-logs:v0.4";
pub const DEFAULT_CONFORMANCE_IMAGE_REPO: &str = "registry.k8s.io/conformance";

// Component names
pub const AGGREGATOR_POD: &str = "sonobuoy";
pub const AGGREGATOR_CONTAINER: &str = "kube-sonobuoy";
pub const AGGREGATOR_SERVICE: &str = "sonobuoy-aggregator";
pub const AGGREGATOR_CONFIG_MAP: &str = "sonobuoy-config-cm";
pub const PLUGINS_CONFIG_MAP: &str = "sonobuoy-plugins-cm";
pub const SERVICE_ACCOUNT: &str = "sonobuoy-serviceaccount";

// Annotation and label keys
pub const STATUS_ANNOTATION: &str = sonobuoy!("status");
pub const LABEL_COMPONENT: &str = "component";
pub const LABEL_NAMESPACE: &str = "namespace";
pub const LABEL_SONOBUOY_COMPONENT: &str = "sonobuoy-component";
pub const LABEL_PLUGIN: &str = "sonobuoy-plugin";
pub const LABEL_TIER: &str = "tier";
pub const COMPONENT_SONOBUOY: &str = "sonobuoy";
pub const COMPONENT_AGGREGATOR: &str = "aggregator";

// Labels that the upstream e2e framework puts on the namespaces it creates
pub const LABEL_E2E_FRAMEWORK: &str = "e2e-framework";
pub const LABEL_E2E_RUN: &str = "e2e-run";

// DNS preflight defaults
pub const DEFAULT_DNS_NAMESPACE: &str = "kube-system";
pub const DEFAULT_DNS_POD_LABELS: [&str; 2] = ["kube-dns", "coredns"];
pub const DNS_LABEL_KEY: &str = "k8s-app";

// Supported cluster versions
pub const MINIMUM_KUBE_VERSION: &str = "1.17.0";
pub const MAXIMUM_KUBE_VERSION: &str = "1.99.99";

// Environment variables injected into every plugin
pub const ENV_MARKER: &str = "SONOBUOY";
pub const ENV_K8S_VERSION: &str = "SONOBUOY_K8S_VERSION";
pub const ENV_RESULTS_DIR: &str = "SONOBUOY_RESULTS_DIR";
pub const ENV_PROGRESS_PORT: &str = "SONOBUOY_PROGRESS_PORT";
pub const ENV_CONFIG_DIR: &str = "SONOBUOY_CONFIG_DIR";
pub const ENV_DONE_FILE_DELAY: &str = "SONOBUOY_DONE_FILE_DELAY";

// Paths
pub const AGGREGATOR_RESULTS_PATH: &str = "/tmp/sonobuoy";
pub const PLUGIN_RESULTS_DIR: &str = "/tmp/sonobuoy/results";
pub const PLUGIN_CONFIG_DIR: &str = "/tmp/sonobuoy/config";
pub const AGGREGATOR_CONFIG_DIR: &str = "/etc/sonobuoy";
pub const PLUGIN_SEARCH_PATH: &str = "/plugins.d";
pub const DONE_FILE_NAME: &str = "done";

// Ports
pub const AGGREGATOR_PORT: u16 = 8080;
pub const PROGRESS_PORT: u16 = 8099;

// The command run inside the aggregator container to stream its results as a gzipped tar.
pub const SPLAT_BINARY: &str = "/sonobuoy";
pub const SPLAT_COMMAND: &str = "splat";

// Polling
pub const RUN_POLL_INTERVAL: Duration = Duration::from_secs(20);
pub const DELETE_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[test]
fn sonobuoy_constants_macro_test() {
    assert_eq!("sonobuoy.hept.io", sonobuoy!());
    assert_eq!("sonobuoy.hept.io/status", STATUS_ANNOTATION);
    assert_eq!("sonobuoy.hept.io/foo", sonobuoy!("foo"));
}
