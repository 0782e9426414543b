use crate::clients::{self, ClusterGateway};
use crate::constants::{
    DEFAULT_DNS_NAMESPACE, DEFAULT_DNS_POD_LABELS, DEFAULT_NAMESPACE, DNS_LABEL_KEY,
    MAXIMUM_KUBE_VERSION, MINIMUM_KUBE_VERSION,
};
use crate::version::{check_version, KubeVersion, VersionError};
use log::debug;
use snafu::Snafu;

/// The inputs of the preflight checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreflightConfig {
    /// The namespace the run will be created in. It must not exist yet.
    pub namespace: String,
    /// Where the cluster DNS pods run.
    pub dns_namespace: String,
    /// Values of the `k8s-app` label that identify DNS pods. Any one of them is enough.
    pub dns_pod_labels: Vec<String>,
    pub minimum_version: KubeVersion,
    pub maximum_version: KubeVersion,
}

impl Default for PreflightConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            dns_namespace: DEFAULT_DNS_NAMESPACE.to_string(),
            dns_pod_labels: DEFAULT_DNS_POD_LABELS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            minimum_version: KubeVersion::parse(MINIMUM_KUBE_VERSION).unwrap_or_default(),
            maximum_version: KubeVersion::parse(MAXIMUM_KUBE_VERSION).unwrap_or_default(),
        }
    }
}

/// A single failed preflight check.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum PreflightError {
    #[snafu(display("no DNS pods found with labels {:?} in namespace {}", labels, namespace))]
    DnsMissing {
        labels: Vec<String>,
        namespace: String,
    },

    #[snafu(display("error listing DNS pods in namespace {}: {}", namespace, source))]
    DnsList {
        namespace: String,
        source: clients::Error,
    },

    #[snafu(display("error getting the server version: {}", source))]
    ServerVersion { source: clients::Error },

    #[snafu(display("{}", source))]
    Version { source: VersionError },

    #[snafu(display("error checking for namespace: {}", source))]
    NamespaceCheck { source: clients::Error },

    #[snafu(display("namespace already exists"))]
    NamespaceExists { namespace: String },
}

/// Runs every check in order and returns all of the failures, so that the operator sees them in
/// one pass. An empty list means the cluster is ready.
pub async fn preflight_checks(
    gateway: &dyn ClusterGateway,
    config: &PreflightConfig,
) -> Vec<PreflightError> {
    let mut errors = Vec::new();
    if let Err(e) = check_dns(gateway, config).await {
        errors.push(e);
    }
    if let Err(e) = check_server_version(gateway, config).await {
        errors.push(e);
    }
    if let Err(e) = check_namespace(gateway, config).await {
        errors.push(e);
    }
    errors
}

async fn check_dns(
    gateway: &dyn ClusterGateway,
    config: &PreflightConfig,
) -> Result<(), PreflightError> {
    for label in &config.dns_pod_labels {
        let selector = format!("{}={}", DNS_LABEL_KEY, label);
        let pods = gateway
            .list_pods(&config.dns_namespace, Some(&selector))
            .await
            .map_err(|source| PreflightError::DnsList {
                namespace: config.dns_namespace.clone(),
                source,
            })?;
        if !pods.is_empty() {
            debug!("Found {} DNS pods with '{}'", pods.len(), selector);
            return Ok(());
        }
    }
    DnsMissingSnafu {
        labels: config.dns_pod_labels.clone(),
        namespace: config.dns_namespace.clone(),
    }
    .fail()
}

async fn check_server_version(
    gateway: &dyn ClusterGateway,
    config: &PreflightConfig,
) -> Result<(), PreflightError> {
    let server_version = gateway
        .server_version()
        .await
        .map_err(|source| PreflightError::ServerVersion { source })?;
    let server_version =
        KubeVersion::parse(server_version).map_err(|source| PreflightError::Version { source })?;
    check_version(
        &server_version,
        &config.minimum_version,
        &config.maximum_version,
    )
    .map_err(|source| PreflightError::Version { source })
}

async fn check_namespace(
    gateway: &dyn ClusterGateway,
    config: &PreflightConfig,
) -> Result<(), PreflightError> {
    match gateway.get_namespace(&config.namespace).await {
        Ok(_) => NamespaceExistsSnafu {
            namespace: config.namespace.clone(),
        }
        .fail(),
        Err(e) if e.is_not_found() => Ok(()),
        Err(source) => Err(PreflightError::NamespaceCheck { source }),
    }
}
