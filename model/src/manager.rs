use crate::clients::{ClusterGateway, KubeGateway};
use crate::config::{GenConfig, RunConfig};
use crate::delete::{delete, DeleteConfig};
use crate::error::{self, Result};
use crate::logs::{logs, LogConfig, LogReader};
use crate::manifest::generate_manifest;
use crate::output::ProgressPrinter;
use crate::retrieve::{retrieve, RetrieveConfig};
use crate::run::{run, status};
use crate::status::AggregatorStatus;
use snafu::ResultExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// # Sonobuoy Manager
///
/// The manager provides the operations an operator performs on a run: create it and wait for it,
/// check its status, follow its logs, retrieve its results and delete it.
///
/// Every operation goes through a [`ClusterGateway`]. Use `new` or `new_from_kubeconfig_path` to
/// talk to a real cluster, or `from_gateway` to supply your own.
pub struct SonobuoyManager {
    gateway: Arc<dyn ClusterGateway>,
}

impl SonobuoyManager {
    /// Create a `SonobuoyManager` using the default `kube::Client`.
    pub async fn new() -> Result<Self> {
        let gateway = KubeGateway::try_default()
            .await
            .context(error::ClientSnafu {
                action: "create client from the default kubeconfig",
            })?;
        Ok(Self::from_gateway(Arc::new(gateway)))
    }

    /// Create a `SonobuoyManager` from the path to a kubeconfig file.
    pub async fn new_from_kubeconfig_path(kubeconfig_path: &Path) -> Result<Self> {
        let gateway = KubeGateway::from_kubeconfig_path(kubeconfig_path)
            .await
            .context(error::ClientSnafu {
                action: format!("create client from '{}'", kubeconfig_path.display()),
            })?;
        Ok(Self::from_gateway(Arc::new(gateway)))
    }

    pub fn from_gateway(gateway: Arc<dyn ClusterGateway>) -> Self {
        Self { gateway }
    }

    pub fn gateway(&self) -> &dyn ClusterGateway {
        self.gateway.as_ref()
    }

    /// Render the manifest of a run without touching the cluster.
    pub fn gen(&self, config: &GenConfig) -> Result<Vec<u8>> {
        generate_manifest(config)
    }

    pub async fn run(
        &self,
        config: &RunConfig,
        printer: &mut ProgressPrinter,
        cancel: &CancellationToken,
    ) -> Result<Option<AggregatorStatus>> {
        run(self.gateway(), config, printer, cancel).await
    }

    pub async fn status(&self, namespace: &str) -> Result<AggregatorStatus> {
        status(self.gateway(), namespace).await
    }

    pub async fn logs(&self, config: &LogConfig) -> Result<LogReader> {
        logs(Arc::clone(&self.gateway), config).await
    }

    pub async fn retrieve(&self, config: &RetrieveConfig) -> Result<Vec<PathBuf>> {
        retrieve(self.gateway(), config).await
    }

    pub async fn delete(
        &self,
        config: &DeleteConfig,
        printer: &mut ProgressPrinter,
        cancel: &CancellationToken,
    ) -> Result<()> {
        delete(self.gateway(), config, printer, cancel).await
    }
}
