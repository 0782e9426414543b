use crate::apply::apply_manifest;
use crate::clients::ClusterGateway;
use crate::config::RunConfig;
use crate::constants::AGGREGATOR_POD;
use crate::error::{self, Result};
use crate::manifest::generate_manifest;
use crate::output::ProgressPrinter;
use crate::preflight::preflight_checks;
use crate::status::{pod_status_message, AggregatorStatus, RunStatus};
use crate::version::KubeVersion;
use log::{debug, info, warn};
use snafu::ResultExt;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

const WAITING_FOR_AGGREGATOR: &str = "waiting for the aggregator to be tagged";

/// What one poll of the aggregator found.
#[derive(Debug)]
enum Observation {
    /// The aggregator has not written a status yet.
    Waiting(String),
    Status(AggregatorStatus),
}

/// Run the full lifecycle: preflight, apply, and optionally wait for completion. Returns the
/// final aggregator status when the run was waited on.
pub async fn run(
    gateway: &dyn ClusterGateway,
    config: &RunConfig,
    printer: &mut ProgressPrinter,
    cancel: &CancellationToken,
) -> Result<Option<AggregatorStatus>> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => error::CancelledSnafu.fail(),
        result = run_to_completion(gateway, config, printer) => result,
    }
}

async fn run_to_completion(
    gateway: &dyn ClusterGateway,
    config: &RunConfig,
    printer: &mut ProgressPrinter,
) -> Result<Option<AggregatorStatus>> {
    config.validate()?;

    if let Some(preflight) = &config.preflight {
        let errors = preflight_checks(gateway, preflight).await;
        if !errors.is_empty() {
            return error::PreflightFailureSnafu { errors }.fail();
        }
        debug!("Preflight checks passed");
    }

    let manifest = match &config.manifest {
        Some(manifest) => manifest.clone(),
        None => {
            let mut gen = config.gen.clone();
            if gen.kube_version.is_none() {
                gen.kube_version = Some(server_version(gateway).await?);
            }
            generate_manifest(&gen)?
        }
    };
    apply_manifest(gateway, &manifest).await?;
    info!("Run created in namespace '{}'", config.gen.namespace);

    match config.wait_duration() {
        None => Ok(None),
        Some(wait) => wait_for_run(
            gateway,
            &config.gen.namespace,
            wait,
            config.poll_interval,
            printer,
        )
        .await
        .map(Some),
    }
}

/// The version of the cluster, used to tell plugins which version they are testing.
pub async fn server_version(gateway: &dyn ClusterGateway) -> Result<KubeVersion> {
    let version = gateway.server_version().await.context(error::ClientSnafu {
        action: "get the server version",
    })?;
    KubeVersion::parse(&version).map_err(|e| error::Error::InvalidConfig {
        reason: format!("the server reported an unusable version: {}", e),
    })
}

/// Poll the aggregator until the run completes, fails or `wait` elapses.
pub async fn wait_for_run(
    gateway: &dyn ClusterGateway,
    namespace: &str,
    wait: Duration,
    poll_interval: Duration,
    printer: &mut ProgressPrinter,
) -> Result<AggregatorStatus> {
    tokio::time::timeout(wait, poll_until_terminal(gateway, namespace, poll_interval, printer))
        .await
        .map_err(|_| error::Error::WaitTimeout { duration: wait })?
}

async fn poll_until_terminal(
    gateway: &dyn ClusterGateway,
    namespace: &str,
    poll_interval: Duration,
    printer: &mut ProgressPrinter,
) -> Result<AggregatorStatus> {
    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut observed = false;
    loop {
        interval.tick().await;
        let observation = match observe(gateway, namespace, observed).await {
            Ok(observation) => observation,
            Err(e) if !observed => {
                // The aggregator may still be coming up.
                warn!("Unable to check the run, will retry: {}", e);
                continue;
            }
            Err(e) => return Err(e),
        };
        match observation {
            Observation::Waiting(message) => printer.update(&message),
            Observation::Status(status) => {
                observed = true;
                match status.status {
                    RunStatus::Complete => {
                        printer.update(&status.summary());
                        printer.finish("Run complete");
                        return Ok(status);
                    }
                    RunStatus::Failed => {
                        printer.update(&status.summary());
                        printer.finish("Run failed");
                        return error::WaitTerminalFailureSnafu {
                            status: status.status.to_string(),
                        }
                        .fail();
                    }
                    _ => printer.update(&status.summary()),
                }
            }
        }
    }
}

/// Look at the aggregator once. A missing aggregator pod is only expected before its status was
/// first seen.
async fn observe(
    gateway: &dyn ClusterGateway,
    namespace: &str,
    observed: bool,
) -> Result<Observation> {
    let pod = match gateway.get_pod(namespace, AGGREGATOR_POD).await {
        Ok(pod) => pod,
        Err(e) if e.is_not_found() && !observed => {
            return Ok(Observation::Waiting(WAITING_FOR_AGGREGATOR.to_string()))
        }
        Err(source) => return Err(error::Error::WaitFetch { source }),
    };
    match AggregatorStatus::from_pod(&pod) {
        None => Ok(Observation::Waiting(pod_status_message(&pod))),
        Some(status) => Ok(Observation::Status(status?)),
    }
}

/// Read the current aggregator status of the run in `namespace`.
pub async fn status(gateway: &dyn ClusterGateway, namespace: &str) -> Result<AggregatorStatus> {
    let pod = gateway
        .get_pod(namespace, AGGREGATOR_POD)
        .await
        .context(error::ClientSnafu {
            action: "get the aggregator pod",
        })?;
    AggregatorStatus::require_from_pod(&pod)
}
