use crate::duration::parse_duration;
use crate::gen::GenArgs;
use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use sonobuoy_model::constants::{DEFAULT_DNS_NAMESPACE, RUN_POLL_INTERVAL};
use sonobuoy_model::{
    server_version, PreflightConfig, ProgressPrinter, RunConfig, SonobuoyManager, WaitOutputMode,
};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Start a run.
#[derive(Debug, Parser)]
pub(crate) struct Run {
    #[clap(flatten)]
    gen: GenArgs,

    /// Apply this manifest, e.g. the output of `gen`, instead of generating one.
    #[clap(long, short = 'f')]
    file: Option<PathBuf>,

    /// Wait this long for the run to finish, e.g. `90m`. Zero or absent returns after the run is
    /// created.
    #[clap(long, parse(try_from_str = parse_duration))]
    wait: Option<Duration>,

    /// How progress is shown while waiting [none|spinner|progress].
    #[clap(long = "wait-output", default_value = "spinner")]
    wait_output: WaitOutputMode,

    /// How often the run is checked while waiting.
    #[clap(long = "poll-interval", parse(try_from_str = parse_duration))]
    poll_interval: Option<Duration>,

    /// Do not check that the cluster is ready for a run.
    #[clap(long = "skip-preflight")]
    skip_preflight: bool,

    /// The namespace the cluster DNS pods run in.
    #[clap(long = "dns-namespace", default_value = DEFAULT_DNS_NAMESPACE)]
    dns_namespace: String,

    /// A `k8s-app` label value identifying DNS pods. Can be repeated.
    #[clap(long = "dns-pod-label")]
    dns_pod_labels: Vec<String>,
}

impl Run {
    pub(crate) async fn run(self, client: SonobuoyManager, cancel: CancellationToken) -> Result<()> {
        let manifest = match &self.file {
            Some(path) => Some(tokio::fs::read(path).await.context(format!(
                "Unable to read manifest '{}'",
                path.display()
            ))?),
            None => None,
        };
        let kube_version = match self.gen.kubernetes_version {
            Some(version) => version,
            None => server_version(client.gateway())
                .await
                .context("Unable to get the cluster version")?,
        };
        let gen = self.gen.gen_config(kube_version)?;

        let preflight = if self.skip_preflight {
            None
        } else {
            let mut preflight = PreflightConfig {
                namespace: gen.namespace.clone(),
                dns_namespace: self.dns_namespace.clone(),
                ..Default::default()
            };
            if !self.dns_pod_labels.is_empty() {
                preflight.dns_pod_labels = self.dns_pod_labels.clone();
            }
            Some(preflight)
        };

        let config = RunConfig {
            gen,
            manifest,
            preflight,
            wait: self.wait,
            wait_output: self.wait_output,
            poll_interval: self.poll_interval.unwrap_or(RUN_POLL_INTERVAL),
        };
        let mut printer = ProgressPrinter::new(config.wait_output);
        let status = client
            .run(&config, &mut printer, &cancel)
            .await
            .context("Unable to run")?;

        match status {
            Some(status) => println!("{}", status.to_table()),
            None => info!(
                "Run started in namespace '{}', use `status` to check on it",
                config.gen.namespace
            ),
        }
        Ok(())
    }
}
