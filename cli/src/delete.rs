use crate::duration::parse_duration;
use anyhow::{Context, Result};
use clap::Parser;
use sonobuoy_model::constants::{DEFAULT_NAMESPACE, DELETE_POLL_INTERVAL};
use sonobuoy_model::{DeleteConfig, ProgressPrinter, SonobuoyManager, WaitOutputMode};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Delete a run and the cluster scoped objects it created.
#[derive(Debug, Parser)]
pub(crate) struct Delete {
    /// The namespace of the run.
    #[clap(long, short = 'n', default_value = DEFAULT_NAMESPACE)]
    namespace: String,

    /// Delete the cluster roles and bindings of every run, not only this one.
    #[clap(long)]
    all: bool,

    /// Also delete the namespaces left behind by the e2e tests.
    #[clap(long = "e2e-namespaces")]
    e2e_namespaces: bool,

    /// Wait this long for everything to be gone, e.g. `5m`.
    #[clap(long, parse(try_from_str = parse_duration))]
    wait: Option<Duration>,

    /// How progress is shown while waiting [none|spinner|progress].
    #[clap(long = "wait-output", default_value = "spinner")]
    wait_output: WaitOutputMode,
}

impl Delete {
    pub(crate) async fn run(self, client: SonobuoyManager, cancel: CancellationToken) -> Result<()> {
        let config = DeleteConfig {
            namespace: self.namespace,
            delete_all: self.all,
            e2e_namespaces: self.e2e_namespaces,
            wait: self.wait,
            poll_interval: DELETE_POLL_INTERVAL,
        };
        let mut printer = ProgressPrinter::new(self.wait_output);
        client
            .delete(&config, &mut printer, &cancel)
            .await
            .context(format!("Unable to delete run in '{}'", config.namespace))
    }
}
