use anyhow::{Context, Result};
use clap::Parser;
use sonobuoy_model::constants::DEFAULT_NAMESPACE;
use sonobuoy_model::{LogConfig, SonobuoyManager};
use tokio::io::AsyncWriteExt;

/// Print the logs of every container of a run.
#[derive(Debug, Parser)]
pub(crate) struct Logs {
    /// The namespace of the run.
    #[clap(long, short = 'n', default_value = DEFAULT_NAMESPACE)]
    namespace: String,

    /// Only show the logs of this plugin.
    #[clap(long, short = 'p')]
    plugin: Option<String>,

    /// Follow logs, including containers that start later.
    #[clap(long, short)]
    follow: bool,
}

impl Logs {
    pub(crate) async fn run(self, client: SonobuoyManager) -> Result<()> {
        let config = LogConfig {
            namespace: self.namespace,
            plugin: self.plugin,
            follow: self.follow,
            ..Default::default()
        };
        let mut logs = client.logs(&config).await.context("Unable to get logs.")?;
        let mut stdout = tokio::io::stdout();
        let copied = tokio::io::copy(&mut logs, &mut stdout).await;
        stdout.flush().await.context("Unable to write logs")?;
        copied.context("Unable to read logs")?;
        Ok(())
    }
}
