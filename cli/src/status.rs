use anyhow::{Context, Result};
use clap::Parser;
use sonobuoy_model::constants::DEFAULT_NAMESPACE;
use sonobuoy_model::SonobuoyManager;

/// Check the status of a run.
#[derive(Debug, Parser)]
pub(crate) struct Status {
    /// The namespace of the run.
    #[clap(long, short = 'n', default_value = DEFAULT_NAMESPACE)]
    namespace: String,

    /// Output the status in JSON format.
    #[clap(long = "json")]
    json: bool,
}

impl Status {
    pub(crate) async fn run(self, client: SonobuoyManager) -> Result<()> {
        let status = client
            .status(&self.namespace)
            .await
            .context("Unable to get status")?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&status)
                    .context("Could not create string from status.")?
            );
        } else {
            println!("Run status: {}", status.status);
            println!("{}", status.to_table());
        }
        Ok(())
    }
}
