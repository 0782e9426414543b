use anyhow::{Context, Result};
use clap::Parser;
use sonobuoy_model::constants::{AGGREGATOR_RESULTS_PATH, DEFAULT_NAMESPACE};
use sonobuoy_model::{RetrieveConfig, SonobuoyManager};
use std::path::PathBuf;

/// Download the results archive of a run.
#[derive(Debug, Parser)]
pub(crate) struct Retrieve {
    /// The namespace of the run.
    #[clap(long, short = 'n', default_value = DEFAULT_NAMESPACE)]
    namespace: String,

    /// The directory the results are written to.
    #[clap(default_value = ".")]
    destination: PathBuf,

    /// Write the archive under this name instead of the aggregator's.
    #[clap(long, short = 'f')]
    filename: Option<String>,

    /// Expand the archive into the destination and remove it.
    #[clap(long, short = 'x')]
    extract: bool,

    /// Where the aggregator keeps its results.
    #[clap(long = "remote-path", default_value = AGGREGATOR_RESULTS_PATH)]
    remote_path: String,
}

impl Retrieve {
    pub(crate) async fn run(self, client: SonobuoyManager) -> Result<()> {
        let config = RetrieveConfig {
            namespace: self.namespace,
            remote_path: self.remote_path,
            destination: self.destination,
            filename: self.filename,
            extract: self.extract,
        };
        let written = client
            .retrieve(&config)
            .await
            .context("Unable to retrieve results")?;
        for path in written {
            println!("{}", path.display());
        }
        Ok(())
    }
}
