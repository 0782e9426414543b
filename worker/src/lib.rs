/*!

The worker runs next to every plugin container. It waits for the plugin to finish using the
waitfile protocol, uploads the plugin's result to the aggregator and, while the plugin runs,
relays the plugin's progress updates to the aggregator.

!*/

#![deny(
    clippy::expect_used,
    clippy::get_unwrap,
    clippy::panic,
    clippy::panic_in_result_fn,
    clippy::panicking_unwrap,
    clippy::unwrap_in_result,
    clippy::unwrap_used
)]

pub mod config;
pub mod error;
pub mod monitor;
pub mod relay;
pub mod upload;
pub mod waitfile;

pub use config::WorkerConfig;
pub use error::{Error, Result};
pub use monitor::{ContainerMonitor, NoMonitor, PodMonitor};
pub use upload::ResultScope;
pub use waitfile::Waitfile;

use log::{error, info};

/// Relay progress while waiting for the plugin, then upload its result.
pub async fn run_worker(
    config: &WorkerConfig,
    scope: ResultScope,
    monitor: &dyn ContainerMonitor,
) -> Result<()> {
    let client = reqwest::Client::new();

    let listener = relay::bind(config.progress_port).await?;
    let target = upload::progress_url(&config.aggregator_url, &scope, &config.result_type);
    info!(
        "Relaying progress from port {} to '{}'",
        config.progress_port, target
    );
    let relay_client = client.clone();
    let relay = tokio::spawn(async move {
        if let Err(e) = relay::serve(listener, relay_client, target).await {
            error!("{}", e);
        }
    });

    let waitfile = Waitfile::new(
        &config.results_dir,
        config.done_file(),
        config.done_file_delay(),
    );
    let result = waitfile.wait_for_result(monitor).await;
    relay.abort();

    let result = result?;
    let url = upload::result_url(&config.aggregator_url, &scope, &config.result_type);
    upload::upload_result(&client, &url, &result).await
}
