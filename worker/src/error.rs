use snafu::Snafu;
use std::path::PathBuf;

/// The crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// The crate-wide error type.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Unable to read the worker configuration from the environment: {}", source))]
    Config { source: envy::Error },

    #[snafu(display("Invalid worker configuration: {}", reason))]
    InvalidConfig { reason: String },

    #[snafu(display("Unable to {} '{}': {}", action, path.display(), source))]
    File {
        action: String,
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("An error occurred while archiving '{}': {}", path.display(), source))]
    Archive {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Unable to upload results to '{}': {}", url, source))]
    Upload { url: String, source: reqwest::Error },

    #[snafu(display("The aggregator rejected the results at '{}' with status {}", url, status))]
    UploadStatus { url: String, status: u16 },

    #[snafu(display("Unable to check the other containers of the pod: {}", source))]
    Monitor {
        source: sonobuoy_model::clients::Error,
    },

    #[snafu(display("Unable to create the cluster client: {}", source))]
    Client {
        source: sonobuoy_model::clients::Error,
    },

    #[snafu(display("Unable to listen for progress updates on port {}: {}", port, source))]
    Bind { port: u16, source: std::io::Error },

    #[snafu(display("The progress relay stopped: {}", source))]
    Serve { source: std::io::Error },

    #[snafu(display("A background task failed: {}", source))]
    Join { source: tokio::task::JoinError },
}
