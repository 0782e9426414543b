use crate::preflight::PreflightError;
use snafu::Snafu;
use std::path::PathBuf;
use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

/// The error type returned by the coordination operations of this crate.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Invalid configuration: {}", reason))]
    InvalidConfig { reason: String },

    #[snafu(display("Preflight checks failed:\n{}", display_preflight_errors(errors)))]
    PreflightFailure { errors: Vec<PreflightError> },

    #[snafu(display("Unable to decode document {} of the manifest: {}", index, source))]
    ApplyDecode {
        index: usize,
        source: serde_yaml::Error,
    },

    #[snafu(display("Document {} of the manifest has no {}", index, what))]
    ApplyMissingType { index: usize, what: String },

    #[snafu(display("Unable to resolve resource kind '{}': {}", kind, source))]
    ApplyResolve {
        kind: String,
        source: crate::clients::Error,
    },

    #[snafu(display("Unable to create {} '{}': {}", kind, name, source))]
    Apply {
        kind: String,
        name: String,
        source: crate::clients::Error,
    },

    #[snafu(display("The run finished with status '{}'", status))]
    WaitTerminalFailure { status: String },

    #[snafu(display("The run did not finish within {:?}", duration))]
    WaitTimeout { duration: Duration },

    #[snafu(display("Unable to get the status of the run: {}", source))]
    WaitFetch { source: crate::clients::Error },

    #[snafu(display("The operation was cancelled"))]
    Cancelled,

    #[snafu(display("Unable to {}: {}", action, source))]
    Client {
        action: String,
        source: crate::clients::Error,
    },

    #[snafu(display("Unable to parse the aggregator status annotation: {}", source))]
    StatusParse { source: serde_json::Error },

    #[snafu(display("The aggregator pod has no status annotation yet"))]
    StatusMissing,

    #[snafu(display("Unable to {} while retrieving results: {}", stage, source))]
    Retrieval {
        stage: String,
        source: std::io::Error,
    },

    #[snafu(display("Refusing to extract '{}': the path leaves the destination", name))]
    RetrievalUnsafePath { name: String },

    #[snafu(display("no valid entries in result"))]
    RetrievalEmpty,

    #[snafu(display("Found unexpected data after the end of the results archive"))]
    RetrievalTrailingData,

    #[snafu(display("Unable to delete '{}': {}", filename.display(), source))]
    Deletion {
        filename: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Unable to read logs of {}/{}: {}", pod, container, source))]
    LogRead {
        pod: String,
        container: String,
        source: std::io::Error,
    },

    #[snafu(display("A background task failed: {}", source))]
    Join { source: tokio::task::JoinError },

    #[snafu(display("Unable to serialize {}: {}", what, source))]
    Serialize {
        what: String,
        source: serde_yaml::Error,
    },

    #[snafu(display("Unable to serialize {}: {}", what, source))]
    SerializeJson {
        what: String,
        source: serde_json::Error,
    },
}

impl Error {
    /// `true` when the only thing that went wrong was removing a local file after its contents
    /// were successfully used, e.g. unlinking a results tarball after it was extracted.
    pub fn is_deletion_error(&self) -> bool {
        matches!(self, Error::Deletion { .. })
    }
}

fn display_preflight_errors(errors: &[PreflightError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}
