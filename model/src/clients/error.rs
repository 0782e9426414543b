use crate::clients::{ErrorClass, HttpStatusCode, StatusCode};
use snafu::Snafu;

/// The `Result` type returned by `clients`.
pub type Result<T> = std::result::Result<T, Error>;

/// The public error type returned by `clients`.
#[derive(Debug, Snafu)]
pub struct Error(InnerError);

/// The private error type returned by `clients`.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(super)))]
pub(crate) enum InnerError {
    #[snafu(display("Error initializing the Kubernetes client: {}", source))]
    Initialization { source: kube::Error },

    #[snafu(display("Unable to read kubeconfig: {}", source))]
    Kubeconfig {
        source: kube::config::KubeconfigError,
    },

    #[snafu(display("Unable to {} {}: {}", method, what, source))]
    KubeApiCall {
        method: String,
        what: String,
        source: kube::Error,
    },

    #[snafu(display("Unable to {} for '{}': {}", operation, name, source))]
    KubeApiCallFor {
        /// What we were trying to do, e.g. 'stream logs'.
        operation: String,
        /// The name of the k8s object we were trying to do this for, e.g. 'sonobuoy'.
        name: String,
        /// The error from kube-rs.
        source: kube::Error,
    },

    #[snafu(display("Unable to map '{}' kind '{}' to a resource: {}", api_version, kind, source))]
    Discovery {
        api_version: String,
        kind: String,
        source: kube::Error,
    },

    #[snafu(display("Unable to watch pods in '{}': {}", namespace, source))]
    Watch {
        namespace: String,
        source: kube::runtime::watcher::Error,
    },

    #[snafu(display("The exec session for '{}' did not provide {}", pod, what))]
    MissingStream { pod: String, what: String },

    #[snafu(display("{}", message))]
    Custom { class: ErrorClass, message: String },
}

impl Error {
    /// Create an error for a gateway that is not backed by `kube`, e.g. a test double.
    pub fn new<S>(class: ErrorClass, message: S) -> Self
    where
        S: Into<String>,
    {
        Error(InnerError::Custom {
            class,
            message: message.into(),
        })
    }

    /// The class of this failure, which callers use to decide between no-op, retry and surface.
    pub fn class(&self) -> ErrorClass {
        match &self.0 {
            InnerError::Custom { class, .. } => *class,
            _ => ErrorClass::from_status(self),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.class() == ErrorClass::NotFound
    }
}

impl HttpStatusCode for InnerError {
    fn status_code(&self) -> Option<StatusCode> {
        match self {
            InnerError::Initialization { source }
            | InnerError::KubeApiCall { source, .. }
            | InnerError::KubeApiCallFor { source, .. }
            | InnerError::Discovery { source, .. } => source.status_code(),
            InnerError::Kubeconfig { .. }
            | InnerError::Watch { .. }
            | InnerError::MissingStream { .. }
            | InnerError::Custom { .. } => None,
        }
    }

    fn status_reason(&self) -> Option<&str> {
        match self {
            InnerError::Initialization { source }
            | InnerError::KubeApiCall { source, .. }
            | InnerError::KubeApiCallFor { source, .. }
            | InnerError::Discovery { source, .. } => source.status_reason(),
            InnerError::Kubeconfig { .. }
            | InnerError::Watch { .. }
            | InnerError::MissingStream { .. }
            | InnerError::Custom { .. } => None,
        }
    }
}

impl HttpStatusCode for Error {
    fn status_code(&self) -> Option<StatusCode> {
        self.0.status_code()
    }

    fn status_reason(&self) -> Option<&str> {
        self.0.status_reason()
    }
}
