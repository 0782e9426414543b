mod error;
mod gateway;
mod http_status_code;
mod kube_gateway;

pub use error::{Error, Result};
pub use gateway::{ByteStream, ClusterGateway, PodStream, ResourceMapping};
pub use http_status_code::{ErrorClass, HttpStatusCode, StatusCode};
pub use kube_gateway::KubeGateway;
