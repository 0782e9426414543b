use crate::error::{self, Result};
use log::{info, warn};
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use reqwest::Client;
use snafu::{ensure, ResultExt};
use std::path::Path;
use std::time::Duration;

const UPLOAD_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Whether a plugin produces one result for the cluster or one per node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultScope {
    Global,
    Node(String),
}

/// The aggregator endpoint a result is uploaded to.
pub fn result_url(aggregator_url: &str, scope: &ResultScope, result_type: &str) -> String {
    api_url(aggregator_url, "results", scope, result_type)
}

/// The aggregator endpoint progress updates are forwarded to.
pub fn progress_url(aggregator_url: &str, scope: &ResultScope, result_type: &str) -> String {
    api_url(aggregator_url, "progress", scope, result_type)
}

fn api_url(aggregator_url: &str, kind: &str, scope: &ResultScope, result_type: &str) -> String {
    let base = aggregator_url.trim_end_matches('/');
    match scope {
        ResultScope::Global => format!("{}/api/v1/{}/global/{}", base, kind, result_type),
        ResultScope::Node(node) => {
            format!("{}/api/v1/{}/by-node/{}/{}", base, kind, node, result_type)
        }
    }
}

/// The MIME type the aggregator uses to decide how to store a result.
pub fn mime_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .map(|extension| extension.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "xml" => "application/xml",
        "json" => "application/json",
        "tar" => "application/x-tar",
        "gz" | "tgz" => "application/gzip",
        _ => "application/octet-stream",
    }
}

/// POST the result at `path` to `url`. Transport failures are retried a few times.
pub async fn upload_result(client: &Client, url: &str, path: &Path) -> Result<()> {
    let data = tokio::fs::read(path).await.context(error::FileSnafu {
        action: "read",
        path,
    })?;
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();

    let mut attempt = 1;
    loop {
        let response = client
            .post(url)
            .header(CONTENT_TYPE, mime_type(path))
            .header(
                CONTENT_DISPOSITION,
                format!("attachment;filename={}", filename),
            )
            .body(data.clone())
            .send()
            .await;
        match response {
            Ok(response) => {
                let status = response.status();
                ensure!(
                    status.is_success(),
                    error::UploadStatusSnafu {
                        url,
                        status: status.as_u16()
                    }
                );
                info!("Uploaded '{}' to '{}'", path.display(), url);
                return Ok(());
            }
            Err(e) if attempt < UPLOAD_ATTEMPTS => {
                warn!(
                    "Upload attempt {} of '{}' failed, retrying: {}",
                    attempt,
                    path.display(),
                    e
                );
                attempt += 1;
                tokio::time::sleep(RETRY_DELAY).await;
            }
            Err(source) => return Err(source).context(error::UploadSnafu { url }),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn urls() {
        assert_eq!(
            result_url("https://10.0.0.12:8080/", &ResultScope::Global, "e2e"),
            "https://10.0.0.12:8080/api/v1/results/global/e2e"
        );
        assert_eq!(
            result_url(
                "https://10.0.0.12:8080",
                &ResultScope::Node("node-1".to_string()),
                "systemd-logs"
            ),
            "https://10.0.0.12:8080/api/v1/results/by-node/node-1/systemd-logs"
        );
        assert_eq!(
            progress_url("http://aggregator:8080", &ResultScope::Global, "e2e"),
            "http://aggregator:8080/api/v1/progress/global/e2e"
        );
    }

    #[test]
    fn mime_types() {
        assert_eq!(mime_type(Path::new("junit_01.xml")), "application/xml");
        assert_eq!(mime_type(Path::new("report.JSON")), "application/json");
        assert_eq!(mime_type(Path::new("results.tar")), "application/x-tar");
        assert_eq!(mime_type(Path::new("results.tar.gz")), "application/gzip");
        assert_eq!(mime_type(Path::new("results.tgz")), "application/gzip");
        assert_eq!(mime_type(Path::new("results")), "application/octet-stream");
    }
}
