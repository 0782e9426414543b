use crate::error::{self, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use log::{debug, error};
use reqwest::header::CONTENT_TYPE;
use snafu::ResultExt;
use tokio::net::TcpListener;

/// Where plugins send their progress updates.
pub const PROGRESS_PATH: &str = "/progress";

#[derive(Debug, Clone)]
struct RelayState {
    client: reqwest::Client,
    /// The aggregator endpoint updates are forwarded to.
    target: String,
}

/// The progress relay: every request body posted to `/progress` is forwarded verbatim to
/// `target`, and the aggregator's answer is handed back to the plugin.
pub fn router(client: reqwest::Client, target: String) -> Router {
    Router::new()
        .route(PROGRESS_PATH, post(relay_progress))
        .with_state(RelayState { client, target })
}

/// Bind the relay to `port` on every interface.
pub async fn bind(port: u16) -> Result<TcpListener> {
    TcpListener::bind(("0.0.0.0", port))
        .await
        .context(error::BindSnafu { port })
}

/// Serve the relay until the task is dropped.
pub async fn serve(listener: TcpListener, client: reqwest::Client, target: String) -> Result<()> {
    axum::serve(listener, router(client, target))
        .await
        .context(error::ServeSnafu)
}

async fn relay_progress(State(state): State<RelayState>, body: Bytes) -> Response {
    debug!("Relaying {} bytes of progress to '{}'", body.len(), state.target);
    let response = match state
        .client
        .post(&state.target)
        .header(CONTENT_TYPE, "application/json")
        .body(body)
        .send()
        .await
    {
        Ok(response) => response,
        Err(e) => {
            error!("Unable to relay progress to '{}': {}", state.target, e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("unable to reach the aggregator: {}", e),
            )
                .into_response();
        }
    };

    let status = StatusCode::from_u16(response.status().as_u16())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    match response.bytes().await {
        Ok(body) => (status, body).into_response(),
        Err(e) => {
            error!("Unable to read the aggregator's answer: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("unable to read the aggregator's answer: {}", e),
            )
                .into_response()
        }
    }
}
