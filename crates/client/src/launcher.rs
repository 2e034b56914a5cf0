//! Job launcher client.
//!
//! Starts remote separation of an uploaded payload. The endpoint is not
//! idempotent: every successful call may start a new job, so callers must
//! invoke it at most once per session.

use serde::Serialize;

use crate::http::{ensure_success, StatusFailure};

/// Errors from the job launcher.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("Failed to start processing: {0}")]
    Request(#[from] reqwest::Error),

    /// The launcher returned a non-2xx status code.
    #[error("Failed to start processing ({status}): {body}")]
    Status { status: u16, body: String },
}

impl From<StatusFailure> for LaunchError {
    fn from(failure: StatusFailure) -> Self {
        Self::Status {
            status: failure.status,
            body: failure.body,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StartJobRequest<'a> {
    s3_key: &'a str,
    session_id: &'a str,
}

/// HTTP client for the job launcher endpoint.
pub struct JobLauncher {
    client: reqwest::Client,
    endpoint: String,
}

impl JobLauncher {
    /// * `endpoint` - full URL of the launcher, e.g. `http://host:8000/start-job`.
    pub fn new(client: reqwest::Client, endpoint: String) -> Self {
        Self { client, endpoint }
    }

    /// Ask the remote system to process the object at `storage_locator`
    /// for session `correlation_id`. The response body is ignored.
    pub async fn launch(
        &self,
        storage_locator: &str,
        correlation_id: &str,
    ) -> Result<(), LaunchError> {
        let body = StartJobRequest {
            s3_key: storage_locator,
            session_id: correlation_id,
        };

        let response = self.client.post(&self.endpoint).json(&body).send().await?;
        ensure_success(response).await?;

        tracing::info!(session_id = %correlation_id, s3_key = %storage_locator, "Remote job started");
        Ok(())
    }
}
