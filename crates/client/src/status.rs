//! Job status query and response interpretation.
//!
//! The status endpoint answers with a loosely-shaped JSON object
//! (`{"status": "...", "output_files": [...], "error_message": "..."}`).
//! [`interpret`] turns it into a [`JobStatusReport`], rejecting shapes the
//! pipeline cannot act on instead of guessing.

use serde::Deserialize;
use stemsplit_core::job_status::{JOB_COMPLETED, JOB_FAILED};
use stemsplit_core::session::OutputArtifact;

use crate::http::{ensure_success, is_http_url, non_blank, StatusFailure};

/// Typed result of one status query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatusReport {
    /// Non-terminal (`PENDING`, `RUNNING`, ...).
    InProgress {
        status: String,
        message: Option<String>,
    },
    /// Terminal success with the artifacts in the order reported.
    Completed { artifacts: Vec<OutputArtifact> },
    /// Terminal failure reported by the remote job itself.
    Failed { reason: String },
}

impl JobStatusReport {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress { .. })
    }
}

/// Errors from a single status query. A poll error means this query got
/// no usable answer, not that the job failed.
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("Failed to get job status: {0}")]
    Request(#[from] reqwest::Error),

    /// The status endpoint returned a non-2xx status code.
    #[error("Failed to get job status ({status}): {body}")]
    Status { status: u16, body: String },

    /// The status endpoint answered 2xx but the body has the wrong shape.
    #[error("Invalid job status response: {0}")]
    InvalidResponse(String),
}

impl From<StatusFailure> for PollError {
    fn from(failure: StatusFailure) -> Self {
        Self::Status {
            status: failure.status,
            body: failure.body,
        }
    }
}

/// Raw status payload as sent by the service.
#[derive(Debug, Default, Deserialize)]
pub struct StatusResponse {
    pub status: Option<String>,
    pub output_files: Option<Vec<OutputFile>>,
    pub error_message: Option<String>,
    /// Optional human-readable progress text.
    pub message: Option<String>,
}

/// One entry of `output_files`.
#[derive(Debug, Deserialize)]
pub struct OutputFile {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub s3_url: Option<String>,
}

/// Validate a raw status payload into a [`JobStatusReport`].
///
/// * `status` must be present and non-blank.
/// * `COMPLETED` requires `output_files`, each with a `type` and an
///   http(s) `s3_url`.
/// * `FAILED` requires a non-blank `error_message`.
/// * Any other status is progress; `message` is carried along if present.
pub fn interpret(raw: StatusResponse) -> Result<JobStatusReport, PollError> {
    let status = non_blank(raw.status)
        .ok_or_else(|| PollError::InvalidResponse("missing 'status'".to_string()))?;

    match status.as_str() {
        JOB_COMPLETED => {
            let files = raw.output_files.ok_or_else(|| {
                PollError::InvalidResponse("COMPLETED status without 'output_files'".to_string())
            })?;
            let artifacts = files
                .into_iter()
                .enumerate()
                .map(|(idx, file)| parse_output_file(idx, file))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(JobStatusReport::Completed { artifacts })
        }
        JOB_FAILED => {
            let reason = non_blank(raw.error_message).ok_or_else(|| {
                PollError::InvalidResponse("FAILED status without 'error_message'".to_string())
            })?;
            Ok(JobStatusReport::Failed { reason })
        }
        _ => Ok(JobStatusReport::InProgress {
            status,
            message: non_blank(raw.message),
        }),
    }
}

fn parse_output_file(idx: usize, file: OutputFile) -> Result<OutputArtifact, PollError> {
    let kind = non_blank(file.kind)
        .ok_or_else(|| PollError::InvalidResponse(format!("output_files[{idx}] missing 'type'")))?;
    let locator = non_blank(file.s3_url).ok_or_else(|| {
        PollError::InvalidResponse(format!("output_files[{idx}] missing 's3_url'"))
    })?;
    if !is_http_url(&locator) {
        return Err(PollError::InvalidResponse(format!(
            "output_files[{idx}] 's3_url' is not an http(s) URL: '{locator}'"
        )));
    }
    Ok(OutputArtifact { kind, locator })
}

/// HTTP client for the job status endpoint.
pub struct StatusClient {
    client: reqwest::Client,
    endpoint: String,
}

impl StatusClient {
    /// * `endpoint` - full URL of the status endpoint, e.g. `http://host:8000/job-status`.
    pub fn new(client: reqwest::Client, endpoint: String) -> Self {
        Self { client, endpoint }
    }

    /// Perform one status query for `correlation_id`.
    pub async fn query(&self, correlation_id: &str) -> Result<JobStatusReport, PollError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("session_id", correlation_id)])
            .send()
            .await?;
        let response = ensure_success(response).await?;
        let bytes = response.bytes().await?;

        let raw: StatusResponse = serde_json::from_slice(&bytes)
            .map_err(|e| PollError::InvalidResponse(e.to_string()))?;
        interpret(raw)
    }
}
