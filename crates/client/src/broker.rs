//! Credential broker client.
//!
//! Asks the API for a short-lived upload URL for one payload. The broker
//! answers with the session identifier used by every later call, the
//! pre-authorized destination URL and the storage key the payload will
//! live under.

use serde::{Deserialize, Serialize};
use stemsplit_core::media::PayloadMetadata;

use crate::http::{ensure_success, is_http_url, non_blank, StatusFailure};

/// Everything needed to upload one payload and address its job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTicket {
    /// `sessionId` issued by the broker.
    pub correlation_id: String,
    /// Pre-authorized `uploadUrl` for a direct `PUT`.
    pub destination_url: String,
    /// `s3Key` of the uploaded object.
    pub storage_locator: String,
    /// Content type the URL was issued for. The upload must declare
    /// exactly this type.
    pub content_type: String,
}

/// Errors from the credential broker. Every message mentions the upload
/// URL so a failed session explains which step broke.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("Failed to get upload URL: {0}")]
    Request(#[from] reqwest::Error),

    /// The broker returned a non-2xx status code.
    #[error("Failed to get upload URL ({status}): {body}")]
    Status { status: u16, body: String },

    /// The broker answered 2xx but the body has the wrong shape.
    #[error("Failed to get upload URL: invalid response: {0}")]
    InvalidResponse(String),
}

impl From<StatusFailure> for BrokerError {
    fn from(failure: StatusFailure) -> Self {
        Self::Status {
            status: failure.status,
            body: failure.body,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadUrlRequest<'a> {
    file_name: &'a str,
    file_type: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadUrlResponse {
    session_id: Option<String>,
    upload_url: Option<String>,
    s3_key: Option<String>,
}

/// HTTP client for the credential broker endpoint.
pub struct CredentialBroker {
    client: reqwest::Client,
    endpoint: String,
}

impl CredentialBroker {
    /// * `endpoint` - full URL of the broker, e.g. `http://host:8000/upload-url`.
    pub fn new(client: reqwest::Client, endpoint: String) -> Self {
        Self { client, endpoint }
    }

    /// Request an upload URL for `metadata`. One attempt, no retries.
    pub async fn request_upload(
        &self,
        metadata: &PayloadMetadata,
    ) -> Result<UploadTicket, BrokerError> {
        let body = UploadUrlRequest {
            file_name: &metadata.file_name,
            file_type: &metadata.content_type,
        };

        let response = self.client.post(&self.endpoint).json(&body).send().await?;
        let response = ensure_success(response).await?;
        let bytes = response.bytes().await?;

        let raw: UploadUrlResponse = serde_json::from_slice(&bytes)
            .map_err(|e| BrokerError::InvalidResponse(e.to_string()))?;
        let ticket = parse_ticket(raw, &metadata.content_type)?;

        tracing::debug!(
            session_id = %ticket.correlation_id,
            s3_key = %ticket.storage_locator,
            "Upload URL issued",
        );

        Ok(ticket)
    }
}

/// Validate the broker's answer and pair it with the requested content type.
fn parse_ticket(raw: UploadUrlResponse, content_type: &str) -> Result<UploadTicket, BrokerError> {
    let missing = |field: &str| BrokerError::InvalidResponse(format!("missing '{field}'"));

    let correlation_id = non_blank(raw.session_id).ok_or_else(|| missing("sessionId"))?;
    let destination_url = non_blank(raw.upload_url).ok_or_else(|| missing("uploadUrl"))?;
    let storage_locator = non_blank(raw.s3_key).ok_or_else(|| missing("s3Key"))?;

    if !is_http_url(&destination_url) {
        return Err(BrokerError::InvalidResponse(format!(
            "'uploadUrl' is not an http(s) URL: '{destination_url}'"
        )));
    }

    Ok(UploadTicket {
        correlation_id,
        destination_url,
        storage_locator,
        content_type: content_type.to_string(),
    })
}
