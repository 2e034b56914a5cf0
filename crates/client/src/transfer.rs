//! Direct upload of a payload to its pre-authorized destination.
//!
//! The destination URL is signed for one content type. The `Content-Type`
//! header of the upload must repeat that type byte for byte, otherwise the
//! storage service rejects the request. A mismatch is caught here before
//! any bytes leave the process.

use reqwest::header::CONTENT_TYPE;

use crate::broker::UploadTicket;
use crate::http::{ensure_success, StatusFailure};

/// Errors from the direct upload.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("Upload failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The storage service returned a non-2xx status code.
    #[error("Upload rejected by storage ({status}): {body}")]
    Status { status: u16, body: String },

    /// The declared content type differs from the one the URL was issued for.
    #[error("Upload rejected: content type '{declared}' does not match issued type '{issued}'")]
    ContentTypeMismatch { issued: String, declared: String },
}

impl From<StatusFailure> for TransferError {
    fn from(failure: StatusFailure) -> Self {
        Self::Status {
            status: failure.status,
            body: failure.body,
        }
    }
}

/// HTTP client performing the single `PUT` to object storage.
pub struct TransferClient {
    client: reqwest::Client,
}

impl TransferClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Upload `payload` to the ticket's destination, declaring
    /// `content_type`. One attempt, no retries, no resume.
    pub async fn upload(
        &self,
        ticket: &UploadTicket,
        content_type: &str,
        payload: Vec<u8>,
    ) -> Result<(), TransferError> {
        if content_type != ticket.content_type {
            return Err(TransferError::ContentTypeMismatch {
                issued: ticket.content_type.clone(),
                declared: content_type.to_string(),
            });
        }

        let size_bytes = payload.len();
        let response = self
            .client
            .put(&ticket.destination_url)
            .header(CONTENT_TYPE, content_type)
            .body(payload)
            .send()
            .await?;
        ensure_success(response).await?;

        tracing::debug!(
            session_id = %ticket.correlation_id,
            size_bytes,
            "Payload uploaded",
        );
        Ok(())
    }
}
