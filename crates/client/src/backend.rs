//! The seam between the orchestration pipeline and the remote service.
//!
//! [`SeparationBackend`] names the four remote operations a session
//! performs. [`HttpBackend`] implements them over HTTP; tests substitute
//! in-memory fakes.

use async_trait::async_trait;
use stemsplit_core::media::PayloadMetadata;

use crate::broker::{BrokerError, CredentialBroker, UploadTicket};
use crate::config::ClientConfig;
use crate::http::{build_client, join_url};
use crate::launcher::{JobLauncher, LaunchError};
use crate::status::{JobStatusReport, PollError, StatusClient};
use crate::transfer::{TransferClient, TransferError};

/// Remote operations driven by one job session, in call order.
#[async_trait]
pub trait SeparationBackend: Send + Sync {
    /// Obtain an upload URL and session identifiers for `metadata`.
    async fn request_upload(&self, metadata: &PayloadMetadata)
        -> Result<UploadTicket, BrokerError>;

    /// Upload `payload` to the ticket's destination declaring `content_type`.
    async fn transfer(
        &self,
        ticket: &UploadTicket,
        content_type: &str,
        payload: Vec<u8>,
    ) -> Result<(), TransferError>;

    /// Start remote processing of an uploaded payload.
    async fn launch(&self, storage_locator: &str, correlation_id: &str)
        -> Result<(), LaunchError>;

    /// Query the job state once.
    async fn query_status(&self, correlation_id: &str) -> Result<JobStatusReport, PollError>;
}

/// [`SeparationBackend`] over HTTP, sharing one connection pool across all
/// four clients.
pub struct HttpBackend {
    broker: CredentialBroker,
    transfer: TransferClient,
    launcher: JobLauncher,
    status: StatusClient,
}

impl HttpBackend {
    /// Build the clients for the endpoints named in `config`.
    pub fn new(config: &ClientConfig) -> Result<Self, reqwest::Error> {
        let client = build_client(config.request_timeout)?;
        Ok(Self::with_client(client, config))
    }

    /// Build the clients reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, config: &ClientConfig) -> Self {
        Self {
            broker: CredentialBroker::new(
                client.clone(),
                join_url(&config.api_url, &config.upload_url_path),
            ),
            transfer: TransferClient::new(client.clone()),
            launcher: JobLauncher::new(
                client.clone(),
                join_url(&config.api_url, &config.start_job_path),
            ),
            status: StatusClient::new(client, join_url(&config.api_url, &config.job_status_path)),
        }
    }
}

#[async_trait]
impl SeparationBackend for HttpBackend {
    async fn request_upload(
        &self,
        metadata: &PayloadMetadata,
    ) -> Result<UploadTicket, BrokerError> {
        self.broker.request_upload(metadata).await
    }

    async fn transfer(
        &self,
        ticket: &UploadTicket,
        content_type: &str,
        payload: Vec<u8>,
    ) -> Result<(), TransferError> {
        self.transfer.upload(ticket, content_type, payload).await
    }

    async fn launch(&self, storage_locator: &str, correlation_id: &str) -> Result<(), LaunchError> {
        self.launcher.launch(storage_locator, correlation_id).await
    }

    async fn query_status(&self, correlation_id: &str) -> Result<JobStatusReport, PollError> {
        self.status.query(correlation_id).await
    }
}
