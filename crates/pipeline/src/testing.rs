//! In-memory [`SeparationBackend`] for orchestrator and poller tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use stemsplit_client::backend::SeparationBackend;
use stemsplit_client::broker::{BrokerError, UploadTicket};
use stemsplit_client::launcher::LaunchError;
use stemsplit_client::status::{JobStatusReport, PollError};
use stemsplit_client::transfer::TransferError;
use stemsplit_core::media::PayloadMetadata;
use stemsplit_core::session::OutputArtifact;
use tokio::sync::Notify;
use tokio::time::Instant;

pub(crate) fn running() -> JobStatusReport {
    JobStatusReport::InProgress {
        status: "RUNNING".into(),
        message: None,
    }
}

pub(crate) fn completed() -> JobStatusReport {
    JobStatusReport::Completed {
        artifacts: vec![OutputArtifact::new("vocals", "https://x/vocals.wav")],
    }
}

pub(crate) fn failed(reason: &str) -> JobStatusReport {
    JobStatusReport::Failed {
        reason: reason.into(),
    }
}

/// Scripted backend. Tickets are numbered per broker call (`s1`/`k1`,
/// `s2`/`k2`, ...). Once the scripted reports run out every query answers
/// `RUNNING`.
#[derive(Default)]
pub(crate) struct FakeBackend {
    fail_broker: bool,
    fail_transfer: bool,
    fail_launch: bool,
    issued_content_type: Option<String>,
    broker_gate: Option<Arc<Notify>>,
    query_delay: Option<Duration>,
    reports: Mutex<VecDeque<Result<JobStatusReport, PollError>>>,

    broker_calls: AtomicUsize,
    transfer_calls: AtomicUsize,
    launch_calls: AtomicUsize,
    status_calls: AtomicUsize,
    status_call_times: Mutex<Vec<Instant>>,
    queried_ids: Mutex<Vec<String>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: AtomicUsize,
}

impl FakeBackend {
    pub(crate) fn with_reports(self, reports: Vec<Result<JobStatusReport, PollError>>) -> Self {
        *self.reports.lock().unwrap() = reports.into();
        self
    }

    pub(crate) fn with_query_delay(mut self, delay: Duration) -> Self {
        self.query_delay = Some(delay);
        self
    }

    pub(crate) fn failing_broker(mut self) -> Self {
        self.fail_broker = true;
        self
    }

    pub(crate) fn failing_transfer(mut self) -> Self {
        self.fail_transfer = true;
        self
    }

    pub(crate) fn failing_launch(mut self) -> Self {
        self.fail_launch = true;
        self
    }

    /// Issue tickets signed for `content_type` regardless of the request.
    pub(crate) fn issuing_content_type(mut self, content_type: &str) -> Self {
        self.issued_content_type = Some(content_type.to_string());
        self
    }

    /// Hold every broker call until `gate` is notified.
    pub(crate) fn with_broker_gate(mut self, gate: Arc<Notify>) -> Self {
        self.broker_gate = Some(gate);
        self
    }

    pub(crate) fn broker_calls(&self) -> usize {
        self.broker_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn transfer_calls(&self) -> usize {
        self.transfer_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn launch_calls(&self) -> usize {
        self.launch_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn status_call_times(&self) -> Vec<Instant> {
        self.status_call_times.lock().unwrap().clone()
    }

    pub(crate) fn queried_ids(&self) -> Vec<String> {
        self.queried_ids.lock().unwrap().clone()
    }

    pub(crate) fn max_queries_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

/// Decrements the in-flight counter even when the query future is dropped.
struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl SeparationBackend for FakeBackend {
    async fn request_upload(
        &self,
        metadata: &PayloadMetadata,
    ) -> Result<UploadTicket, BrokerError> {
        let n = self.broker_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(gate) = &self.broker_gate {
            gate.notified().await;
        }
        if self.fail_broker {
            return Err(BrokerError::Status {
                status: 500,
                body: "broker unavailable".into(),
            });
        }
        Ok(UploadTicket {
            correlation_id: format!("s{n}"),
            destination_url: "https://x/put".into(),
            storage_locator: format!("k{n}"),
            content_type: self
                .issued_content_type
                .clone()
                .unwrap_or_else(|| metadata.content_type.clone()),
        })
    }

    async fn transfer(
        &self,
        ticket: &UploadTicket,
        content_type: &str,
        _payload: Vec<u8>,
    ) -> Result<(), TransferError> {
        self.transfer_calls.fetch_add(1, Ordering::SeqCst);
        if content_type != ticket.content_type {
            return Err(TransferError::ContentTypeMismatch {
                issued: ticket.content_type.clone(),
                declared: content_type.to_string(),
            });
        }
        if self.fail_transfer {
            return Err(TransferError::Status {
                status: 403,
                body: "SignatureDoesNotMatch".into(),
            });
        }
        Ok(())
    }

    async fn launch(&self, _storage_locator: &str, _correlation_id: &str) -> Result<(), LaunchError> {
        self.launch_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_launch {
            return Err(LaunchError::Status {
                status: 503,
                body: "endpoint busy".into(),
            });
        }
        Ok(())
    }

    async fn query_status(&self, correlation_id: &str) -> Result<JobStatusReport, PollError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.status_call_times.lock().unwrap().push(Instant::now());
        self.queried_ids
            .lock()
            .unwrap()
            .push(correlation_id.to_string());

        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);
        let _guard = InFlight(self.in_flight.clone());

        if let Some(delay) = self.query_delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.reports.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(running()))
    }
}
