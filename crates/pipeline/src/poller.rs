//! Fixed-cadence status polling.
//!
//! [`StatusPoller`] queries the job status every `interval`, starting
//! immediately, and hands each result to a [`PollSink`]. Ticks are
//! serialized: the query is awaited inside the tick and ticks that fall
//! due meanwhile are skipped, so at most one query is in flight.
//!
//! A terminal report or a failed query cancels the poller's token before
//! the result is delivered, so the sink always observes a stopped timer
//! when it applies a terminal transition.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use stemsplit_client::backend::SeparationBackend;
use stemsplit_client::status::{JobStatusReport, PollError};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// What the poller should do after a result was delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollFlow {
    Continue,
    Stop,
}

/// Receiver of poll results.
#[async_trait]
pub trait PollSink: Send + Sync + 'static {
    async fn deliver(&self, result: Result<JobStatusReport, PollError>) -> PollFlow;
}

/// Owned handle to a running poll task.
///
/// Dropping the handle does not stop the task; call [`stop`](Self::stop).
pub struct PollerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Signal the poll loop to exit. An in-flight query is abandoned.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the task and wait up to `timeout` for it to exit.
    pub async fn join(self, timeout: Duration) {
        self.cancel.cancel();
        if tokio::time::timeout(timeout, self.task).await.is_err() {
            tracing::warn!(
                timeout_ms = timeout.as_millis() as u64,
                "Poll task did not exit in time",
            );
        }
    }
}

/// Polls one job until it reaches a terminal state or is cancelled.
pub struct StatusPoller {
    backend: Arc<dyn SeparationBackend>,
    correlation_id: String,
    interval: Duration,
}

impl StatusPoller {
    pub fn new(
        backend: Arc<dyn SeparationBackend>,
        correlation_id: String,
        interval: Duration,
    ) -> Self {
        Self {
            backend,
            correlation_id,
            interval,
        }
    }

    /// Spawn the poll loop as a Tokio task governed by `cancel`.
    pub fn spawn<S: PollSink>(self, cancel: CancellationToken, sink: S) -> PollerHandle {
        let task = tokio::spawn(self.run(cancel.clone(), sink));
        PollerHandle { cancel, task }
    }

    /// Run the poll loop until a terminal result, a sink-requested stop or
    /// cancellation.
    pub async fn run<S: PollSink>(self, cancel: CancellationToken, sink: S) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            session_id = %self.correlation_id,
            interval_ms = self.interval.as_millis() as u64,
            "Status polling started",
        );

        let mut ticks = 0u64;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            ticks += 1;

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = self.backend.query_status(&self.correlation_id) => result,
            };

            let terminal = match &result {
                Ok(report) => report.is_terminal(),
                Err(_) => true,
            };
            if terminal {
                cancel.cancel();
            }

            if sink.deliver(result).await == PollFlow::Stop || terminal {
                break;
            }
        }

        tracing::info!(session_id = %self.correlation_id, ticks, "Status polling stopped");
    }
}
