//! Delivery dispatcher.
//!
//! Hands each message of a delivery batch to the configured handler, one at a
//! time, in delivery order. The first handler error marks that job failed and
//! aborts the batch: later messages are never handed to the handler and stay
//! leased until the broker redelivers them. Successful handlers are expected to
//! have called `delete()` or `release()` themselves.

use tracing::{debug, info_span, instrument, warn};

use leaseq_core::{
    CompletionState, DeliveryEvent, HandlerError, JobHandle, JobRecord, QueueError, RawMessage,
};

use crate::client::QueueClient;
use crate::job::SqsJob;
use crate::transport::SqsTransport;

/// Handler invoked once per delivered job.
pub type JobHandler = Box<dyn Fn(&mut dyn JobHandle) -> Result<(), HandlerError> + Send + Sync>;

/// Why a batch stopped early.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The handler failed; nothing after `position` was dispatched.
    ///
    /// `report` covers the messages handled before the failing one, so the
    /// caller can tell which of them were already deleted or released.
    #[error("handler failed on message {message_id} at position {position}: {error}")]
    Handler {
        message_id: String,
        position: usize,
        error: HandlerError,
        report: BatchReport,
    },

    /// The delivery event itself could not be read.
    #[error(transparent)]
    Event(#[from] QueueError),
}

impl DispatchError {
    pub fn message_id(&self) -> Option<&str> {
        match self {
            Self::Handler { message_id, .. } => Some(message_id),
            Self::Event(_) => None,
        }
    }

    /// Settlements made before the batch was aborted.
    pub fn partial_report(&self) -> Option<&BatchReport> {
        match self {
            Self::Handler { report, .. } => Some(report),
            Self::Event(_) => None,
        }
    }
}

/// Outcome of a batch that ran to completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct BatchReport {
    pub processed: usize,
    pub deleted: usize,
    pub released: usize,
    /// Handled without delete or release; the lease will expire.
    pub left_pending: usize,
}

impl BatchReport {
    fn record(&mut self, state: CompletionState) {
        self.processed += 1;
        match state {
            CompletionState::Deleted => self.deleted += 1,
            CompletionState::Released => self.released += 1,
            CompletionState::Pending | CompletionState::Failed => self.left_pending += 1,
        }
    }
}

/// Runs a handler over delivery batches for one connection.
pub struct DeliveryDispatcher<T: SqsTransport> {
    client: QueueClient<T>,
    handler: JobHandler,
}

impl<T: SqsTransport> core::fmt::Debug for DeliveryDispatcher<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DeliveryDispatcher")
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}

impl<T: SqsTransport> DeliveryDispatcher<T> {
    pub fn new<F>(client: QueueClient<T>, handler: F) -> Self
    where
        F: Fn(&mut dyn JobHandle) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        Self {
            client,
            handler: Box::new(handler),
        }
    }

    pub fn client(&self) -> &QueueClient<T> {
        &self.client
    }

    /// Dispatch a batch of raw messages sequentially.
    #[instrument(skip(self, messages), err)]
    pub fn dispatch<I>(&self, messages: I) -> Result<BatchReport, DispatchError>
    where
        I: IntoIterator<Item = RawMessage>,
    {
        let mut report = BatchReport::default();

        for (position, raw) in messages.into_iter().enumerate() {
            let record = JobRecord::from_raw(raw);
            let span = info_span!(
                "dispatch_record",
                message_id = %record.message_id,
                queue = %record.queue_name,
                position
            );
            let _entered = span.enter();

            let mut job = SqsJob::new(&self.client, record);
            if let Err(error) = (self.handler)(&mut job) {
                job.fail(&error.to_string());
                warn!(
                    processed = report.processed,
                    "aborting batch; remaining messages stay leased"
                );
                return Err(DispatchError::Handler {
                    message_id: job.job_id().to_string(),
                    position,
                    error,
                    report,
                });
            }

            if !job.is_deleted_or_released() {
                debug!("handler returned without delete or release");
            }
            report.record(job.state());
        }

        Ok(report)
    }

    pub fn dispatch_event(&self, event: DeliveryEvent) -> Result<BatchReport, DispatchError> {
        self.dispatch(event.records)
    }

    /// Parse a `{"Records": [...]}` delivery event and dispatch it.
    pub fn dispatch_json(&self, json: &str) -> Result<BatchReport, DispatchError> {
        let event = DeliveryEvent::from_json(json)?;
        self.dispatch_event(event)
    }
}
