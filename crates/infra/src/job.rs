//! Lifecycle of one delivered job.
//!
//! An `SqsJob` wraps a [`JobRecord`] and the client it was delivered
//! through. Handlers settle it by calling `delete()` (done) or
//! `release(delay)` (retry later); both go straight to the broker before the
//! handler returns. Nothing is acknowledged implicitly.
//!
//! Address paths differ on purpose:
//!
//! - `release` targets the record's origin address
//! - `delete` re-resolves the logical queue name through the configured
//!   prefix (or, without one, through the resolver)
//!
//! so a configured prefix must point at the same endpoint the broker
//! delivers from.

use serde::de::DeserializeOwned;
use tracing::{error, instrument, warn};

use leaseq_core::{CompletionState, JobHandle, JobPayload, JobRecord, QueueResult};

use crate::client::QueueClient;
use crate::transport::SqsTransport;

/// One delivered job bound to the client that settles it.
pub struct SqsJob<'a, T: SqsTransport> {
    client: &'a QueueClient<T>,
    record: JobRecord,
}

impl<T: SqsTransport> core::fmt::Debug for SqsJob<'_, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SqsJob").field("record", &self.record).finish()
    }
}

impl<'a, T: SqsTransport> SqsJob<'a, T> {
    pub fn new(client: &'a QueueClient<T>, record: JobRecord) -> Self {
        Self { client, record }
    }

    /// Report (and delete from) `queue` instead of the derived queue name.
    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.record = self.record.with_queue_name(queue);
        self
    }

    pub fn record(&self) -> &JobRecord {
        &self.record
    }

    pub fn into_record(self) -> JobRecord {
        self.record
    }

    pub fn receipt_handle(&self) -> &str {
        &self.record.receipt_handle
    }

    pub fn source_address(&self) -> &str {
        &self.record.source_address
    }

    /// Decode the body as a payload written by `SqsQueue::push`.
    pub fn payload(&self) -> QueueResult<JobPayload> {
        JobPayload::from_json(&self.record.body)
    }

    /// Decode the job data carried inside the payload.
    pub fn data<J: DeserializeOwned>(&self) -> QueueResult<J> {
        self.payload()?.data_as()
    }

    fn delete_address(&self) -> QueueResult<String> {
        match self.client.resolver().prefixed(&self.record.queue_name) {
            Some(address) => Ok(address),
            None => self.client.resolve(Some(&self.record.queue_name)),
        }
    }

    /// Whether settling as `target` would contradict an earlier settlement.
    ///
    /// Repeating the same settlement still goes to the broker; switching
    /// between delete and release is logged and skipped.
    fn conflicts_with(&self, action: &str, target: CompletionState) -> bool {
        let state = self.record.completion_state;
        if !state.is_settled() {
            return false;
        }
        warn!(
            message_id = %self.record.message_id,
            state = ?state,
            action,
            "job already deleted or released; receipt handle reused"
        );
        state != target
    }

    /// Turn a stale-lease failure into a logged no-op.
    fn tolerate_stale_lease(&self, action: &str, result: QueueResult<()>) -> QueueResult<()> {
        match result {
            Err(e) if e.is_invalid_receipt_handle() => {
                warn!(
                    message_id = %self.record.message_id,
                    queue = %self.record.queue_name,
                    action,
                    error = %e,
                    "lease already gone; treating as done"
                );
                Ok(())
            }
            other => other,
        }
    }
}

impl<T: SqsTransport> JobHandle for SqsJob<'_, T> {
    fn job_id(&self) -> &str {
        &self.record.message_id
    }

    fn attempts(&self) -> QueueResult<u32> {
        self.record.receive_count()
    }

    fn raw_body(&self) -> &str {
        &self.record.body
    }

    fn queue(&self) -> &str {
        &self.record.queue_name
    }

    fn connection_name(&self) -> &str {
        &self.client.config().connection_name
    }

    #[instrument(skip(self), fields(message_id = %self.record.message_id, queue = %self.record.queue_name), err)]
    fn delete(&mut self) -> QueueResult<()> {
        if self.conflicts_with("delete", CompletionState::Deleted) {
            return Ok(());
        }
        self.record.completion_state = CompletionState::Deleted;

        let address = self.delete_address()?;
        let result = self
            .client
            .delete_message(&address, &self.record.receipt_handle);
        self.tolerate_stale_lease("delete", result)
    }

    #[instrument(skip(self), fields(message_id = %self.record.message_id, queue = %self.record.queue_name), err)]
    fn release(&mut self, delay_seconds: u32) -> QueueResult<()> {
        if self.conflicts_with("release", CompletionState::Released) {
            return Ok(());
        }
        self.record.completion_state = CompletionState::Released;

        let result = self.client.change_visibility(
            &self.record.source_address,
            &self.record.receipt_handle,
            delay_seconds,
        );
        self.tolerate_stale_lease("release", result)
    }

    fn fail(&mut self, reason: &str) {
        error!(
            message_id = %self.record.message_id,
            queue = %self.record.queue_name,
            attempts = ?self.record.receive_count().ok(),
            reason,
            "job failed; leaving lease to expire"
        );
        self.record.completion_state = CompletionState::Failed;
    }

    fn state(&self) -> CompletionState {
        self.record.completion_state
    }
}
