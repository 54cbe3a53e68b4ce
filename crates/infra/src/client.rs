//! Queue client: the six broker primitives the job layer needs.
//!
//! Every call takes an already resolved address, is issued exactly once and
//! is never retried here. Retrying a delete or a visibility change blindly
//! could act on a lease that has since expired and been handed to another
//! consumer; retry policy belongs to the caller.

use std::sync::Arc;

use tracing::instrument;

use leaseq_core::{QueueConfig, QueueError, QueueResult, RECEIVE_COUNT_ATTRIBUTE, RawMessage, SendOptions};

use crate::resolver::QueueAddressResolver;
use crate::transport::{
    MAX_RECEIVE_BATCH, Message, QueueAttributeName, ReceiveMessageRequest, SendMessageRequest, SqsTransport,
    TransportError,
};

/// Thin wrapper over a broker transport plus its connection descriptor.
///
/// Cheap to clone: transport and configuration are shared behind `Arc` and
/// never mutated after construction.
pub struct QueueClient<T: SqsTransport> {
    transport: Arc<T>,
    config: Arc<QueueConfig>,
    resolver: QueueAddressResolver<T>,
}

impl<T: SqsTransport> Clone for QueueClient<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            config: self.config.clone(),
            resolver: self.resolver.clone(),
        }
    }
}

impl<T: SqsTransport> core::fmt::Debug for QueueClient<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("QueueClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<T: SqsTransport> QueueClient<T> {
    /// Validate `config` and build a client over `transport`.
    pub fn new(transport: Arc<T>, config: QueueConfig) -> QueueResult<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let resolver = QueueAddressResolver::new(transport.clone(), config.clone());

        Ok(Self {
            transport,
            config,
            resolver,
        })
    }

    /// Cache broker-side address lookups for the lifetime of this client.
    pub fn with_lookup_cache(mut self) -> Self {
        self.resolver = self.resolver.with_lookup_cache();
        self
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn resolver(&self) -> &QueueAddressResolver<T> {
        &self.resolver
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Shorthand for `self.resolver().resolve(queue)`.
    pub fn resolve(&self, queue: Option<&str>) -> QueueResult<String> {
        self.resolver.resolve(queue)
    }

    /// Send one message; returns the broker-assigned message id.
    #[instrument(skip(self, body, options), fields(queue_url = %address, delay = ?options.delay_seconds), err)]
    pub fn enqueue(&self, address: &str, body: &str, options: SendOptions) -> QueueResult<String> {
        self.transport
            .send_message(SendMessageRequest {
                queue_url: address.to_string(),
                message_body: body.to_string(),
                delay_seconds: options.delay_seconds,
                message_attributes: options.attributes,
            })
            .map_err(|e| map_transport_error("SendMessage", e))
    }

    /// Receive up to `max_messages` (clamped to 1..=10) messages.
    ///
    /// Always asks for the receive-count attribute. An empty batch is not an
    /// error.
    #[instrument(skip(self), fields(queue_url = %address), err)]
    pub fn receive(&self, address: &str, max_messages: u32) -> QueueResult<ReceivedBatch> {
        let messages = self
            .transport
            .receive_message(ReceiveMessageRequest {
                queue_url: address.to_string(),
                attribute_names: vec![RECEIVE_COUNT_ATTRIBUTE.to_string()],
                max_number_of_messages: max_messages.clamp(1, MAX_RECEIVE_BATCH),
                visibility_timeout: None,
            })
            .map_err(|e| map_transport_error("ReceiveMessage", e))?;

        Ok(ReceivedBatch::new(address, messages))
    }

    /// Delete a message by receipt handle.
    ///
    /// A stale or already consumed handle yields
    /// [`QueueError::InvalidReceiptHandle`]; callers treat that as deleted.
    #[instrument(skip(self, receipt_handle), fields(queue_url = %address), err)]
    pub fn delete_message(&self, address: &str, receipt_handle: &str) -> QueueResult<()> {
        self.transport
            .delete_message(address, receipt_handle)
            .map_err(|e| map_transport_error("DeleteMessage", e))
    }

    /// Set the remaining lease of a delivery; `0` makes it deliverable now.
    #[instrument(skip(self, receipt_handle), fields(queue_url = %address), err)]
    pub fn change_visibility(
        &self,
        address: &str,
        receipt_handle: &str,
        timeout_seconds: u32,
    ) -> QueueResult<()> {
        self.transport
            .change_message_visibility(address, receipt_handle, timeout_seconds)
            .map_err(|e| map_transport_error("ChangeMessageVisibility", e))
    }

    /// Ask the broker to drop every message in the queue (eventual effect).
    #[instrument(skip(self), fields(queue_url = %address), err)]
    pub fn purge(&self, address: &str) -> QueueResult<()> {
        self.transport
            .purge_queue(address)
            .map_err(|e| map_transport_error("PurgeQueue", e))
    }

    /// Broker's approximate count of visible messages.
    #[instrument(skip(self), fields(queue_url = %address), err)]
    pub fn read_approximate_count(&self, address: &str) -> QueueResult<u64> {
        let name = QueueAttributeName::ApproximateNumberOfMessages;
        let attributes = self
            .transport
            .get_queue_attributes(address, &[name])
            .map_err(|e| map_transport_error("GetQueueAttributes", e))?;

        let value = attributes.get(name.as_str()).ok_or_else(|| {
            QueueError::malformed_attribute(name.as_str(), "attribute missing from response")
        })?;

        value
            .parse::<u64>()
            .map_err(|e| QueueError::malformed_attribute(name.as_str(), format!("{value:?}: {e}")))
    }
}

fn map_transport_error(operation: &str, error: TransportError) -> QueueError {
    match error {
        TransportError::InvalidReceiptHandle(handle) => {
            QueueError::invalid_receipt_handle(format!("{operation}: {handle}"))
        }
        other => QueueError::broker(format!("{operation} failed: {other}")),
    }
}

/// One receive call's worth of messages.
///
/// Consumed once, in delivery order; it cannot be restarted.
#[derive(Debug)]
pub struct ReceivedBatch {
    source_address: String,
    messages: std::vec::IntoIter<Message>,
}

impl ReceivedBatch {
    fn new(source_address: &str, messages: Vec<Message>) -> Self {
        Self {
            source_address: source_address.to_string(),
            messages: messages.into_iter(),
        }
    }

    pub fn source_address(&self) -> &str {
        &self.source_address
    }
}

impl Iterator for ReceivedBatch {
    type Item = RawMessage;

    fn next(&mut self) -> Option<Self::Item> {
        let message = self.messages.next()?;
        Some(RawMessage {
            message_id: message.message_id,
            receipt_handle: message.receipt_handle,
            attributes: message.attributes,
            source_address: self.source_address.clone(),
            body: message.body,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.messages.size_hint()
    }
}

impl ExactSizeIterator for ReceivedBatch {}
