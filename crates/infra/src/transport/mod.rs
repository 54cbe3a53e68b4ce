//! Broker transport abstraction.
//!
//! `SqsTransport` mirrors the broker's API one call per primitive, the way an
//! SDK client would. The queue layer never speaks the wire protocol itself;
//! production deployments plug an SDK-backed implementation in here, tests
//! and local development use [`InMemorySqs`].

pub mod in_memory;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

pub use in_memory::InMemorySqs;

/// Largest batch a single receive may return.
pub const MAX_RECEIVE_BATCH: u32 = 10;

/// Queue attribute names understood by `get_queue_attributes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueAttributeName {
    ApproximateNumberOfMessages,
    ApproximateNumberOfMessagesNotVisible,
    ApproximateNumberOfMessagesDelayed,
}

impl QueueAttributeName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApproximateNumberOfMessages => "ApproximateNumberOfMessages",
            Self::ApproximateNumberOfMessagesNotVisible => "ApproximateNumberOfMessagesNotVisible",
            Self::ApproximateNumberOfMessagesDelayed => "ApproximateNumberOfMessagesDelayed",
        }
    }
}

/// `SendMessage` input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendMessageRequest {
    pub queue_url: String,
    pub message_body: String,
    pub delay_seconds: Option<u32>,
    pub message_attributes: BTreeMap<String, String>,
}

/// `ReceiveMessage` input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiveMessageRequest {
    pub queue_url: String,
    /// System attributes to return with each message.
    pub attribute_names: Vec<String>,
    pub max_number_of_messages: u32,
    /// Overrides the queue's default visibility timeout for this receive.
    pub visibility_timeout: Option<u32>,
}

/// A message as returned by `ReceiveMessage`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub message_id: String,
    pub receipt_handle: String,
    pub body: String,
    pub attributes: HashMap<String, String>,
    pub message_attributes: BTreeMap<String, String>,
}

/// Transport-level failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("receipt handle is invalid or expired: {0}")]
    InvalidReceiptHandle(String),

    #[error("queue does not exist: {0}")]
    QueueDoesNotExist(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Auth, throttling or other service-side failure.
    #[error("service error: {0}")]
    Service(String),

    #[error("connection error: {0}")]
    Connection(String),
}

/// Broker primitives consumed by the queue layer.
///
/// Every call is blocking; implementations own their connection state and
/// must be shareable across threads.
pub trait SqsTransport: Send + Sync {
    /// Returns the broker-assigned message id.
    fn send_message(&self, request: SendMessageRequest) -> Result<String, TransportError>;

    fn receive_message(&self, request: ReceiveMessageRequest)
    -> Result<Vec<Message>, TransportError>;

    fn delete_message(&self, queue_url: &str, receipt_handle: &str) -> Result<(), TransportError>;

    fn change_message_visibility(
        &self,
        queue_url: &str,
        receipt_handle: &str,
        visibility_timeout: u32,
    ) -> Result<(), TransportError>;

    fn purge_queue(&self, queue_url: &str) -> Result<(), TransportError>;

    fn get_queue_attributes(
        &self,
        queue_url: &str,
        attribute_names: &[QueueAttributeName],
    ) -> Result<HashMap<String, String>, TransportError>;

    fn get_queue_url(&self, queue_name: &str) -> Result<String, TransportError>;
}

impl<T> SqsTransport for Arc<T>
where
    T: SqsTransport + ?Sized,
{
    fn send_message(&self, request: SendMessageRequest) -> Result<String, TransportError> {
        (**self).send_message(request)
    }

    fn receive_message(
        &self,
        request: ReceiveMessageRequest,
    ) -> Result<Vec<Message>, TransportError> {
        (**self).receive_message(request)
    }

    fn delete_message(&self, queue_url: &str, receipt_handle: &str) -> Result<(), TransportError> {
        (**self).delete_message(queue_url, receipt_handle)
    }

    fn change_message_visibility(
        &self,
        queue_url: &str,
        receipt_handle: &str,
        visibility_timeout: u32,
    ) -> Result<(), TransportError> {
        (**self).change_message_visibility(queue_url, receipt_handle, visibility_timeout)
    }

    fn purge_queue(&self, queue_url: &str) -> Result<(), TransportError> {
        (**self).purge_queue(queue_url)
    }

    fn get_queue_attributes(
        &self,
        queue_url: &str,
        attribute_names: &[QueueAttributeName],
    ) -> Result<HashMap<String, String>, TransportError> {
        (**self).get_queue_attributes(queue_url, attribute_names)
    }

    fn get_queue_url(&self, queue_name: &str) -> Result<String, TransportError> {
        (**self).get_queue_url(queue_name)
    }
}
