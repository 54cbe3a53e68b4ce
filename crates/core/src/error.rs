//! Queue error model.

use thiserror::Error;

/// Result type used across the queue layer.
pub type QueueResult<T> = Result<T, QueueError>;

/// Error raised by application handler logic while processing a job.
///
/// Handlers are free to return any error; it is propagated untouched and
/// aborts the remainder of the current delivery batch.
pub type HandlerError = anyhow::Error;

/// Queue-level error.
///
/// None of these are retried by this layer. Retry is driven by the broker's
/// redelivery of messages that were neither deleted nor released.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// Missing default queue, half-specified credentials, etc.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Transport, auth or throttling failure reported by the broker.
    #[error("broker error: {0}")]
    Broker(String),

    /// The receipt handle expired or was already consumed.
    ///
    /// Callers treat this as "already done": the lease is gone either way.
    #[error("invalid receipt handle: {0}")]
    InvalidReceiptHandle(String),

    /// A broker attribute was missing or not in the expected format.
    #[error("malformed attribute {name}: {reason}")]
    MalformedAttribute { name: String, reason: String },

    /// A payload or delivery event could not be (de)serialised.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl QueueError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn broker(msg: impl Into<String>) -> Self {
        Self::Broker(msg.into())
    }

    pub fn invalid_receipt_handle(msg: impl Into<String>) -> Self {
        Self::InvalidReceiptHandle(msg.into())
    }

    pub fn malformed_attribute(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedAttribute {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Whether the error only says the lease is already gone.
    pub fn is_invalid_receipt_handle(&self) -> bool {
        matches!(self, Self::InvalidReceiptHandle(_))
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value.to_string())
    }
}
