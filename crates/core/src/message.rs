//! Broker messages and the job records derived from them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::address::queue_name_from_source;
use crate::error::{QueueError, QueueResult};

/// Broker attribute carrying the delivery count of a message.
pub const RECEIVE_COUNT_ATTRIBUTE: &str = "ApproximateReceiveCount";

/// One message as delivered by the broker.
///
/// Field names follow the broker's delivery-event JSON, so an event payload
/// deserialises straight into this type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    pub message_id: String,
    pub receipt_handle: String,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    /// Origin of the delivery: a queue ARN in events, a queue URL when polled.
    #[serde(rename = "eventSourceARN", alias = "sourceAddress")]
    pub source_address: String,
    #[serde(default)]
    pub body: String,
}

/// A batch of messages handed over by the invoking runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryEvent {
    #[serde(rename = "Records", default)]
    pub records: Vec<RawMessage>,
}

impl DeliveryEvent {
    pub fn new(records: Vec<RawMessage>) -> Self {
        Self { records }
    }

    /// Parse a delivery event from its JSON form.
    pub fn from_json(json: &str) -> QueueResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Local bookkeeping of what the handler did with a job.
///
/// The broker remains the source of truth; this only records which call
/// was issued through this record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionState {
    #[default]
    Pending,
    Deleted,
    Released,
    /// Marked failed locally; the lease is left to expire.
    Failed,
}

impl CompletionState {
    /// Delete or release has already been issued.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Deleted | Self::Released)
    }
}

/// One delivered unit of work.
///
/// Created fresh for every delivery, redeliveries included, and dropped once
/// the handler returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRecord {
    pub message_id: String,
    pub receipt_handle: String,
    pub attributes: HashMap<String, String>,
    pub source_address: String,
    pub queue_name: String,
    pub body: String,
    pub completion_state: CompletionState,
}

impl JobRecord {
    /// Build a record, deriving the logical queue name from the origin address.
    pub fn from_raw(raw: RawMessage) -> Self {
        let queue_name = queue_name_from_source(&raw.source_address).to_string();

        Self {
            message_id: raw.message_id,
            receipt_handle: raw.receipt_handle,
            attributes: raw.attributes,
            source_address: raw.source_address,
            queue_name,
            body: raw.body,
            completion_state: CompletionState::Pending,
        }
    }

    /// Override the logical queue name derived from the origin address.
    pub fn with_queue_name(mut self, queue_name: impl Into<String>) -> Self {
        self.queue_name = queue_name.into();
        self
    }

    /// Delivery count reported by the broker.
    pub fn receive_count(&self) -> QueueResult<u32> {
        parse_receive_count(self.attributes.get(RECEIVE_COUNT_ATTRIBUTE).map(String::as_str))
    }
}

impl From<RawMessage> for JobRecord {
    fn from(raw: RawMessage) -> Self {
        Self::from_raw(raw)
    }
}

/// Parse the receive-count attribute value.
pub fn parse_receive_count(value: Option<&str>) -> QueueResult<u32> {
    let value = value.ok_or_else(|| {
        QueueError::malformed_attribute(RECEIVE_COUNT_ATTRIBUTE, "attribute is missing")
    })?;

    value.trim().parse::<u32>().map_err(|e| {
        QueueError::malformed_attribute(RECEIVE_COUNT_ATTRIBUTE, format!("{value:?}: {e}"))
    })
}
