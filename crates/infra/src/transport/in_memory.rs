//! In-memory broker for tests/dev.
//!
//! Models the parts of the lease/visibility-timeout delivery model the queue
//! layer depends on:
//!
//! - a received message stays invisible for its visibility timeout, then
//!   reappears unless deleted
//! - every delivery bumps the receive count and issues a fresh receipt
//!   handle; handles from earlier deliveries stop working
//! - `DelaySeconds` hides a new message until the delay has passed
//!
//! Queues are addressed by the final segment of whatever address is passed
//! in, so a queue URL and the matching ARN name the same queue. The clock
//! can be moved forward with [`InMemorySqs::advance`], and faults can be
//! injected per operation with [`InMemorySqs::fail_next`].

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use leaseq_core::{RECEIVE_COUNT_ATTRIBUTE, queue_name_from_source, trim_trailing_slash};

use super::{
    MAX_RECEIVE_BATCH, Message, QueueAttributeName, ReceiveMessageRequest, SendMessageRequest, SqsTransport,
    TransportError,
};

/// Largest `DelaySeconds` the broker accepts (15 minutes).
pub const MAX_DELAY_SECONDS: u32 = 900;

/// Largest visibility timeout the broker accepts (12 hours).
pub const MAX_VISIBILITY_TIMEOUT: u32 = 43_200;

/// Visibility timeout applied when a queue is created without one.
pub const DEFAULT_VISIBILITY_TIMEOUT: u32 = 30;

const DEFAULT_BASE_URL: &str = "https://sqs.sa-east-1.amazonaws.com/000000000000";

/// Broker call kinds, used for call accounting and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BrokerOperation {
    SendMessage,
    ReceiveMessage,
    DeleteMessage,
    ChangeMessageVisibility,
    PurgeQueue,
    GetQueueAttributes,
    GetQueueUrl,
}

#[derive(Debug)]
struct StoredMessage {
    message_id: String,
    body: String,
    message_attributes: BTreeMap<String, String>,
    sent_at: DateTime<Utc>,
    first_received_at: Option<DateTime<Utc>>,
    receive_count: u32,
    visible_at: DateTime<Utc>,
    receipt_handle: Option<String>,
    visibility_timeout: Option<u32>,
}

impl StoredMessage {
    fn is_visible(&self, now: DateTime<Utc>) -> bool {
        self.visible_at <= now
    }

    fn is_in_flight(&self, now: DateTime<Utc>) -> bool {
        self.receipt_handle.is_some() && !self.is_visible(now)
    }
}

#[derive(Debug)]
struct QueueState {
    url: String,
    visibility_timeout: u32,
    messages: Vec<StoredMessage>,
}

/// In-memory lease-based broker.
#[derive(Debug)]
pub struct InMemorySqs {
    base_url: String,
    queues: RwLock<HashMap<String, QueueState>>,
    clock_offset: RwLock<chrono::Duration>,
    calls: Mutex<HashMap<BrokerOperation, usize>>,
    faults: Mutex<HashMap<BrokerOperation, VecDeque<TransportError>>>,
}

impl Default for InMemorySqs {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySqs {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Create a broker whose queue URLs are `base_url/<name>`.
    pub fn with_base_url(base_url: impl AsRef<str>) -> Self {
        Self {
            base_url: trim_trailing_slash(base_url.as_ref()).to_string(),
            queues: RwLock::new(HashMap::new()),
            clock_offset: RwLock::new(chrono::Duration::zero()),
            calls: Mutex::new(HashMap::new()),
            faults: Mutex::new(HashMap::new()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Create a queue (idempotent) and return its URL.
    pub fn create_queue(&self, name: &str) -> String {
        self.create_queue_with_visibility(name, DEFAULT_VISIBILITY_TIMEOUT)
    }

    /// Create a queue with a specific default visibility timeout.
    pub fn create_queue_with_visibility(&self, name: &str, visibility_timeout: u32) -> String {
        let mut queues = self.write_queues();
        let state = queues.entry(name.to_string()).or_insert_with(|| QueueState {
            url: format!("{}/{}", self.base_url, name),
            visibility_timeout,
            messages: Vec::new(),
        });
        state.url.clone()
    }

    /// Current broker time.
    pub fn now(&self) -> DateTime<Utc> {
        Utc::now() + *self.clock_offset.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move the broker clock forward.
    pub fn advance(&self, by: std::time::Duration) {
        let by = chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::days(36_500));
        let mut offset = self
            .clock_offset
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *offset += by;
    }

    /// Make the next `operation` call fail with `error`.
    pub fn fail_next(&self, operation: BrokerOperation, error: TransportError) {
        self.lock_faults().entry(operation).or_default().push_back(error);
    }

    /// Number of `operation` calls made so far (failed calls included).
    pub fn call_count(&self, operation: BrokerOperation) -> usize {
        self.lock_calls().get(&operation).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.lock_calls().values().sum()
    }

    pub fn reset_calls(&self) {
        self.lock_calls().clear();
    }

    /// Visibility timeout last applied to the in-flight delivery holding
    /// `receipt_handle`.
    pub fn visibility_timeout_of(&self, receipt_handle: &str) -> Option<u32> {
        let queues = self.read_queues();
        queues
            .values()
            .flat_map(|q| q.messages.iter())
            .find(|m| m.receipt_handle.as_deref() == Some(receipt_handle))
            .and_then(|m| m.visibility_timeout)
    }

    /// Exact number of stored messages (visible, in flight or delayed).
    pub fn stored_messages(&self, queue_name: &str) -> usize {
        self.read_queues()
            .get(queue_name)
            .map_or(0, |q| q.messages.len())
    }

    fn begin(&self, operation: BrokerOperation) -> Result<(), TransportError> {
        *self.lock_calls().entry(operation).or_insert(0) += 1;

        match self.lock_faults().get_mut(&operation).and_then(VecDeque::pop_front) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn read_queues(&self) -> RwLockReadGuard<'_, HashMap<String, QueueState>> {
        self.queues.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_queues(&self) -> RwLockWriteGuard<'_, HashMap<String, QueueState>> {
        self.queues.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_calls(&self) -> MutexGuard<'_, HashMap<BrokerOperation, usize>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_faults(&self) -> MutexGuard<'_, HashMap<BrokerOperation, VecDeque<TransportError>>> {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn queue_key(address: &str) -> &str {
    queue_name_from_source(address)
}

fn missing_queue(address: &str) -> TransportError {
    TransportError::QueueDoesNotExist(address.to_string())
}

fn new_receipt_handle(message_id: &str) -> String {
    format!("{}#{}", message_id, Uuid::now_v7().simple())
}

fn wants(attribute_names: &[String], name: &str) -> bool {
    attribute_names.iter().any(|n| n == "All" || n == name)
}

impl SqsTransport for InMemorySqs {
    fn send_message(&self, request: SendMessageRequest) -> Result<String, TransportError> {
        self.begin(BrokerOperation::SendMessage)?;

        let delay = request.delay_seconds.unwrap_or(0);
        if delay > MAX_DELAY_SECONDS {
            return Err(TransportError::InvalidParameter(format!(
                "DelaySeconds must be between 0 and {MAX_DELAY_SECONDS}, got {delay}"
            )));
        }

        let now = self.now();
        let mut queues = self.write_queues();
        let queue = queues
            .get_mut(queue_key(&request.queue_url))
            .ok_or_else(|| missing_queue(&request.queue_url))?;

        let message_id = Uuid::now_v7().to_string();
        queue.messages.push(StoredMessage {
            message_id: message_id.clone(),
            body: request.message_body,
            message_attributes: request.message_attributes,
            sent_at: now,
            first_received_at: None,
            receive_count: 0,
            visible_at: now + chrono::Duration::seconds(i64::from(delay)),
            receipt_handle: None,
            visibility_timeout: None,
        });

        debug!(queue_url = %queue.url, message_id = %message_id, delay, "message stored");
        Ok(message_id)
    }

    fn receive_message(
        &self,
        request: ReceiveMessageRequest,
    ) -> Result<Vec<Message>, TransportError> {
        self.begin(BrokerOperation::ReceiveMessage)?;

        let max = request.max_number_of_messages;
        if !(1..=MAX_RECEIVE_BATCH).contains(&max) {
            return Err(TransportError::InvalidParameter(format!(
                "MaxNumberOfMessages must be between 1 and {MAX_RECEIVE_BATCH}, got {max}"
            )));
        }

        let now = self.now();
        let mut queues = self.write_queues();
        let queue = queues
            .get_mut(queue_key(&request.queue_url))
            .ok_or_else(|| missing_queue(&request.queue_url))?;

        let timeout = request.visibility_timeout.unwrap_or(queue.visibility_timeout);
        if timeout > MAX_VISIBILITY_TIMEOUT {
            return Err(TransportError::InvalidParameter(format!(
                "VisibilityTimeout must be between 0 and {MAX_VISIBILITY_TIMEOUT}, got {timeout}"
            )));
        }

        let mut delivered = Vec::new();
        for stored in queue.messages.iter_mut().filter(|m| m.is_visible(now)) {
            if delivered.len() >= max as usize {
                break;
            }

            stored.receive_count += 1;
            stored.first_received_at.get_or_insert(now);
            stored.visible_at = now + chrono::Duration::seconds(i64::from(timeout));
            stored.visibility_timeout = Some(timeout);
            let receipt_handle = new_receipt_handle(&stored.message_id);
            stored.receipt_handle = Some(receipt_handle.clone());

            let mut attributes = HashMap::new();
            if wants(&request.attribute_names, RECEIVE_COUNT_ATTRIBUTE) {
                attributes.insert(
                    RECEIVE_COUNT_ATTRIBUTE.to_string(),
                    stored.receive_count.to_string(),
                );
            }
            if wants(&request.attribute_names, "SentTimestamp") {
                attributes.insert(
                    "SentTimestamp".to_string(),
                    stored.sent_at.timestamp_millis().to_string(),
                );
            }
            if let Some(first) = stored.first_received_at {
                if wants(&request.attribute_names, "ApproximateFirstReceiveTimestamp") {
                    attributes.insert(
                        "ApproximateFirstReceiveTimestamp".to_string(),
                        first.timestamp_millis().to_string(),
                    );
                }
            }

            delivered.push(Message {
                message_id: stored.message_id.clone(),
                receipt_handle,
                body: stored.body.clone(),
                attributes,
                message_attributes: stored.message_attributes.clone(),
            });
        }

        Ok(delivered)
    }

    fn delete_message(&self, queue_url: &str, receipt_handle: &str) -> Result<(), TransportError> {
        self.begin(BrokerOperation::DeleteMessage)?;

        let mut queues = self.write_queues();
        let queue = queues
            .get_mut(queue_key(queue_url))
            .ok_or_else(|| missing_queue(queue_url))?;

        let position = queue
            .messages
            .iter()
            .position(|m| m.receipt_handle.as_deref() == Some(receipt_handle))
            .ok_or_else(|| TransportError::InvalidReceiptHandle(receipt_handle.to_string()))?;

        queue.messages.remove(position);
        Ok(())
    }

    fn change_message_visibility(
        &self,
        queue_url: &str,
        receipt_handle: &str,
        visibility_timeout: u32,
    ) -> Result<(), TransportError> {
        self.begin(BrokerOperation::ChangeMessageVisibility)?;

        if visibility_timeout > MAX_VISIBILITY_TIMEOUT {
            return Err(TransportError::InvalidParameter(format!(
                "VisibilityTimeout must be between 0 and {MAX_VISIBILITY_TIMEOUT}, got {visibility_timeout}"
            )));
        }

        let now = self.now();
        let mut queues = self.write_queues();
        let queue = queues
            .get_mut(queue_key(queue_url))
            .ok_or_else(|| missing_queue(queue_url))?;

        // Only the current, still-leased delivery may be changed.
        let stored = queue
            .messages
            .iter_mut()
            .find(|m| m.receipt_handle.as_deref() == Some(receipt_handle) && m.is_in_flight(now))
            .ok_or_else(|| TransportError::InvalidReceiptHandle(receipt_handle.to_string()))?;

        stored.visible_at = now + chrono::Duration::seconds(i64::from(visibility_timeout));
        stored.visibility_timeout = Some(visibility_timeout);
        Ok(())
    }

    fn purge_queue(&self, queue_url: &str) -> Result<(), TransportError> {
        self.begin(BrokerOperation::PurgeQueue)?;

        let mut queues = self.write_queues();
        let queue = queues
            .get_mut(queue_key(queue_url))
            .ok_or_else(|| missing_queue(queue_url))?;
        queue.messages.clear();
        Ok(())
    }

    fn get_queue_attributes(
        &self,
        queue_url: &str,
        attribute_names: &[QueueAttributeName],
    ) -> Result<HashMap<String, String>, TransportError> {
        self.begin(BrokerOperation::GetQueueAttributes)?;

        let now = self.now();
        let queues = self.read_queues();
        let queue = queues
            .get(queue_key(queue_url))
            .ok_or_else(|| missing_queue(queue_url))?;

        let mut attributes = HashMap::new();
        for name in attribute_names {
            let count = match name {
                QueueAttributeName::ApproximateNumberOfMessages => {
                    queue.messages.iter().filter(|m| m.is_visible(now)).count()
                }
                QueueAttributeName::ApproximateNumberOfMessagesNotVisible => {
                    queue.messages.iter().filter(|m| m.is_in_flight(now)).count()
                }
                QueueAttributeName::ApproximateNumberOfMessagesDelayed => queue
                    .messages
                    .iter()
                    .filter(|m| m.receipt_handle.is_none() && !m.is_visible(now))
                    .count(),
            };
            attributes.insert(name.as_str().to_string(), count.to_string());
        }

        Ok(attributes)
    }

    fn get_queue_url(&self, queue_name: &str) -> Result<String, TransportError> {
        self.begin(BrokerOperation::GetQueueUrl)?;

        self.read_queues()
            .get(queue_name)
            .map(|q| q.url.clone())
            .ok_or_else(|| missing_queue(queue_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn send(broker: &InMemorySqs, url: &str, body: &str, delay: Option<u32>) -> String {
        broker
            .send_message(SendMessageRequest {
                queue_url: url.to_string(),
                message_body: body.to_string(),
                delay_seconds: delay,
                ..Default::default()
            })
            .unwrap()
    }

    fn receive(broker: &InMemorySqs, url: &str, max: u32) -> Vec<Message> {
        broker
            .receive_message(ReceiveMessageRequest {
                queue_url: url.to_string(),
                attribute_names: vec![RECEIVE_COUNT_ATTRIBUTE.to_string()],
                max_number_of_messages: max,
                visibility_timeout: None,
            })
            .unwrap()
    }

    #[test]
    fn received_message_is_leased_until_timeout() {
        let broker = InMemorySqs::new();
        let url = broker.create_queue_with_visibility("jobs", 10);
        send(&broker, &url, "a", None);

        let first = receive(&broker, &url, 1);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].attributes[RECEIVE_COUNT_ATTRIBUTE], "1");
        assert!(receive(&broker, &url, 1).is_empty());

        broker.advance(Duration::from_secs(11));
        let second = receive(&broker, &url, 1);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].message_id, first[0].message_id);
        assert_eq!(second[0].attributes[RECEIVE_COUNT_ATTRIBUTE], "2");
        assert_ne!(second[0].receipt_handle, first[0].receipt_handle);
    }

    #[test]
    fn stale_receipt_handle_cannot_delete() {
        let broker = InMemorySqs::new();
        let url = broker.create_queue_with_visibility("jobs", 5);
        send(&broker, &url, "a", None);

        let first = receive(&broker, &url, 1);
        broker.advance(Duration::from_secs(6));
        let second = receive(&broker, &url, 1);

        assert!(matches!(
            broker.delete_message(&url, &first[0].receipt_handle),
            Err(TransportError::InvalidReceiptHandle(_))
        ));
        broker.delete_message(&url, &second[0].receipt_handle).unwrap();
        assert_eq!(broker.stored_messages("jobs"), 0);
    }

    #[test]
    fn change_visibility_to_zero_redelivers_immediately() {
        let broker = InMemorySqs::new();
        let url = broker.create_queue("jobs");
        send(&broker, &url, "a", None);

        let leased = receive(&broker, &url, 1);
        broker
            .change_message_visibility(&url, &leased[0].receipt_handle, 0)
            .unwrap();
        assert_eq!(broker.visibility_timeout_of(&leased[0].receipt_handle), Some(0));

        let again = receive(&broker, &url, 1);
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].attributes[RECEIVE_COUNT_ATTRIBUTE], "2");
    }

    #[test]
    fn delayed_message_is_hidden() {
        let broker = InMemorySqs::new();
        let url = broker.create_queue("jobs");
        send(&broker, &url, "later", Some(30));

        assert!(receive(&broker, &url, 10).is_empty());
        broker.advance(Duration::from_secs(30));
        assert_eq!(receive(&broker, &url, 10).len(), 1);
    }

    #[test]
    fn arn_and_url_address_the_same_queue() {
        let broker = InMemorySqs::new();
        let url = broker.create_queue("jobs");
        send(&broker, "arn:aws:sqs:sa-east-1:000000000000:jobs", "a", None);
        assert_eq!(receive(&broker, &url, 1).len(), 1);
    }

    #[test]
    fn parameter_limits_are_enforced() {
        let broker = InMemorySqs::new();
        let url = broker.create_queue("jobs");

        assert!(matches!(
            broker.send_message(SendMessageRequest {
                queue_url: url.clone(),
                delay_seconds: Some(MAX_DELAY_SECONDS + 1),
                ..Default::default()
            }),
            Err(TransportError::InvalidParameter(_))
        ));
        assert!(matches!(
            broker.receive_message(ReceiveMessageRequest {
                queue_url: url,
                max_number_of_messages: 11,
                ..Default::default()
            }),
            Err(TransportError::InvalidParameter(_))
        ));
    }

    #[test]
    fn queue_attributes_split_visible_in_flight_and_delayed() {
        let broker = InMemorySqs::new();
        let url = broker.create_queue("jobs");
        send(&broker, &url, "a", None);
        send(&broker, &url, "b", None);
        send(&broker, &url, "c", Some(60));
        receive(&broker, &url, 1);

        let attrs = broker
            .get_queue_attributes(
                &url,
                &[
                    QueueAttributeName::ApproximateNumberOfMessages,
                    QueueAttributeName::ApproximateNumberOfMessagesNotVisible,
                    QueueAttributeName::ApproximateNumberOfMessagesDelayed,
                ],
            )
            .unwrap();

        assert_eq!(attrs["ApproximateNumberOfMessages"], "1");
        assert_eq!(attrs["ApproximateNumberOfMessagesNotVisible"], "1");
        assert_eq!(attrs["ApproximateNumberOfMessagesDelayed"], "1");
    }

    #[test]
    fn injected_fault_fails_once_and_is_counted() {
        let broker = InMemorySqs::new();
        broker.create_queue("jobs");
        broker.fail_next(
            BrokerOperation::GetQueueUrl,
            TransportError::Service("throttled".to_string()),
        );

        assert!(broker.get_queue_url("jobs").is_err());
        assert!(broker.get_queue_url("jobs").is_ok());
        assert_eq!(broker.call_count(BrokerOperation::GetQueueUrl), 2);
        assert!(matches!(
            broker.get_queue_url("missing"),
            Err(TransportError::QueueDoesNotExist(_))
        ));
    }
}
