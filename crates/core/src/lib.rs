//! `leaseq-core`: queue job building blocks.
//!
//! This crate contains **pure** types and contracts (no broker IO): errors,
//! the connection descriptor, address helpers, delivered-message records and
//! the capability traits implemented by broker adapters.

pub mod address;
pub mod config;
pub mod contracts;
pub mod error;
pub mod id;
pub mod message;
pub mod payload;

pub use address::{is_absolute_address, join_prefix, queue_name_from_source, trim_trailing_slash};
pub use config::{Credentials, QueueConfig};
pub use contracts::{Delay, JobHandle, QueueBackend, SendOptions};
pub use error::{HandlerError, QueueError, QueueResult};
pub use id::PayloadId;
pub use message::{
    CompletionState, DeliveryEvent, JobRecord, RECEIVE_COUNT_ATTRIBUTE, RawMessage,
    parse_receive_count,
};
pub use payload::JobPayload;
