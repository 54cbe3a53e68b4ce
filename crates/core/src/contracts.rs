//! Capability interfaces implemented once per broker.
//!
//! `JobHandle` is what a handler sees for one delivered message;
//! `QueueBackend` is the producer/consumer side of a queue connection.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::QueueResult;
use crate::message::CompletionState;

/// Handle to one delivered job.
pub trait JobHandle {
    /// Broker-assigned message identifier.
    fn job_id(&self) -> &str;

    /// Number of times the broker has delivered this message.
    fn attempts(&self) -> QueueResult<u32>;

    /// The payload exactly as delivered.
    fn raw_body(&self) -> &str;

    /// Logical queue the job was delivered from.
    fn queue(&self) -> &str;

    fn connection_name(&self) -> &str;

    /// Acknowledge the job so it is never redelivered.
    fn delete(&mut self) -> QueueResult<()>;

    /// Make the job deliverable again after `delay_seconds` (0 = now).
    fn release(&mut self, delay_seconds: u32) -> QueueResult<()>;

    /// Record a failure locally, leaving the lease to expire.
    fn fail(&mut self, reason: &str);

    fn state(&self) -> CompletionState;

    fn is_deleted(&self) -> bool {
        self.state() == CompletionState::Deleted
    }

    fn is_released(&self) -> bool {
        self.state() == CompletionState::Released
    }

    fn has_failed(&self) -> bool {
        self.state() == CompletionState::Failed
    }

    fn is_deleted_or_released(&self) -> bool {
        self.state().is_settled()
    }
}

/// Options for a single enqueue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendOptions {
    /// Seconds before the message becomes visible (default 0).
    pub delay_seconds: Option<u32>,
    /// Extra message attributes sent alongside the body.
    pub attributes: BTreeMap<String, String>,
}

impl SendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delayed(delay_seconds: u32) -> Self {
        Self {
            delay_seconds: Some(delay_seconds),
            ..Self::default()
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }
}

/// Delay before a pushed job becomes visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delay {
    Seconds(u32),
    Until(DateTime<Utc>),
}

impl Delay {
    /// Whole seconds from `now` until the job should become visible.
    pub fn seconds_from(&self, now: DateTime<Utc>) -> u32 {
        match self {
            Delay::Seconds(seconds) => *seconds,
            Delay::Until(at) => {
                let seconds = (*at - now).num_seconds().max(0);
                u32::try_from(seconds).unwrap_or(u32::MAX)
            }
        }
    }
}

impl From<u32> for Delay {
    fn from(value: u32) -> Self {
        Delay::Seconds(value)
    }
}

impl From<std::time::Duration> for Delay {
    fn from(value: std::time::Duration) -> Self {
        Delay::Seconds(u32::try_from(value.as_secs()).unwrap_or(u32::MAX))
    }
}

impl From<DateTime<Utc>> for Delay {
    fn from(value: DateTime<Utc>) -> Self {
        Delay::Until(value)
    }
}

/// Producer/consumer side of a queue connection.
pub trait QueueBackend {
    type Job<'a>: JobHandle
    where
        Self: 'a;

    /// Serialise `job` into a payload and enqueue it.
    fn push<J: Serialize>(&self, job: &J, queue: Option<&str>) -> QueueResult<String>;

    /// Enqueue an already serialised payload; returns the broker message id.
    fn push_raw(&self, payload: &str, queue: Option<&str>, options: SendOptions)
    -> QueueResult<String>;

    /// Enqueue `job` so it becomes visible after `delay`.
    fn later<J: Serialize>(
        &self,
        delay: impl Into<Delay>,
        job: &J,
        queue: Option<&str>,
    ) -> QueueResult<String>;

    /// Receive at most one job.
    fn pop(&self, queue: Option<&str>) -> QueueResult<Option<Self::Job<'_>>>;

    /// Approximate number of visible messages.
    fn size(&self, queue: Option<&str>) -> QueueResult<u64>;

    /// Purge the queue, returning the approximate size seen just before.
    fn clear(&self, queue: &str) -> QueueResult<u64>;

    fn resolve_address(&self, queue: Option<&str>) -> QueueResult<String>;
}
