//! Strongly-typed identifiers.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::QueueError;

/// Identifier stamped into every payload pushed by this crate.
///
/// Distinct from the broker's message id: the payload id survives
/// redeliveries and re-pushes of the same payload.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PayloadId(Uuid);

impl PayloadId {
    /// Create a new identifier (UUIDv7, time-ordered).
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for PayloadId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for PayloadId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl From<Uuid> for PayloadId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl FromStr for PayloadId {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = Uuid::from_str(s)
            .map_err(|e| QueueError::serialization(format!("PayloadId: {e}")))?;
        Ok(Self(uuid))
    }
}
