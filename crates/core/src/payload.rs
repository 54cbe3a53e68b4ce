//! JSON envelope written around jobs pushed through a `QueueBackend`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::QueueResult;
use crate::id::PayloadId;

/// Payload body of a pushed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPayload {
    pub uuid: PayloadId,
    /// Human-readable job name, taken from the job's Rust type.
    pub display_name: String,
    /// Routing key for the handler; same as `display_name` unless overridden.
    pub job: String,
    pub data: JsonValue,
    /// Attempts recorded by the producer. Always 0 on push; the broker's
    /// receive count is authoritative once delivered.
    #[serde(default)]
    pub attempts: u32,
}

impl JobPayload {
    /// Wrap a serialisable job.
    pub fn for_job<J: Serialize>(job: &J) -> QueueResult<Self> {
        let display_name = short_type_name::<J>().to_string();

        Ok(Self {
            uuid: PayloadId::new(),
            job: display_name.clone(),
            display_name,
            data: serde_json::to_value(job)?,
            attempts: 0,
        })
    }

    pub fn with_job_name(mut self, job: impl Into<String>) -> Self {
        self.job = job.into();
        self
    }

    pub fn to_json(&self) -> QueueResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> QueueResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Deserialise the wrapped job data.
    pub fn data_as<T: DeserializeOwned>(&self) -> QueueResult<T> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
