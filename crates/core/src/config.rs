//! Queue connection descriptor.
//!
//! Built once (usually by `leaseq_infra::config::load_config`) and shared
//! read-only by the client and the resolver. Nothing in the queue layer reads
//! ambient configuration.

use serde::{Deserialize, Serialize};

use crate::error::{QueueError, QueueResult};

/// Default connection name reported by jobs.
pub const DEFAULT_CONNECTION_NAME: &str = "sqs";

/// Default broker region.
pub const DEFAULT_REGION: &str = "sa-east-1";

/// Static access key pair.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub key: String,
    pub secret: String,
}

impl Credentials {
    pub fn new(key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            secret: secret.into(),
        }
    }
}

impl core::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Credentials")
            .field("key", &self.key)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Immutable description of one queue connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Name jobs report as their connection.
    pub connection_name: String,
    /// Default logical queue name.
    pub queue: Option<String>,
    /// URL prefix; when set, addresses are `prefix/queue` with no broker call.
    pub prefix: Option<String>,
    /// Explicit URL of the default queue.
    pub url: Option<String>,
    pub region: String,
    pub endpoint: Option<String>,
    pub credentials: Option<Credentials>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            connection_name: DEFAULT_CONNECTION_NAME.to_string(),
            queue: None,
            prefix: None,
            url: None,
            region: DEFAULT_REGION.to_string(),
            endpoint: None,
            credentials: None,
        }
    }
}

impl QueueConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_connection_name(mut self, name: impl Into<String>) -> Self {
        self.connection_name = name.into();
        self
    }

    /// Configured prefix, ignoring blank values.
    pub fn prefix(&self) -> Option<&str> {
        non_blank(self.prefix.as_deref())
    }

    /// Configured default queue name, ignoring blank values.
    pub fn default_queue(&self) -> Option<&str> {
        non_blank(self.queue.as_deref())
    }

    /// Configured explicit URL, ignoring blank values.
    pub fn explicit_url(&self) -> Option<&str> {
        non_blank(self.url.as_deref())
    }

    /// Check the descriptor is internally consistent.
    pub fn validate(&self) -> QueueResult<()> {
        if self.connection_name.trim().is_empty() {
            return Err(QueueError::configuration("connection name must not be empty"));
        }

        if self.region.trim().is_empty() {
            return Err(QueueError::configuration("region must not be empty"));
        }

        if let Some(credentials) = &self.credentials {
            if credentials.key.trim().is_empty() || credentials.secret.trim().is_empty() {
                return Err(QueueError::configuration(
                    "credentials require both an access key and a secret",
                ));
            }
        }

        Ok(())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
