//! Queue address resolution.
//!
//! Turns a logical queue name into the address the broker expects:
//!
//! 1. absent name → configured default queue (`Configuration` error if none)
//! 2. name that is already an absolute address → returned unchanged
//! 3. prefix configured → `trim(prefix) + "/" + name`
//! 4. explicit URL configured → that URL for the default queue, a sibling
//!    address (`dirname(url) + "/" + name`) for any other queue
//! 5. otherwise → one `GetQueueUrl` round trip
//!
//! Steps 2–4 are pure string work and never touch the broker.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, instrument};

use leaseq_core::{
    QueueConfig, QueueError, QueueResult, is_absolute_address, join_prefix, trim_trailing_slash,
};

use crate::transport::SqsTransport;

/// Resolves logical queue names to broker addresses.
pub struct QueueAddressResolver<T: SqsTransport> {
    transport: Arc<T>,
    config: Arc<QueueConfig>,
    cache: Option<Arc<RwLock<HashMap<String, String>>>>,
}

impl<T: SqsTransport> Clone for QueueAddressResolver<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            config: self.config.clone(),
            cache: self.cache.clone(),
        }
    }
}

impl<T: SqsTransport> core::fmt::Debug for QueueAddressResolver<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("QueueAddressResolver")
            .field("config", &self.config)
            .field("cached", &self.cache.is_some())
            .finish()
    }
}

impl<T: SqsTransport> QueueAddressResolver<T> {
    pub fn new(transport: Arc<T>, config: Arc<QueueConfig>) -> Self {
        Self {
            transport,
            config,
            cache: None,
        }
    }

    /// Remember broker lookups so each distinct name costs one round trip.
    pub fn with_lookup_cache(mut self) -> Self {
        self.cache = Some(Arc::new(RwLock::new(HashMap::new())));
        self
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Resolve `queue` (or the configured default) to a broker address.
    #[instrument(skip(self), err)]
    pub fn resolve(&self, queue: Option<&str>) -> QueueResult<String> {
        let requested = queue.filter(|q| !q.trim().is_empty());

        let Some(name) = requested.or(self.config.default_queue()) else {
            return self.config.explicit_url().map(str::to_string).ok_or_else(|| {
                QueueError::configuration("no queue name given and no default queue configured")
            });
        };

        if is_absolute_address(name) {
            return Ok(name.to_string());
        }

        if let Some(prefix) = self.config.prefix() {
            return Ok(join_prefix(prefix, name));
        }

        if let Some(url) = self.config.explicit_url() {
            let is_default = requested.is_none() || self.config.default_queue() == Some(name);
            return Ok(if is_default {
                url.to_string()
            } else {
                sibling_address(url, name)
            });
        }

        self.lookup(name)
    }

    /// Prefix-only address for `queue_name`, if a prefix is configured.
    pub fn prefixed(&self, queue_name: &str) -> Option<String> {
        self.config
            .prefix()
            .map(|prefix| join_prefix(prefix, queue_name))
    }

    fn lookup(&self, name: &str) -> QueueResult<String> {
        if let Some(cache) = &self.cache {
            let cached = cache
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(name)
                .cloned();
            if let Some(url) = cached {
                return Ok(url);
            }
        }

        let url = self
            .transport
            .get_queue_url(name)
            .map_err(|e| QueueError::broker(format!("GetQueueUrl({name}) failed: {e}")))?;
        debug!(queue = %name, queue_url = %url, "resolved queue address via broker");

        if let Some(cache) = &self.cache {
            cache
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(name.to_string(), url.clone());
        }

        Ok(url)
    }
}

fn sibling_address(url: &str, name: &str) -> String {
    let trimmed = trim_trailing_slash(url);
    match trimmed.rsplit_once('/') {
        Some((base, _)) => format!("{base}/{name}"),
        None => name.to_string(),
    }
}
