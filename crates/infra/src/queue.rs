//! Producer/consumer facade over one broker connection.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, instrument};

use leaseq_core::{Delay, JobPayload, JobRecord, QueueBackend, QueueConfig, QueueResult, SendOptions};

use crate::client::QueueClient;
use crate::job::SqsJob;
use crate::transport::SqsTransport;

/// A queue connection implementing [`QueueBackend`].
pub struct SqsQueue<T: SqsTransport> {
    client: QueueClient<T>,
}

impl<T: SqsTransport> Clone for SqsQueue<T> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
        }
    }
}

impl<T: SqsTransport> core::fmt::Debug for SqsQueue<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SqsQueue").field("client", &self.client).finish()
    }
}

impl<T: SqsTransport> SqsQueue<T> {
    pub fn new(transport: Arc<T>, config: QueueConfig) -> QueueResult<Self> {
        Ok(Self {
            client: QueueClient::new(transport, config)?,
        })
    }

    pub fn from_client(client: QueueClient<T>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &QueueClient<T> {
        &self.client
    }

    /// Wrap a delivered record into a job bound to this connection.
    pub fn job(&self, record: JobRecord) -> SqsJob<'_, T> {
        SqsJob::new(&self.client, record)
    }

    fn send_payload<J: Serialize>(
        &self,
        job: &J,
        queue: Option<&str>,
        options: SendOptions,
    ) -> QueueResult<String> {
        let payload = JobPayload::for_job(job)?;
        debug!(uuid = %payload.uuid, job = %payload.job, "encoded job payload");
        self.push_raw(&payload.to_json()?, queue, options)
    }
}

impl<T: SqsTransport> QueueBackend for SqsQueue<T> {
    type Job<'a>
        = SqsJob<'a, T>
    where
        Self: 'a;

    fn push<J: Serialize>(&self, job: &J, queue: Option<&str>) -> QueueResult<String> {
        self.send_payload(job, queue, SendOptions::new())
    }

    #[instrument(skip(self, payload, options), err)]
    fn push_raw(
        &self,
        payload: &str,
        queue: Option<&str>,
        options: SendOptions,
    ) -> QueueResult<String> {
        let address = self.client.resolve(queue)?;
        self.client.enqueue(&address, payload, options)
    }

    fn later<J: Serialize>(
        &self,
        delay: impl Into<Delay>,
        job: &J,
        queue: Option<&str>,
    ) -> QueueResult<String> {
        let seconds = delay.into().seconds_from(Utc::now());
        self.send_payload(job, queue, SendOptions::delayed(seconds))
    }

    #[instrument(skip(self), err)]
    fn pop(&self, queue: Option<&str>) -> QueueResult<Option<Self::Job<'_>>> {
        let address = self.client.resolve(queue)?;
        let mut batch = self.client.receive(&address, 1)?;

        Ok(batch.next().map(|raw| {
            let mut record = JobRecord::from_raw(raw);
            if let Some(name) = queue.filter(|q| !q.trim().is_empty()) {
                record = record.with_queue_name(name);
            }
            self.job(record)
        }))
    }

    fn size(&self, queue: Option<&str>) -> QueueResult<u64> {
        let address = self.client.resolve(queue)?;
        self.client.read_approximate_count(&address)
    }

    #[instrument(skip(self), err)]
    fn clear(&self, queue: &str) -> QueueResult<u64> {
        let address = self.client.resolve(Some(queue))?;
        let size = self.client.read_approximate_count(&address)?;
        self.client.purge(&address)?;
        info!(queue_url = %address, size, "purged queue");
        Ok(size)
    }

    fn resolve_address(&self, queue: Option<&str>) -> QueueResult<String> {
        self.client.resolve(queue)
    }
}
