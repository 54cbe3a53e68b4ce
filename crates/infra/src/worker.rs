//! Polling queue worker.
//!
//! Runs a [`DeliveryDispatcher`] on a background thread, feeding it one
//! receive batch at a time. A failed batch is logged and polling carries on;
//! the messages it did not settle reappear once their leases expire.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use leaseq_core::QueueResult;

use crate::dispatcher::{BatchReport, DeliveryDispatcher, DispatchError};
use crate::transport::{MAX_RECEIVE_BATCH, SqsTransport};

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct QueueWorkerConfig {
    /// Thread name and log label.
    pub name: String,
    /// Queue to poll; `None` uses the connection's default queue.
    pub queue: Option<String>,
    /// Wait between polls when the queue is empty or unreachable.
    pub poll_interval: Duration,
    /// Messages requested per receive (1..=10).
    pub max_messages: u32,
}

impl Default for QueueWorkerConfig {
    fn default() -> Self {
        Self {
            name: "queue-worker".to_string(),
            queue: None,
            poll_interval: Duration::from_millis(250),
            max_messages: MAX_RECEIVE_BATCH,
        }
    }
}

impl QueueWorkerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_messages(mut self, max: u32) -> Self {
        self.max_messages = max.clamp(1, MAX_RECEIVE_BATCH);
        self
    }
}

/// Worker runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct WorkerStats {
    /// Non-empty batches dispatched.
    pub batches: u64,
    /// Messages handed to the handler.
    pub messages: u64,
    pub deleted: u64,
    pub released: u64,
    pub handler_failures: u64,
    pub broker_errors: u64,
    pub uptime_secs: u64,
}

/// Handle to control a running worker.
#[derive(Debug)]
pub struct QueueWorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl QueueWorkerHandle {
    /// Stop polling and wait for the in-flight batch to finish.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }

    pub fn stats(&self) -> WorkerStats {
        lock_stats(&self.stats).clone()
    }
}

/// What a single poll produced.
#[derive(Debug)]
pub enum PollOutcome {
    Empty,
    Dispatched(BatchReport),
}

/// Background consumer for one queue.
pub struct QueueWorker<T: SqsTransport> {
    dispatcher: DeliveryDispatcher<T>,
    /// Polled addresses, resolved once per queue.
    addresses: Mutex<HashMap<Option<String>, String>>,
}

impl<T: SqsTransport + 'static> QueueWorker<T> {
    pub fn new(dispatcher: DeliveryDispatcher<T>) -> Self {
        Self {
            dispatcher,
            addresses: Mutex::new(HashMap::new()),
        }
    }

    pub fn dispatcher(&self) -> &DeliveryDispatcher<T> {
        &self.dispatcher
    }

    /// Receive and dispatch one batch synchronously.
    ///
    /// The outer `Result` carries broker failures (resolve or receive); the
    /// inner one carries a handler abort.
    pub fn poll_once(
        &self,
        config: &QueueWorkerConfig,
    ) -> QueueResult<Result<PollOutcome, DispatchError>> {
        let address = self.address(config.queue.as_deref())?;
        let batch = self.dispatcher.client().receive(&address, config.max_messages)?;

        if batch.len() == 0 {
            return Ok(Ok(PollOutcome::Empty));
        }
        Ok(self.dispatcher.dispatch(batch).map(PollOutcome::Dispatched))
    }

    /// Resolve `queue` on first use; a failed lookup is retried on the next poll.
    fn address(&self, queue: Option<&str>) -> QueueResult<String> {
        let key = queue.map(str::to_string);
        let mut addresses = self.addresses.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(address) = addresses.get(&key) {
            return Ok(address.clone());
        }
        let address = self.dispatcher.client().resolve(queue)?;
        addresses.insert(key, address.clone());
        Ok(address)
    }

    /// Spawn the worker on a named background thread.
    pub fn spawn(self, config: QueueWorkerConfig) -> io::Result<QueueWorkerHandle> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let stats = Arc::new(Mutex::new(WorkerStats::default()));
        let stats_clone = stats.clone();

        let join = thread::Builder::new()
            .name(config.name.clone())
            .spawn(move || {
                worker_loop(self, config, shutdown_rx, stats_clone);
            })?;

        Ok(QueueWorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        })
    }
}

fn worker_loop<T: SqsTransport + 'static>(
    worker: QueueWorker<T>,
    config: QueueWorkerConfig,
    shutdown_rx: mpsc::Receiver<()>,
    stats: Arc<Mutex<WorkerStats>>,
) {
    info!(worker = %config.name, queue = ?config.queue, "queue worker started");
    let start_time = Instant::now();

    loop {
        let idle = match worker.poll_once(&config) {
            Ok(Ok(PollOutcome::Empty)) => true,
            Ok(Ok(PollOutcome::Dispatched(report))) => {
                debug!(worker = %config.name, ?report, "batch dispatched");
                let mut s = lock_stats(&stats);
                s.batches += 1;
                s.messages += report.processed as u64;
                s.deleted += report.deleted as u64;
                s.released += report.released as u64;
                false
            }
            Ok(Err(DispatchError::Handler {
                message_id,
                position,
                error,
                report,
            })) => {
                warn!(
                    worker = %config.name,
                    message_id = %message_id,
                    position,
                    error = %error,
                    "handler failed; batch aborted"
                );
                let mut s = lock_stats(&stats);
                s.batches += 1;
                s.messages += report.processed as u64 + 1;
                s.deleted += report.deleted as u64;
                s.released += report.released as u64;
                s.handler_failures += 1;
                false
            }
            Ok(Err(DispatchError::Event(e))) | Err(e) => {
                error!(worker = %config.name, error = %e, "failed to receive batch");
                lock_stats(&stats).broker_errors += 1;
                true
            }
        };

        lock_stats(&stats).uptime_secs = start_time.elapsed().as_secs();

        let wait = if idle { config.poll_interval } else { Duration::ZERO };
        match shutdown_rx.recv_timeout(wait) {
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    info!(worker = %config.name, "queue worker stopped");
}

fn lock_stats(stats: &Mutex<WorkerStats>) -> MutexGuard<'_, WorkerStats> {
    stats.lock().unwrap_or_else(PoisonError::into_inner)
}
