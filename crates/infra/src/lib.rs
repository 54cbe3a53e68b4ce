//! Broker-facing layer: transport, address resolution, the job lifecycle,
//! batch dispatch and the polling worker.

pub mod client;
pub mod config;
pub mod dispatcher;
pub mod job;
pub mod queue;
pub mod resolver;
pub mod transport;
pub mod worker;

pub use client::{QueueClient, ReceivedBatch};
pub use config::{load_config, load_config_from};
pub use dispatcher::{BatchReport, DeliveryDispatcher, DispatchError, JobHandler};
pub use job::SqsJob;
pub use queue::SqsQueue;
pub use resolver::QueueAddressResolver;
pub use transport::{InMemorySqs, SqsTransport, TransportError};
pub use worker::{PollOutcome, QueueWorker, QueueWorkerConfig, QueueWorkerHandle, WorkerStats};
