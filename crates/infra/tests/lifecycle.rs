//! End-to-end job lifecycle against the in-memory broker.
//!
//! Enqueue → receive → dispatch → delete/release, observed only through the
//! public API and the broker's own counters.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use proptest::prelude::*;

use leaseq_core::{JobHandle, JobRecord, QueueBackend, QueueConfig, RECEIVE_COUNT_ATTRIBUTE, RawMessage, SendOptions};
use leaseq_infra::transport::in_memory::BrokerOperation;
use leaseq_infra::{DeliveryDispatcher, DispatchError, InMemorySqs, QueueClient, SqsJob, SqsQueue};

const BASE_URL: &str = "https://sqs.sa-east-1.amazonaws.com/000000000000";

fn broker(queues: &[&str]) -> Arc<InMemorySqs> {
    leaseq_observability::init();
    let broker = Arc::new(InMemorySqs::with_base_url(BASE_URL));
    for name in queues {
        broker.create_queue(name);
    }
    broker
}

fn prefixed(queue: &str) -> QueueConfig {
    QueueConfig::new().with_queue(queue).with_prefix(format!("{BASE_URL}/"))
}

/// Poll `check` until it holds or `timeout` elapses.
fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(10));
    }
}

fn raw_message(id: &str, receive_count: &str) -> RawMessage {
    RawMessage {
        message_id: id.to_string(),
        receipt_handle: format!("rh-{id}"),
        attributes: HashMap::from([(RECEIVE_COUNT_ATTRIBUTE.to_string(), receive_count.to_string())]),
        source_address: "arn:aws:sqs:sa-east-1:000000000000:work".to_string(),
        body: format!("{{\"id\":\"{id}\"}}"),
    }
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 256, ..ProptestConfig::default() })]

    #[test]
    fn identity_and_attempts_come_from_the_raw_message(
        id in "[a-f0-9-]{1,36}",
        count in 1u32..100_000,
    ) {
        let broker = broker(&["work"]);
        let client = QueueClient::new(broker, prefixed("work")).unwrap();

        let job = SqsJob::new(&client, JobRecord::from_raw(raw_message(&id, &count.to_string())));
        prop_assert_eq!(job.job_id(), id.as_str());
        prop_assert_eq!(job.attempts().unwrap(), count);
    }

    #[test]
    fn prefixed_resolution_never_calls_the_broker(
        queue in "[a-z][a-z0-9_-]{0,40}",
        slashes in 0usize..3,
    ) {
        let broker = broker(&[]);
        let prefix = format!("{BASE_URL}{}", "/".repeat(slashes));
        let client = QueueClient::new(broker.clone(), QueueConfig::new().with_prefix(prefix)).unwrap();

        prop_assert_eq!(client.resolve(Some(&queue)).unwrap(), format!("{BASE_URL}/{queue}"));
        prop_assert_eq!(broker.total_calls(), 0);
    }

    #[test]
    fn handler_never_sees_messages_after_a_failure(
        len in 1usize..10,
        fail_at in 0usize..10,
    ) {
        let fail_at = fail_at % len;
        let broker = broker(&["work"]);
        let client = QueueClient::new(broker, prefixed("work")).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let failing_id = format!("m{fail_at}");
        let dispatcher = DeliveryDispatcher::new(client, move |job| {
            sink.lock().unwrap().push(job.job_id().to_string());
            if job.job_id() == failing_id {
                anyhow::bail!("handler rejected {}", job.job_id());
            }
            Ok(())
        });

        let batch: Vec<_> = (0..len).map(|i| raw_message(&format!("m{i}"), "1")).collect();
        let err = dispatcher.dispatch(batch).unwrap_err();

        let expected: Vec<String> = (0..=fail_at).map(|i| format!("m{i}")).collect();
        prop_assert_eq!(seen.lock().unwrap().clone(), expected);
        let failed_id = format!("m{fail_at}");
        prop_assert_eq!(err.message_id(), Some(failed_id.as_str()));
    }
}

#[test]
fn resolution_without_prefix_uses_exactly_one_lookup() {
    let broker = broker(&["emails"]);
    let client = QueueClient::new(broker.clone(), QueueConfig::new()).unwrap();

    let address = client.resolve(Some("emails")).unwrap();
    assert_eq!(address, format!("{BASE_URL}/emails"));
    assert_eq!(broker.call_count(BrokerOperation::GetQueueUrl), 1);
    assert_eq!(broker.total_calls(), 1);
}

#[test]
fn release_sets_the_requested_visibility() {
    let broker = broker(&["work"]);
    let queue = SqsQueue::new(broker.clone(), prefixed("work")).unwrap();
    queue.push_raw("a", None, SendOptions::new()).unwrap();
    queue.push_raw("b", None, SendOptions::new()).unwrap();

    let mut later = queue.pop(None).unwrap().unwrap();
    let later_handle = later.receipt_handle().to_string();
    later.release(45).unwrap();
    assert_eq!(broker.visibility_timeout_of(&later_handle), Some(45));

    let mut now = queue.pop(None).unwrap().unwrap();
    let now_handle = now.receipt_handle().to_string();
    now.release(0).unwrap();
    assert_eq!(broker.visibility_timeout_of(&now_handle), Some(0));

    // Zero makes it deliverable straight away; the other one is still hidden.
    let redelivered = queue.pop(None).unwrap().unwrap();
    assert_eq!(redelivered.raw_body(), "b");
    assert_eq!(redelivered.attempts().unwrap(), 2);
    assert!(queue.pop(None).unwrap().is_none());
}

#[test]
fn second_delete_of_the_same_record_is_tolerated() {
    let broker = broker(&["work"]);
    let queue = SqsQueue::new(broker.clone(), prefixed("work")).unwrap();
    queue.push_raw("once", None, SendOptions::new()).unwrap();

    let mut job = queue.pop(None).unwrap().unwrap();
    job.delete().unwrap();
    job.delete().unwrap();

    assert!(job.is_deleted());
    assert_eq!(broker.call_count(BrokerOperation::DeleteMessage), 2);
    assert_eq!(broker.stored_messages("work"), 0);
}

#[test]
fn batch_of_three_aborts_at_the_second_message() {
    let broker = broker(&["work"]);
    let client = QueueClient::new(broker.clone(), prefixed("work")).unwrap();
    let address = client.resolve(None).unwrap();
    for body in ["first", "poison", "third"] {
        client.enqueue(&address, body, SendOptions::new()).unwrap();
    }

    let handled = Arc::new(Mutex::new(Vec::new()));
    let sink = handled.clone();
    let dispatcher = DeliveryDispatcher::new(client.clone(), move |job| {
        sink.lock().unwrap().push(job.raw_body().to_string());
        if job.raw_body() == "poison" {
            anyhow::bail!("cannot handle poison");
        }
        job.delete()?;
        Ok(())
    });

    let batch = client.receive(&address, 10).unwrap();
    assert_eq!(batch.len(), 3);

    match dispatcher.dispatch(batch).unwrap_err() {
        DispatchError::Handler { position, error, .. } => {
            assert_eq!(position, 1);
            assert_eq!(error.to_string(), "cannot handle poison");
        }
        other => panic!("unexpected error: {other:?}"),
    }

    assert_eq!(*handled.lock().unwrap(), vec!["first", "poison"]);
    // First deleted; poison and third remain leased on the broker.
    assert_eq!(broker.call_count(BrokerOperation::DeleteMessage), 1);
    assert_eq!(broker.stored_messages("work"), 2);

    // Once the leases lapse both come back, the untouched one on its first retry.
    broker.advance(Duration::from_secs(31));
    let mut redelivered: Vec<_> = client.receive(&address, 10).unwrap().map(|m| m.body).collect();
    redelivered.sort();
    assert_eq!(redelivered, vec!["poison", "third"]);
}

#[test]
fn delayed_enqueue_is_invisible_until_the_delay_passes() {
    let broker = broker(&["work"]);
    let queue = SqsQueue::new(broker.clone(), prefixed("work")).unwrap();

    queue
        .push_raw("later", None, SendOptions::delayed(30))
        .unwrap();
    assert!(queue.pop(None).unwrap().is_none());

    broker.advance(Duration::from_secs(29));
    assert!(queue.pop(None).unwrap().is_none());

    broker.advance(Duration::from_secs(1));
    assert_eq!(queue.pop(None).unwrap().unwrap().raw_body(), "later");
}

#[test]
fn size_is_approximately_three_after_five_enqueues_and_two_deletes() {
    let broker = broker(&["work"]);
    let queue = SqsQueue::new(broker.clone(), prefixed("work")).unwrap();
    for i in 0..5 {
        queue.push_raw(&i.to_string(), None, SendOptions::new()).unwrap();
    }

    for _ in 0..2 {
        let mut job = queue.pop(None).unwrap().unwrap();
        job.delete().unwrap();
    }

    assert!(eventually(Duration::from_secs(2), || {
        queue.size(None).map(|n| n.abs_diff(3) <= 1).unwrap_or(false)
    }));
}

#[test]
fn lambda_event_round_trip_through_the_dispatcher() {
    let broker = broker(&["payments"]);
    let client = QueueClient::new(broker.clone(), prefixed("payments")).unwrap();
    let address = client.resolve(None).unwrap();
    client.enqueue(&address, "{\"amount\":10}", SendOptions::new()).unwrap();

    // Shape the received message the way a push-style delivery would.
    let mut raw = client.receive(&address, 1).unwrap().next().unwrap();
    raw.source_address = "arn:aws:sqs:sa-east-1:000000000000:payments".to_string();
    let event = serde_json::json!({ "Records": [raw] }).to_string();

    let dispatcher = DeliveryDispatcher::new(client, |job| {
        assert_eq!(job.queue(), "payments");
        assert_eq!(job.connection_name(), "sqs");
        job.delete()?;
        Ok(())
    });

    let report = dispatcher.dispatch_json(&event).unwrap();
    assert_eq!(report.deleted, 1);
    assert_eq!(broker.stored_messages("payments"), 0);
}
