//! Integration tests for cross-process streams over POSIX message queues.
//!
//! Both halves of each stream live in this process but in nodes with
//! separate topic tables, so samples can only travel through the queue.
//! Every test uses its own queue name prefix.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use topiclink::link::{MessageQueue, QueueName, QueueTransport, Role, unlink};
use topiclink::prelude::*;

fn queue_config(test: &str, capacity: usize) -> QueueConfig {
    QueueConfig::default()
        .with_capacity(capacity)
        .with_max_message_size(256)
        .with_name_prefix(format!("tl-it-{}-{test}.", std::process::id()))
}

fn remote(test: &str) -> TransportConfig {
    TransportConfig::default().with_queue(queue_config(test, 4))
}

fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

/// Removes a queue a sender may have recreated after its receiver left.
fn remove_queue<M: Codec>(config: &TransportConfig, topic: &str) {
    let name = QueueName::derive(&config.queue.name_prefix, topic, M::type_name()).unwrap();
    unlink(&name).unwrap();
}

// ============================================================================
// Delivery
// ============================================================================

#[test]
fn test_sample_crosses_queue_between_nodes() {
    let producer = Node::new(remote("cross"));
    let consumer = Node::new(remote("cross"));

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let subscriber = consumer
        .subscribe::<String, _>("/stream/cross", move |msg| sink.lock().unwrap().push(msg))
        .unwrap();
    assert!(subscriber.subscription().has_stream());

    let publisher = producer
        .advertise::<String>("/stream/cross", AdvertiseOptions::default())
        .unwrap();
    assert!(publisher.publication().has_stream());
    assert_eq!(publisher.subscriber_count(), 0);

    publisher.publish(&"over the wire".to_string()).unwrap();
    assert!(wait_for(|| subscriber.is_ready()));
    assert_eq!(subscriber.dispatch(), 1);
    assert_eq!(*seen.lock().unwrap(), vec!["over the wire".to_string()]);
}

#[test]
fn test_full_queue_rejects_newer_sample() {
    let config = queue_config("full", 1);
    let rx = QueueTransport::<u32>::open("/stream/full", Role::Receiver, &config).unwrap();
    let tx = QueueTransport::<u32>::open("/stream/full", Role::Sender, &config).unwrap();

    tx.write(&1).unwrap();
    assert!(matches!(tx.write(&2), Err(Error::EnqueueFailed)));
    assert_eq!(tx.stats().enqueue_failures, 1);

    let mut value = 0;
    assert_eq!(rx.read(&mut value, false).unwrap(), FlowStatus::NewData);
    assert_eq!(value, 1);
    assert_eq!(rx.read(&mut value, false).unwrap(), FlowStatus::NoData);
}

#[test]
fn test_undecodable_message_does_not_stop_stream() {
    let config = remote("garbage");
    let consumer = Node::new(config.clone());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let subscriber = consumer
        .subscribe::<u64, _>("/stream/garbage", move |v| sink.lock().unwrap().push(v))
        .unwrap();

    let name = QueueName::derive(
        &config.queue.name_prefix,
        "/stream/garbage",
        <u64 as Codec>::type_name(),
    )
    .unwrap();
    let raw = MessageQueue::open(name, Role::Sender, &config.queue).unwrap();
    raw.send(b"not an archived u64").unwrap();

    let producer = Node::new(config);
    let publisher = producer
        .advertise::<u64>("/stream/garbage", AdvertiseOptions::default())
        .unwrap();
    publisher.publish(&99).unwrap();

    assert!(wait_for(|| subscriber.is_ready()));
    assert_eq!(subscriber.dispatch(), 1);
    assert_eq!(*seen.lock().unwrap(), vec![99]);
    drop(raw);
}

// ============================================================================
// Restarts
// ============================================================================

#[test]
fn test_publisher_reaches_restarted_subscriber() {
    let producer = Node::new(remote("resub"));
    let consumer = Node::new(remote("resub"));
    let publisher = producer
        .advertise::<u32>("/stream/resub", AdvertiseOptions::default())
        .unwrap();

    let first = consumer
        .subscribe::<u32, _>("/stream/resub", |_| {})
        .unwrap();
    publisher.publish(&1).unwrap();
    assert!(wait_for(|| first.is_ready()));
    assert_eq!(first.dispatch(), 1);
    drop(first);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let second = consumer
        .subscribe::<u32, _>("/stream/resub", move |v| sink.lock().unwrap().push(v))
        .unwrap();
    for value in 2..=6 {
        publisher.publish(&value).unwrap();
        assert!(wait_for(|| second.is_ready()));
        assert_eq!(second.dispatch(), 1);
    }
    assert_eq!(*seen.lock().unwrap(), vec![2, 3, 4, 5, 6]);
}

#[test]
fn test_restarted_publisher_reaches_subscriber() {
    let producer = Node::new(remote("repub"));
    let consumer = Node::new(remote("repub"));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let subscriber = consumer
        .subscribe::<u32, _>("/stream/repub", move |v| sink.lock().unwrap().push(v))
        .unwrap();

    let first = producer
        .advertise::<u32>("/stream/repub", AdvertiseOptions::default())
        .unwrap();
    first.publish(&1).unwrap();
    assert!(wait_for(|| subscriber.is_ready()));
    assert_eq!(subscriber.dispatch(), 1);
    drop(first);

    let second = producer
        .advertise::<u32>("/stream/repub", AdvertiseOptions::default())
        .unwrap();
    second.publish(&2).unwrap();
    assert!(wait_for(|| subscriber.is_ready()));
    assert_eq!(subscriber.dispatch(), 1);
    assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
}

// ============================================================================
// Teardown
// ============================================================================

#[test]
fn test_subscriber_drop_with_idle_dispatcher_returns_promptly() {
    let consumer = Node::new(remote("idle"));
    let subscriber = consumer
        .subscribe::<u32, _>("/stream/idle", |_| {})
        .unwrap();
    assert!(subscriber.subscription().has_stream());
    thread::sleep(Duration::from_millis(20));

    let started = Instant::now();
    drop(subscriber);
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[test]
fn test_teardown_under_load_does_not_hang() {
    let config = remote("load");
    let producer = Node::new(config.clone());
    let consumer = Node::new(config.clone());
    let subscriber = consumer
        .subscribe::<u64, _>("/stream/load", |_| {})
        .unwrap();
    let publisher = producer
        .advertise::<u64>("/stream/load", AdvertiseOptions::default())
        .unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let flooder = {
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut seq = 0u64;
            while !stop.load(Ordering::SeqCst) {
                // Full-queue and closed-peer errors are expected here.
                let _ = publisher.publish(&seq);
                seq += 1;
            }
            publisher
        })
    };

    thread::sleep(Duration::from_millis(50));
    let started = Instant::now();
    drop(subscriber);
    assert!(started.elapsed() < Duration::from_secs(2));

    stop.store(true, Ordering::SeqCst);
    let publisher = flooder.join().unwrap();
    let started = Instant::now();
    drop(publisher);
    assert!(started.elapsed() < Duration::from_secs(1));
    remove_queue::<u64>(&config, "/stream/load");
}

#[test]
fn test_closing_stream_keeps_local_connections() {
    let config = remote("mixed");
    let node = Node::new(config.clone());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let subscriber = node
        .subscribe::<u32, _>("/stream/mixed", move |v| sink.lock().unwrap().push(v))
        .unwrap();
    let publisher = node
        .advertise::<u32>("/stream/mixed", AdvertiseOptions::default())
        .unwrap();
    assert_eq!(publisher.subscriber_count(), 1);

    subscriber.subscription().close_stream();
    assert!(!subscriber.subscription().has_stream());

    publisher.publish(&6).unwrap();
    assert_eq!(subscriber.dispatch(), 1);
    assert_eq!(*seen.lock().unwrap(), vec![6]);
    drop(publisher);
    remove_queue::<u32>(&config, "/stream/mixed");
}
