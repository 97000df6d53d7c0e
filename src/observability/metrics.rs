//! Metrics collection using metrics-rs.

use metrics::{Counter, Unit, counter, gauge};
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether metrics have been initialized.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

const SAMPLES_PUBLISHED: &str = "topiclink_samples_published";
const SAMPLES_DELIVERED: &str = "topiclink_samples_delivered";
const SAMPLES_DROPPED: &str = "topiclink_samples_dropped";
const DECODE_ERRORS: &str = "topiclink_decode_errors";
const CONNECTIONS_BUILT: &str = "topiclink_connections_built";
const BUILD_FAILURES: &str = "topiclink_build_failures";
const QUEUE_DEPTH: &str = "topiclink_queue_depth";

/// Initialize metrics descriptions.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    metrics::describe_counter!(
        SAMPLES_PUBLISHED,
        Unit::Count,
        "Samples written by publications"
    );
    metrics::describe_counter!(
        SAMPLES_DELIVERED,
        Unit::Count,
        "Samples handed to subscription callbacks"
    );
    metrics::describe_counter!(
        SAMPLES_DROPPED,
        Unit::Count,
        "Samples lost on a connection (full queue, oversized, contended cell)"
    );
    metrics::describe_counter!(
        DECODE_ERRORS,
        Unit::Count,
        "Received messages that failed to decode"
    );
    metrics::describe_counter!(
        CONNECTIONS_BUILT,
        Unit::Count,
        "Local connections and remote streams built"
    );
    metrics::describe_counter!(
        BUILD_FAILURES,
        Unit::Count,
        "Connection or stream builds that failed"
    );
    metrics::describe_gauge!(
        QUEUE_DEPTH,
        Unit::Count,
        "Messages pending in a receive queue"
    );
}

/// Record a sample lost on a connection.
#[inline]
pub fn record_sample_dropped(topic: &str, reason: &'static str) {
    counter!(SAMPLES_DROPPED, "topic" => topic.to_string(), "reason" => reason).increment(1);
}

/// Record a received message that could not be decoded.
#[inline]
pub fn record_decode_error(topic: &str) {
    counter!(DECODE_ERRORS, "topic" => topic.to_string()).increment(1);
}

/// Record a connection or stream build outcome.
#[inline]
pub fn record_build(topic: &str, kind: &'static str, succeeded: bool) {
    let name = if succeeded { CONNECTIONS_BUILT } else { BUILD_FAILURES };
    counter!(name, "topic" => topic.to_string(), "kind" => kind).increment(1);
}

/// Record the number of messages pending in a queue.
#[inline]
pub fn record_queue_depth(topic: &str, depth: usize) {
    gauge!(QUEUE_DEPTH, "topic" => topic.to_string()).set(depth as f64);
}

/// Per-topic counters with pre-registered labels.
///
/// Held by endpoints so the per-sample path does not allocate label values.
#[derive(Clone)]
pub struct TopicMetrics {
    topic: String,
    published: Counter,
    delivered: Counter,
}

impl TopicMetrics {
    /// Create the collector for `topic`.
    pub fn new(topic: &str) -> Self {
        Self {
            topic: topic.to_string(),
            published: counter!(SAMPLES_PUBLISHED, "topic" => topic.to_string()),
            delivered: counter!(SAMPLES_DELIVERED, "topic" => topic.to_string()),
        }
    }

    /// Record one published sample.
    #[inline]
    pub fn record_published(&self) {
        self.published.increment(1);
    }

    /// Record samples delivered to a callback.
    #[inline]
    pub fn record_delivered(&self, count: u64) {
        self.delivered.increment(count);
    }

    /// The topic label.
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics() {
        init_metrics();
        init_metrics();
    }

    #[test]
    fn test_topic_metrics() {
        let metrics = TopicMetrics::new("/imu");
        metrics.record_published();
        metrics.record_delivered(3);
        assert_eq!(metrics.topic(), "/imu");
    }

    #[test]
    fn test_global_recording_functions() {
        // No recorder installed: all of these are no-ops.
        record_sample_dropped("/imu", "enqueue");
        record_decode_error("/imu");
        record_build("/imu", "local", true);
        record_build("/imu", "stream", false);
        record_queue_depth("/imu", 2);
    }
}
