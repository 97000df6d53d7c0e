//! Observability features: metrics and tracing.
//!
//! ## Metrics
//!
//! Recorded through the `metrics` facade; install any exporter to collect
//! them. Without a recorder every call is a no-op.
//!
//! | Metric | Type | Description |
//! |--------|------|-------------|
//! | `topiclink_samples_published` | Counter | Samples written by publications |
//! | `topiclink_samples_delivered` | Counter | Samples handed to callbacks |
//! | `topiclink_samples_dropped` | Counter | Samples lost on a connection, by reason |
//! | `topiclink_decode_errors` | Counter | Undecodable received messages |
//! | `topiclink_connections_built` | Counter | Connections and streams built |
//! | `topiclink_build_failures` | Counter | Failed connection/stream builds |
//! | `topiclink_queue_depth` | Gauge | Messages pending in a receive queue |
//!
//! ## Tracing
//!
//! Builds log at `debug`, per-sample failures at `warn`, and per-sample
//! traffic at `trace`. Dispatcher threads run inside a `stream` span.

mod metrics;
mod tracing_support;

pub use metrics::{
    TopicMetrics, init_metrics, record_build, record_decode_error, record_queue_depth,
    record_sample_dropped,
};
pub use tracing_support::{span_stream, span_topic, trace_build_failed, trace_connection_built};
