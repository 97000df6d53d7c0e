//! Tracing integration for structured logging and spans.

use crate::link::Role;
use tracing::{Level, Span, span};

/// Create a span covering work on one topic.
///
/// # Example
///
/// ```rust,ignore
/// use topiclink::observability::span_topic;
///
/// let _guard = span_topic("/robot/pose").entered();
/// // Connection building here...
/// ```
#[inline]
pub fn span_topic(topic: &str) -> Span {
    span!(Level::DEBUG, "topic", topic = %topic)
}

/// Create a span for one end of a remote stream.
#[inline]
pub fn span_stream(topic: &str, role: Role) -> Span {
    span!(Level::DEBUG, "stream", topic = %topic, role = %role)
}

/// Log a connection being built.
#[inline]
pub fn trace_connection_built(topic: &str, kind: &str) {
    tracing::debug!(topic = %topic, kind = %kind, "connection built");
}

/// Log a failed build.
#[inline]
pub fn trace_build_failed(topic: &str, kind: &str, error: &dyn std::error::Error) {
    tracing::warn!(topic = %topic, kind = %kind, error = %error, "connection build failed");
}
