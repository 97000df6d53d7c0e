//! Transport configuration and default constants.
//!
//! POSIX message queues are charged against `RLIMIT_MSGQUEUE` (800 KiB per
//! user by default) and bounded by `/proc/sys/fs/mqueue/msg_max` and
//! `msgsize_max` (10 messages of 8 KiB on a stock Linux kernel). The defaults
//! below stay inside those limits so an unprivileged process can open a few
//! dozen streams.
//!
//! # Usage
//!
//! ```rust
//! use topiclink::config::{QueueConfig, TransportConfig};
//!
//! let config = TransportConfig::default()
//!     .with_queue(QueueConfig::default().with_capacity(4).with_max_message_size(512))
//!     .with_remote_streams(false);
//! assert_eq!(config.queue.capacity, 4);
//! ```

// =============================================================================
// Defaults
// =============================================================================

/// Default number of messages a queue holds before sends fail.
pub const DEFAULT_QUEUE_CAPACITY: usize = 8;

/// Default maximum encoded sample size in bytes.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024;

/// Default prefix for queue names (`/` is added in front).
pub const DEFAULT_QUEUE_PREFIX: &str = "topiclink.";

/// Default number of concurrent readers a sample cell is sized for.
pub const DEFAULT_CELL_READERS: usize = 1;

/// Longest queue name accepted by Linux (`NAME_MAX`), including the leading `/`.
pub const MAX_QUEUE_NAME_LEN: usize = 255;

// =============================================================================
// QueueConfig
// =============================================================================

/// Settings for the OS message queues backing remote streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Maximum number of undelivered messages.
    pub capacity: usize,
    /// Maximum encoded size of one message.
    pub max_message_size: usize,
    /// Prefix for derived queue names.
    pub name_prefix: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_QUEUE_CAPACITY,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            name_prefix: DEFAULT_QUEUE_PREFIX.to_string(),
        }
    }
}

impl QueueConfig {
    /// Set the queue capacity (clamped to at least 1).
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Set the maximum message size (clamped to at least 1).
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size.max(1);
        self
    }

    /// Set the queue name prefix.
    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }
}

// =============================================================================
// TransportConfig
// =============================================================================

/// Top-level configuration used by the connection factory and [`Node`](crate::Node).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Whether endpoints get a cross-process stream in addition to local links.
    pub remote_streams: bool,
    /// Queue settings for remote streams.
    pub queue: QueueConfig,
    /// Concurrent readers each store node is sized for.
    pub cell_readers: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            remote_streams: true,
            queue: QueueConfig::default(),
            cell_readers: DEFAULT_CELL_READERS,
        }
    }
}

impl TransportConfig {
    /// Configuration for purely in-process use (no message queues).
    pub fn local_only() -> Self {
        Self {
            remote_streams: false,
            ..Self::default()
        }
    }

    /// Enable or disable remote streams.
    pub fn with_remote_streams(mut self, enabled: bool) -> Self {
        self.remote_streams = enabled;
        self
    }

    /// Replace the queue settings.
    pub fn with_queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    /// Set the number of readers store nodes are sized for.
    pub fn with_cell_readers(mut self, readers: usize) -> Self {
        self.cell_readers = readers.max(1);
        self
    }
}
