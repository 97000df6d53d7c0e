//! Error types for topiclink.

use thiserror::Error;

/// Result type alias using topiclink's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for topiclink operations.
///
/// Build-time failures (`BuildFailed`, `TypeMismatch`, queue open errors) are
/// reported once when a pipeline is assembled. Per-sample failures
/// (`Decode`, `EnqueueFailed`, `MessageTooLarge`, `CellContended`) only affect
/// the sample in question; the pipeline keeps running.
#[derive(Error, Debug)]
pub enum Error {
    /// A pipeline could not be assembled.
    #[error("failed to build pipeline for topic '{topic}': {reason}")]
    BuildFailed {
        /// Topic the build was attempted for.
        topic: String,
        /// Human readable cause.
        reason: String,
    },

    /// Received bytes could not be decoded into a sample.
    #[error("decode failed: {0}")]
    Decode(String),

    /// A sample could not be encoded.
    #[error("encode failed: {0}")]
    Encode(String),

    /// The bounded queue is full; the sample was dropped.
    #[error("queue full: sample dropped")]
    EnqueueFailed,

    /// The encoded sample does not fit into one queue message.
    #[error("message of {len} bytes exceeds queue limit of {max} bytes")]
    MessageTooLarge {
        /// Encoded length.
        len: usize,
        /// Queue message size limit.
        max: usize,
    },

    /// A topic is already in use with a different sample type.
    #[error("type mismatch on topic '{topic}': registered as {registered}, requested {requested}")]
    TypeMismatch {
        /// Topic name.
        topic: String,
        /// Type the topic was first registered with.
        registered: &'static str,
        /// Type of the rejected endpoint.
        requested: &'static str,
    },

    /// A topic already has a publication in this process.
    #[error("topic '{0}' already has a publication")]
    TopicTaken(String),

    /// Topic name cannot be used.
    #[error("invalid topic name '{0}'")]
    InvalidTopic(String),

    /// `set_output` was called on a node that already has an output.
    #[error("node output is already linked")]
    AlreadyLinked,

    /// A node was asked to become its own output.
    #[error("node cannot be linked to itself")]
    SelfLink,

    /// A node that needs an output has none.
    #[error("node output is not linked")]
    NotLinked,

    /// Operation not supported by the node's direction (e.g. reading a sender).
    #[error("operation not supported by a {0} node")]
    WrongDirection(&'static str),

    /// Every sample cell slot was pinned by readers during a write.
    #[error("all sample cell slots are pinned by readers")]
    CellContended,

    /// The queue has been closed.
    #[error("queue closed")]
    QueueClosed,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// System call error (via rustix).
    #[error("system error: {0}")]
    System(#[from] rustix::io::Errno),
}

impl Error {
    /// Build failure with a formatted reason.
    pub(crate) fn build(topic: &str, reason: impl std::fmt::Display) -> Self {
        Self::BuildFailed {
            topic: topic.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Short label for the `reason` of a dropped-sample metric.
    pub(crate) fn drop_reason(&self) -> &'static str {
        match self {
            Self::EnqueueFailed => "queue_full",
            Self::MessageTooLarge { .. } => "too_large",
            Self::Encode(_) => "encode",
            Self::Decode(_) => "decode",
            Self::CellContended => "contended",
            Self::QueueClosed => "closed",
            _ => "other",
        }
    }

    /// Whether this error only affects a single sample.
    pub fn is_per_sample(&self) -> bool {
        matches!(
            self,
            Self::Decode(_)
                | Self::Encode(_)
                | Self::EnqueueFailed
                | Self::MessageTooLarge { .. }
                | Self::CellContended
        )
    }
}
