//! Cross-process links over POSIX message queues.
//!
//! A remote stream connects endpoints in different processes that share a
//! topic. Each side opens the same named queue, derived from the topic and
//! the sample type:
//!
//! - [`QueueTransport`] in [`Role::Sender`]: encodes samples with the
//!   type's [`Codec`](crate::codec::Codec) and enqueues them without blocking
//! - [`QueueTransport`] in [`Role::Receiver`]: dequeues and decodes
//! - [`ReceiveStream`]: a dispatcher thread that drains a receiver into its
//!   output as messages arrive
//!
//! ## Delivery
//!
//! Queues are bounded and never block a sender: when full, the new sample is
//! dropped with [`Error::EnqueueFailed`](crate::Error::EnqueueFailed).
//! Undecodable messages are dropped and counted on the receiving side.

mod dispatcher;
mod mqueue;
mod transport;

pub use dispatcher::ReceiveStream;
pub use mqueue::{MessageQueue, QueueName, Readiness, Role, unlink, validate_topic};
pub use transport::{QueueTransport, StreamStats, StreamStatsSnapshot};
