//! # topiclink
//!
//! Typed publish/subscribe transport for topics, within one process and
//! across processes on the same Linux host.
//!
//! Every connection is a small chain of forwarding nodes assembled once:
//! in-process connections hand samples over through a lock-free latest-value
//! cell, cross-process streams serialize them into bounded POSIX message
//! queues and a dispatcher thread pushes them back into a cell on the other
//! side.
//!
//! ## Features
//!
//! - **Latest-value semantics**: writers never wait for readers; a slow
//!   consumer sees the newest sample, never a torn one
//! - **Two transports**: local store nodes and POSIX message queues
//! - **rkyv serialization**: validated decoding at process boundaries
//! - **Late binding**: endpoints connect whichever side appears first
//!
//! ## Quick Start
//!
//! ```rust
//! use topiclink::prelude::*;
//!
//! let node = Node::new(TransportConfig::local_only());
//! let publisher = node.advertise::<String>("/chatter", AdvertiseOptions::default()).unwrap();
//! let subscriber = node
//!     .subscribe::<String, _>("/chatter", |msg| println!("heard {msg}"))
//!     .unwrap();
//!
//! publisher.publish(&"hello".to_string()).unwrap();
//! assert_eq!(subscriber.dispatch(), 1);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

#[cfg(not(target_os = "linux"))]
compile_error!("topiclink requires Linux (POSIX message queues and eventfd)");

pub mod codec;
pub mod config;
pub mod element;
pub mod endpoint;
pub mod error;
pub mod link;
pub mod memory;
pub mod node;
pub mod observability;
pub mod pipeline;
pub mod registry;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::codec::{Codec, Sample};
    pub use crate::config::{QueueConfig, TransportConfig};
    pub use crate::element::{ChannelNode, FlowStatus};
    pub use crate::endpoint::{Endpoint, Publication, Subscription};
    pub use crate::error::{Error, Result};
    pub use crate::node::{AdvertiseOptions, Node, Publisher, Subscriber};
    pub use crate::pipeline::ConnectionFactory;
}

pub use error::{Error, Result};
pub use node::Node;

#[doc(hidden)]
pub use rkyv;
