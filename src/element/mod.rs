//! Forwarding nodes that transport chains are built from.
//!
//! Every connection between a publication and a subscription is a singly
//! linked chain of [`ChannelNode`]s:
//!
//! - [`EndpointInputAdapter`]: head of a chain, fed by a publication
//! - [`StoreNode`]: latest-value buffer
//! - [`QueueTransport`](crate::link::QueueTransport): crosses a process
//!   boundary through a POSIX message queue
//! - [`EndpointOutputAdapter`]: tail of a chain, read by a subscription
//!
//! # Design
//!
//! Chains are built once and never rewired. Writes push a sample toward the
//! tail; reads pull the newest sample from the node's input side and report a
//! [`FlowStatus`]. Nodes are shared as [`NodeRef`] (`Arc<dyn ChannelNode<M>>`)
//! and are safe to call from any thread.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use topiclink::element::{ChannelNode, FlowStatus, StoreNode};
//!
//! let head = StoreNode::new(0u32);
//! let tail = Arc::new(StoreNode::new(0u32));
//! head.set_output(tail.clone()).unwrap();
//!
//! head.write(&7).unwrap();
//!
//! let mut value = 0;
//! assert_eq!(tail.read(&mut value, false).unwrap(), FlowStatus::NewData);
//! assert_eq!(value, 7);
//! ```

mod endpoint;
mod pad;
mod store;
mod traits;

pub use endpoint::{EndpointInputAdapter, EndpointOutputAdapter};
pub use pad::OutputPad;
pub use store::StoreNode;
pub use traits::{ChannelNode, FlowStatus, NodeKind, NodeRef};
