//! Pipeline construction.
//!
//! The [`ConnectionFactory`] turns a pair of endpoints into a chain of
//! forwarding nodes:
//!
//! ```text
//! local:    Publication ─► EndpointInputAdapter ─► StoreNode ◄─ EndpointOutputAdapter ◄─ Subscription
//! send:     Publication ─► EndpointInputAdapter ─► QueueTransport(sender) ─► mq
//! receive:  mq ─► QueueTransport(receiver) ─► EndpointOutputAdapter(StoreNode) ◄─ Subscription
//!                          ▲ ReceiveStream thread
//! ```
//!
//! # Example
//!
//! ```rust
//! use topiclink::config::TransportConfig;
//! use topiclink::endpoint::{Publication, Subscription};
//! use topiclink::pipeline::ConnectionFactory;
//!
//! let factory = ConnectionFactory::new(TransportConfig::local_only());
//! let publication = Publication::<u32>::new("/counter", false);
//! let subscription = Subscription::new("/counter", |value: u32| println!("{value}"));
//!
//! assert!(factory.build_local_connection(&publication, &subscription));
//! publication.write(&1).unwrap();
//! assert_eq!(subscription.dispatch(), 1);
//! ```

mod factory;

pub use factory::ConnectionFactory;
