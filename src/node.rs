//! High-level facade: advertise and subscribe by topic name.
//!
//! A [`Node`] ties the [`TopicTable`], the [`ConnectionFactory`] and the
//! endpoints together. Advertising or subscribing registers the endpoint,
//! gives it a remote stream when enabled, and connects it to every matching
//! endpoint already known in this process, whichever side came first.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicU64, Ordering};
//! use topiclink::config::TransportConfig;
//! use topiclink::node::{AdvertiseOptions, Node};
//!
//! let node = Node::new(TransportConfig::local_only());
//!
//! let last = Arc::new(AtomicU64::new(0));
//! let sink = Arc::clone(&last);
//! let subscriber = node
//!     .subscribe::<u64, _>("/odometry/ticks", move |ticks| sink.store(ticks, Ordering::SeqCst))
//!     .unwrap();
//!
//! let publisher = node
//!     .advertise::<u64>("/odometry/ticks", AdvertiseOptions::default())
//!     .unwrap();
//! publisher.publish(&42).unwrap();
//!
//! assert_eq!(subscriber.dispatch(), 1);
//! assert_eq!(last.load(Ordering::SeqCst), 42);
//! ```

use crate::codec::Sample;
use crate::config::TransportConfig;
use crate::endpoint::{Endpoint, Publication, Subscription};
use crate::error::Result;
use crate::link::validate_topic;
use crate::observability::span_topic;
use crate::pipeline::ConnectionFactory;
use crate::registry::TopicTable;
use std::fmt;
use std::sync::Arc;

/// Options for [`Node::advertise`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdvertiseOptions {
    /// Keep the last published value and hand it to subscribers that
    /// connect later.
    pub latch: bool,
}

impl AdvertiseOptions {
    /// Options with latching enabled.
    pub fn latched() -> Self {
        Self { latch: true }
    }
}

/// Entry point for creating publishers and subscribers.
pub struct Node {
    table: Arc<TopicTable>,
    factory: ConnectionFactory,
}

impl Default for Node {
    fn default() -> Self {
        Self::new(TransportConfig::default())
    }
}

impl Node {
    /// Create a node with its own topic table.
    pub fn new(config: TransportConfig) -> Self {
        Self::with_table(Arc::new(TopicTable::new()), config)
    }

    /// Create a node sharing `table` with other nodes.
    pub fn with_table(table: Arc<TopicTable>, config: TransportConfig) -> Self {
        Self {
            table,
            factory: ConnectionFactory::new(config),
        }
    }

    /// The topic table.
    pub fn table(&self) -> &Arc<TopicTable> {
        &self.table
    }

    /// The connection factory.
    pub fn factory(&self) -> &ConnectionFactory {
        &self.factory
    }

    /// Start publishing `M` on `topic`.
    ///
    /// Fails if the topic name is invalid, already has a publication here, or
    /// carries another sample type. Stream and connection failures are
    /// logged; the publisher is returned either way.
    pub fn advertise<M: Sample>(&self, topic: &str, options: AdvertiseOptions) -> Result<Publisher<M>> {
        validate_topic(topic)?;
        let _span = span_topic(topic).entered();

        let publication = Publication::<M>::new(topic, options.latch);
        self.table.add_publication(&publication)?;
        let publisher = Publisher {
            publication: Arc::clone(&publication),
            table: Arc::clone(&self.table),
        };

        if self.factory.config().remote_streams {
            self.factory
                .build_stream(&Endpoint::Publication(Arc::clone(&publication)), true);
        }
        for subscription in self.table.lookup_subscriptions::<M>(topic)? {
            self.factory.build_local_connection(&publication, &subscription);
        }

        tracing::debug!(topic, latch = options.latch, "advertised");
        Ok(publisher)
    }

    /// Start receiving `M` on `topic`; `callback` runs inside
    /// [`Subscriber::dispatch`].
    pub fn subscribe<M, F>(&self, topic: &str, callback: F) -> Result<Subscriber<M>>
    where
        M: Sample,
        F: Fn(M) + Send + Sync + 'static,
    {
        validate_topic(topic)?;
        let _span = span_topic(topic).entered();

        let subscription = Subscription::<M>::new(topic, callback);
        self.table.add_subscription(&subscription)?;
        let subscriber = Subscriber {
            subscription: Arc::clone(&subscription),
            table: Arc::clone(&self.table),
        };

        if self.factory.config().remote_streams {
            self.factory
                .build_stream(&Endpoint::Subscription(Arc::clone(&subscription)), false);
        }
        if let Some(publication) = self.table.lookup_publication::<M>(topic)? {
            self.factory.build_local_connection(&publication, &subscription);
        }

        tracing::debug!(topic, "subscribed");
        Ok(subscriber)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("config", self.factory.config())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Handles
// ============================================================================

/// Handle to an advertised topic. Unregisters on drop.
pub struct Publisher<M: Sample> {
    publication: Arc<Publication<M>>,
    table: Arc<TopicTable>,
}

impl<M: Sample> Publisher<M> {
    /// Publish a sample to every connected subscriber.
    ///
    /// Every connection gets the sample even when one of them fails; the
    /// first failure is returned. With a sending stream open, the error may
    /// come from the stream alone: `Error::EnqueueFailed` while no remote
    /// receiver drains the queue, after local subscribers were served.
    pub fn publish(&self, sample: &M) -> Result<()> {
        self.publication.write(sample)
    }

    /// Topic name.
    pub fn topic(&self) -> &str {
        self.publication.topic()
    }

    /// The underlying publication.
    pub fn publication(&self) -> &Arc<Publication<M>> {
        &self.publication
    }

    /// Number of local subscribers connected.
    pub fn subscriber_count(&self) -> usize {
        self.publication.connection_count()
    }
}

impl<M: Sample> Drop for Publisher<M> {
    fn drop(&mut self) {
        self.table
            .remove_publication(self.publication.topic(), self.publication.id());
    }
}

/// Handle to a subscription. Unregisters on drop.
pub struct Subscriber<M: Sample> {
    subscription: Arc<Subscription<M>>,
    table: Arc<TopicTable>,
}

impl<M: Sample> Subscriber<M> {
    /// Deliver pending samples to the callback; returns the delivery count.
    pub fn dispatch(&self) -> usize {
        self.subscription.dispatch()
    }

    /// Whether a sample is waiting for [`dispatch`](Self::dispatch).
    pub fn is_ready(&self) -> bool {
        self.subscription.is_ready()
    }

    /// Topic name.
    pub fn topic(&self) -> &str {
        self.subscription.topic()
    }

    /// The underlying subscription.
    pub fn subscription(&self) -> &Arc<Subscription<M>> {
        &self.subscription
    }
}

impl<M: Sample> Drop for Subscriber<M> {
    fn drop(&mut self) {
        self.table
            .remove_subscription(self.subscription.topic(), self.subscription.id());
    }
}
