//! Producing endpoint.

use crate::codec::Sample;
use crate::element::{ChannelNode, EndpointInputAdapter};
use crate::endpoint::{Subscription, next_endpoint_id};
use crate::error::Result;
use crate::memory::SampleCell;
use crate::observability::{self, TopicMetrics};
use smallvec::SmallVec;
use std::fmt;
use std::sync::{Arc, RwLock, Weak};

/// Where a chain leads.
enum Peer<M> {
    /// A subscription in this process.
    Local {
        id: u64,
        subscription: Weak<Subscription<M>>,
    },
    /// A message queue toward other processes.
    Stream,
}

struct Chain<M> {
    head: Arc<EndpointInputAdapter<M>>,
    peer: Peer<M>,
}

impl<M> Chain<M> {
    fn is_live(&self) -> bool {
        match &self.peer {
            Peer::Local { subscription, .. } => subscription.strong_count() > 0,
            Peer::Stream => true,
        }
    }

    fn is_local_to(&self, subscription_id: u64) -> bool {
        matches!(self.peer, Peer::Local { id, .. } if id == subscription_id)
    }
}

/// The producing end of a topic.
///
/// Owns the heads of its chains: one per local subscription and at most one
/// remote stream. [`write`](Self::write) offers each sample to every chain.
///
/// Chains toward subscriptions that were dropped are pruned on the next write.
pub struct Publication<M> {
    id: u64,
    topic: Arc<str>,
    chains: RwLock<SmallVec<[Chain<M>; 2]>>,
    latched: Option<SampleCell<M>>,
    metrics: TopicMetrics,
}

impl<M> Publication<M> {
    /// Unique id of this endpoint within the process.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Topic name.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub(crate) fn topic_arc(&self) -> Arc<str> {
        Arc::clone(&self.topic)
    }

    /// Whether the last written value is kept for late connections.
    pub fn is_latched(&self) -> bool {
        self.latched.is_some()
    }
}

impl<M: Sample> Publication<M> {
    /// Create a publication on `topic`. With `latch` set, the last written
    /// value seeds every connection built afterwards.
    pub fn new(topic: &str, latch: bool) -> Arc<Self> {
        Arc::new(Self {
            id: next_endpoint_id(),
            topic: Arc::from(topic),
            chains: RwLock::new(SmallVec::new()),
            latched: latch.then(|| SampleCell::new(M::default())),
            metrics: TopicMetrics::new(topic),
        })
    }

    /// Offer `sample` to every attached chain.
    ///
    /// A failure on one chain does not stop delivery to the others. Failures
    /// are logged and counted; the first one is returned.
    pub fn write(&self, sample: &M) -> Result<()> {
        if let Some(latched) = &self.latched {
            if let Err(e) = latched.write(sample.clone()) {
                tracing::warn!(topic = %self.topic, error = %e, "failed to latch sample");
            }
        }

        let mut first_error = None;
        let mut stale = false;
        {
            let chains = match self.chains.read() {
                Ok(chains) => chains,
                Err(poisoned) => poisoned.into_inner(),
            };
            for chain in chains.iter() {
                if !chain.is_live() {
                    stale = true;
                    continue;
                }
                if let Err(e) = chain.head.write(sample) {
                    if e.is_per_sample() {
                        tracing::debug!(topic = %self.topic, error = %e, "sample not delivered on one connection");
                    } else {
                        tracing::warn!(topic = %self.topic, error = %e, "sample not delivered on one connection");
                    }
                    observability::record_sample_dropped(&self.topic, e.drop_reason());
                    first_error.get_or_insert(e);
                }
            }
        }
        self.metrics.record_published();

        if stale {
            self.prune();
        }
        first_error.map_or(Ok(()), Err)
    }

    /// The latched value, if latching is on and anything was written.
    pub fn latched_value(&self) -> Option<M> {
        self.latched.as_ref().and_then(SampleCell::latest)
    }

    /// Number of live local connections.
    pub fn connection_count(&self) -> usize {
        self.with_chains(|chains| {
            chains
                .iter()
                .filter(|chain| matches!(chain.peer, Peer::Local { .. }) && chain.is_live())
                .count()
        })
    }

    /// Whether a remote stream is attached.
    pub fn has_stream(&self) -> bool {
        self.with_chains(|chains| chains.iter().any(|chain| matches!(chain.peer, Peer::Stream)))
    }

    /// Whether a local connection to the subscription with `subscription_id`
    /// exists.
    pub fn is_connected_to(&self, subscription_id: u64) -> bool {
        self.with_chains(|chains| chains.iter().any(|chain| chain.is_local_to(subscription_id)))
    }

    /// Whether any chain can accept a write.
    pub fn is_ready(&self) -> bool {
        self.with_chains(|chains| {
            chains
                .iter()
                .any(|chain| chain.is_live() && chain.head.is_ready())
        })
    }

    /// Attach the head of a local connection. Refused if one to the same
    /// subscription exists.
    pub(crate) fn attach_local(
        &self,
        head: Arc<EndpointInputAdapter<M>>,
        subscription: &Arc<Subscription<M>>,
    ) -> bool {
        let mut chains = match self.chains.write() {
            Ok(chains) => chains,
            Err(poisoned) => poisoned.into_inner(),
        };
        if chains.iter().any(|chain| chain.is_local_to(subscription.id())) {
            return false;
        }
        chains.push(Chain {
            head,
            peer: Peer::Local {
                id: subscription.id(),
                subscription: Arc::downgrade(subscription),
            },
        });
        true
    }

    /// Attach the head of the remote stream. Refused if one exists.
    pub(crate) fn attach_stream(&self, head: Arc<EndpointInputAdapter<M>>) -> bool {
        let mut chains = match self.chains.write() {
            Ok(chains) => chains,
            Err(poisoned) => poisoned.into_inner(),
        };
        if chains.iter().any(|chain| matches!(chain.peer, Peer::Stream)) {
            return false;
        }
        chains.push(Chain {
            head,
            peer: Peer::Stream,
        });
        true
    }

    /// Drop the local connection to `subscription_id`, if any.
    pub(crate) fn detach_local(&self, subscription_id: u64) {
        if let Ok(mut chains) = self.chains.write() {
            chains.retain(|chain| !chain.is_local_to(subscription_id));
        }
    }

    fn prune(&self) {
        if let Ok(mut chains) = self.chains.write() {
            let before = chains.len();
            chains.retain(|chain| chain.is_live());
            tracing::debug!(
                topic = %self.topic,
                removed = before - chains.len(),
                "pruned connections to dropped subscriptions"
            );
        }
    }

    fn with_chains<R>(&self, f: impl FnOnce(&[Chain<M>]) -> R) -> R {
        match self.chains.read() {
            Ok(chains) => f(&chains),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }
}

impl<M> fmt::Debug for Publication<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publication")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("latched", &self.latched.is_some())
            .finish_non_exhaustive()
    }
}
