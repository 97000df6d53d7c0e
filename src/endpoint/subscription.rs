//! Consuming endpoint.

use crate::codec::Sample;
use crate::element::{ChannelNode, EndpointOutputAdapter, FlowStatus};
use crate::endpoint::{Publication, next_endpoint_id};
use crate::error::Result;
use crate::link::ReceiveStream;
use crate::observability::TopicMetrics;
use smallvec::SmallVec;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock, Weak};

type Callback<M> = Box<dyn Fn(M) + Send + Sync>;

enum Source<M> {
    /// Local connection from a publication in this process.
    Local {
        id: u64,
        publication: Weak<Publication<M>>,
    },
    /// The remote stream.
    Stream,
}

struct Input<M> {
    terminal: Arc<EndpointOutputAdapter<M>>,
    source: Source<M>,
}

impl<M> Input<M> {
    fn is_local_from(&self, publication_id: u64) -> bool {
        matches!(self.source, Source::Local { id, .. } if id == publication_id)
    }

    /// A local input whose publication is gone and which holds nothing
    /// undelivered.
    fn is_exhausted(&self) -> bool
    where
        M: Send + Sync + 'static,
    {
        match &self.source {
            Source::Local { publication, .. } => {
                publication.strong_count() == 0 && !self.terminal.is_ready()
            }
            Source::Stream => false,
        }
    }
}

/// The consuming end of a topic.
///
/// Reads the tails of its chains when [`dispatch`](Self::dispatch) is called
/// and hands every fresh sample to its callback, on the calling thread.
pub struct Subscription<M> {
    id: u64,
    topic: Arc<str>,
    callback: Callback<M>,
    inputs: RwLock<SmallVec<[Input<M>; 2]>>,
    stream: Mutex<Option<ReceiveStream<M>>>,
    metrics: TopicMetrics,
}

impl<M> Subscription<M> {
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
}

impl<M: Sample> Subscription<M> {
    /// Create a subscription on `topic` delivering samples to `callback`.
    pub fn new<F>(topic: &str, callback: F) -> Arc<Self>
    where
        F: Fn(M) + Send + Sync + 'static,
    {
        Arc::new(Self {
            id: next_endpoint_id(),
            topic: Arc::from(topic),
            callback: Box::new(callback),
            inputs: RwLock::new(SmallVec::new()),
            stream: Mutex::new(None),
            metrics: TopicMetrics::new(topic),
        })
    }

    /// Deliver every fresh sample to the callback.
    ///
    /// Each attached chain is read once; a chain that received several
    /// samples since the last dispatch delivers only the newest. Local
    /// connections whose publication was dropped are released once drained.
    /// Returns the number of callback invocations.
    pub fn dispatch(&self) -> usize {
        let terminals: SmallVec<[Arc<EndpointOutputAdapter<M>>; 2]> =
            self.with_inputs(|inputs| inputs.iter().map(|input| Arc::clone(&input.terminal)).collect());

        let mut delivered = 0;
        for terminal in &terminals {
            let mut sample = M::default();
            match terminal.read(&mut sample, false) {
                Ok(FlowStatus::NewData) => {
                    (self.callback)(sample);
                    delivered += 1;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(topic = %self.topic, error = %e, "failed to read connection");
                }
            }
        }

        if self.with_inputs(|inputs| inputs.iter().any(Input::is_exhausted)) {
            if let Ok(mut inputs) = self.inputs.write() {
                inputs.retain(|input| !input.is_exhausted());
            }
        }

        if delivered > 0 {
            self.metrics.record_delivered(delivered as u64);
            tracing::trace!(topic = %self.topic, delivered, "dispatched samples");
        }
        delivered
    }

    /// Read the newest sample across all chains without invoking the
    /// callback. Returns the best status seen.
    pub fn take_latest(&self, sample: &mut M) -> Result<FlowStatus> {
        let terminals: SmallVec<[Arc<EndpointOutputAdapter<M>>; 2]> =
            self.with_inputs(|inputs| inputs.iter().map(|input| Arc::clone(&input.terminal)).collect());

        let mut best = FlowStatus::NoData;
        for terminal in &terminals {
            best = best.max(terminal.read(sample, false)?);
        }
        Ok(best)
    }

    /// Whether any chain holds a sample not yet dispatched.
    pub fn is_ready(&self) -> bool {
        self.with_inputs(|inputs| inputs.iter().any(|input| input.terminal.is_ready()))
    }

    /// Number of local connections.
    pub fn connection_count(&self) -> usize {
        self.with_inputs(|inputs| {
            inputs
                .iter()
                .filter(|input| matches!(input.source, Source::Local { .. }))
                .count()
        })
    }

    /// Whether a remote stream is attached.
    pub fn has_stream(&self) -> bool {
        self.with_inputs(|inputs| inputs.iter().any(|input| matches!(input.source, Source::Stream)))
    }

    /// Whether a local connection from the publication with `publication_id`
    /// exists.
    pub fn is_connected_to(&self, publication_id: u64) -> bool {
        self.with_inputs(|inputs| inputs.iter().any(|input| input.is_local_from(publication_id)))
    }

    /// Attach the tail of a local connection. Refused if one from the same
    /// publication exists.
    pub(crate) fn attach_local(
        &self,
        terminal: Arc<EndpointOutputAdapter<M>>,
        publication: &Arc<Publication<M>>,
    ) -> bool {
        let mut inputs = match self.inputs.write() {
            Ok(inputs) => inputs,
            Err(poisoned) => poisoned.into_inner(),
        };
        if inputs.iter().any(|input| input.is_local_from(publication.id())) {
            return false;
        }
        inputs.push(Input {
            terminal,
            source: Source::Local {
                id: publication.id(),
                publication: Arc::downgrade(publication),
            },
        });
        true
    }

    /// Attach the tail of the remote stream together with its dispatcher.
    /// Refused if a stream exists; the rejected dispatcher is then shut down
    /// by drop.
    pub(crate) fn attach_stream(
        &self,
        terminal: Arc<EndpointOutputAdapter<M>>,
        stream: ReceiveStream<M>,
    ) -> bool {
        let mut slot = match self.stream.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        if slot.is_some() {
            return false;
        }
        let mut inputs = match self.inputs.write() {
            Ok(inputs) => inputs,
            Err(poisoned) => poisoned.into_inner(),
        };
        inputs.push(Input {
            terminal,
            source: Source::Stream,
        });
        *slot = Some(stream);
        true
    }

    /// Stop the remote stream's dispatcher, if any. Local connections keep
    /// working.
    pub fn close_stream(&self) {
        let stream = match self.stream.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(stream) = stream {
            stream.shutdown();
            if let Ok(mut inputs) = self.inputs.write() {
                inputs.retain(|input| !matches!(input.source, Source::Stream));
            }
        }
    }

    fn with_inputs<R>(&self, f: impl FnOnce(&[Input<M>]) -> R) -> R {
        match self.inputs.read() {
            Ok(inputs) => f(&inputs),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }
}

impl<M> fmt::Debug for Subscription<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}
