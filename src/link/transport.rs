//! Queue-backed transport node.

use super::mqueue::{MessageQueue, QueueName, Readiness, Role};
use crate::codec::Sample;
use crate::config::QueueConfig;
use crate::element::{ChannelNode, FlowStatus, NodeKind, NodeRef, OutputPad};
use crate::error::{Error, Result};
use crate::observability;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

// ============================================================================
// Statistics
// ============================================================================

/// Counters kept by each transport.
#[derive(Debug, Default)]
pub struct StreamStats {
    sent: AtomicU64,
    enqueue_failures: AtomicU64,
    received: AtomicU64,
    decode_errors: AtomicU64,
}

/// Point-in-time copy of [`StreamStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStatsSnapshot {
    /// Messages enqueued.
    pub sent: u64,
    /// Sends rejected because the queue was full.
    pub enqueue_failures: u64,
    /// Messages dequeued, decodable or not.
    pub received: u64,
    /// Dequeued messages that failed to decode.
    pub decode_errors: u64,
}

impl StreamStats {
    /// Copy the current counter values.
    pub fn snapshot(&self) -> StreamStatsSnapshot {
        StreamStatsSnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            enqueue_failures: self.enqueue_failures.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// QueueTransport
// ============================================================================

/// A node that moves samples across a process boundary.
///
/// As a [`Role::Sender`] it encodes every written sample and enqueues it
/// without blocking; a full queue drops the sample with
/// [`Error::EnqueueFailed`]. As a [`Role::Receiver`] it dequeues and decodes
/// on read, and [`forward_pending`](Self::forward_pending) pushes everything
/// queued to its linked output.
pub struct QueueTransport<M> {
    topic: Arc<str>,
    queue: MessageQueue,
    output: OutputPad<M>,
    stats: StreamStats,
}

impl<M> QueueTransport<M> {
    /// Topic carried by this transport.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Which end of the queue this is.
    pub fn role(&self) -> Role {
        self.queue.role()
    }

    /// The underlying queue.
    pub fn queue(&self) -> &MessageQueue {
        &self.queue
    }

    /// Transport counters.
    pub fn stats(&self) -> StreamStatsSnapshot {
        self.stats.snapshot()
    }

    /// Block until a message is queued or the transport is shut down.
    pub fn wait_readable(&self) -> Result<Readiness> {
        self.queue.wait_readable()
    }

    /// Release any waiter. Idempotent.
    pub fn shutdown(&self) {
        self.queue.shutdown();
    }

    /// Shut down and close the queue. Idempotent.
    pub fn close(&self) {
        self.queue.close();
    }
}

impl<M: Sample> QueueTransport<M> {
    /// Open the queue for `topic` in the given role.
    pub fn open(topic: &str, role: Role, config: &QueueConfig) -> Result<Self> {
        let name = QueueName::derive(&config.name_prefix, topic, M::type_name())?;
        let queue = MessageQueue::open(name, role, config)?;
        Ok(Self::from_queue(topic, queue))
    }

    /// Wrap an already opened queue.
    pub fn from_queue(topic: &str, queue: MessageQueue) -> Self {
        Self {
            topic: Arc::from(topic),
            queue,
            output: OutputPad::new(),
            stats: StreamStats::default(),
        }
    }

    /// Drain every queued message into the linked output.
    ///
    /// Messages that fail to decode are logged, counted and skipped; the
    /// remaining messages are still delivered. Returns the number of samples
    /// forwarded, or the receive error that stopped draining. Such an error
    /// leaves the message queued, so retrying immediately fails again.
    pub fn forward_pending(&self) -> Result<usize> {
        let Some(output) = self.output.target() else {
            return Ok(0);
        };

        let mut forwarded = 0;
        loop {
            let mut sample = M::default();
            match self.receive(&mut sample) {
                Ok(FlowStatus::NewData) => match output.write(&sample) {
                    Ok(()) => forwarded += 1,
                    Err(e) => {
                        tracing::warn!(topic = %self.topic, error = %e, "failed to forward received sample");
                        observability::record_sample_dropped(&self.topic, e.drop_reason());
                    }
                },
                Ok(_) => break,
                Err(Error::Decode(reason)) => {
                    tracing::warn!(topic = %self.topic, %reason, "dropping undecodable message");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(forwarded)
    }

    fn send(&self, sample: &M) -> Result<()> {
        let bytes = sample.encode()?;
        match self.queue.send(&bytes) {
            Ok(()) => {
                self.stats.sent.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(topic = %self.topic, len = bytes.len(), "enqueued sample");
                Ok(())
            }
            Err(e) => {
                if matches!(e, Error::EnqueueFailed) {
                    self.stats.enqueue_failures.fetch_add(1, Ordering::Relaxed);
                }
                Err(e)
            }
        }
    }

    fn receive(&self, sample: &mut M) -> Result<FlowStatus> {
        let mut buf = Vec::new();
        if !self.queue.try_receive(&mut buf)? {
            return Ok(FlowStatus::NoData);
        }
        self.stats.received.fetch_add(1, Ordering::Relaxed);
        match M::decode(&buf) {
            Ok(decoded) => {
                *sample = decoded;
                Ok(FlowStatus::NewData)
            }
            Err(e) => {
                self.stats.decode_errors.fetch_add(1, Ordering::Relaxed);
                observability::record_decode_error(&self.topic);
                Err(e)
            }
        }
    }
}

impl<M: Sample> ChannelNode<M> for QueueTransport<M> {
    fn kind(&self) -> NodeKind {
        match self.role() {
            Role::Sender => NodeKind::QueueSender,
            Role::Receiver => NodeKind::QueueReceiver,
        }
    }

    fn write(&self, sample: &M) -> Result<()> {
        match self.role() {
            Role::Sender => self.send(sample),
            Role::Receiver => Err(Error::WrongDirection("queue receiver")),
        }
    }

    /// Receivers dequeue one message. A queue holds no previously consumed
    /// value, so this never reports [`FlowStatus::OldData`].
    fn read(&self, sample: &mut M, _copy_old_data: bool) -> Result<FlowStatus> {
        match self.role() {
            Role::Receiver => self.receive(sample),
            Role::Sender => Err(Error::WrongDirection("queue sender")),
        }
    }

    fn is_ready(&self) -> bool {
        match self.role() {
            Role::Receiver => self.queue.pending().is_ok_and(|n| n > 0),
            Role::Sender => !self.queue.is_closed(),
        }
    }

    fn data_sample(&self, sample: &M) -> bool {
        self.role() == Role::Sender && self.send(sample).is_ok()
    }

    fn set_output(&self, output: NodeRef<M>) -> Result<()> {
        self.output.link(self, output)
    }

    fn output(&self) -> Option<NodeRef<M>> {
        self.output.get()
    }
}

impl<M> fmt::Debug for QueueTransport<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueTransport")
            .field("topic", &self.topic)
            .field("queue", &self.queue)
            .field("stats", &self.stats)
            .finish()
    }
}
