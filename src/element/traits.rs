//! Core forwarding-node trait.

use crate::error::Result;
use std::fmt;
use std::sync::Arc;

// ============================================================================
// FlowStatus
// ============================================================================

/// Result classification of a node read.
///
/// Ordered so that `NoData < OldData < NewData`; when several inputs are read
/// the best status is the maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FlowStatus {
    /// Nothing was ever written.
    NoData,
    /// The value is the same one this reader already consumed.
    OldData,
    /// A value this reader has not seen yet.
    NewData,
}

impl FlowStatus {
    /// Whether this status carries a fresh sample.
    #[inline]
    pub fn is_new(self) -> bool {
        matches!(self, Self::NewData)
    }
}

// ============================================================================
// NodeKind
// ============================================================================

/// The closed set of node variants a pipeline is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Latest-value buffer backed by a sample cell.
    Store,
    /// Entry node owned by a publication.
    EndpointInput,
    /// Terminal node read by a subscription.
    EndpointOutput,
    /// Serializes samples into a message queue.
    QueueSender,
    /// Deserializes samples out of a message queue.
    QueueReceiver,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Store => "store",
            Self::EndpointInput => "endpoint-input",
            Self::EndpointOutput => "endpoint-output",
            Self::QueueSender => "queue-sender",
            Self::QueueReceiver => "queue-receiver",
        };
        f.write_str(name)
    }
}

// ============================================================================
// ChannelNode
// ============================================================================

/// Shared handle to a node carrying samples of type `M`.
pub type NodeRef<M> = Arc<dyn ChannelNode<M>>;

/// A forwarding node in a typed transport chain.
///
/// Nodes form singly linked, acyclic chains running from a producer to a
/// consumer. Each node links to at most one output, exactly once, before the
/// chain carries samples. Nodes are shared through [`NodeRef`]; a store node
/// can be the output of one chain and the input of another at the same time.
///
/// None of the methods block indefinitely.
pub trait ChannelNode<M>: Send + Sync {
    /// Which variant this node is.
    fn kind(&self) -> NodeKind;

    /// Push a sample toward the output.
    fn write(&self, sample: &M) -> Result<()>;

    /// Pull the most recent sample into `sample`.
    ///
    /// `sample` is left untouched for [`FlowStatus::NoData`], and for
    /// [`FlowStatus::OldData`] unless `copy_old_data` is set.
    fn read(&self, sample: &mut M, copy_old_data: bool) -> Result<FlowStatus>;

    /// Whether a read would return fresh data without blocking.
    fn is_ready(&self) -> bool;

    /// Seed an initial value onto the chain.
    ///
    /// Only store and sending nodes keep seeds; the default rejects it.
    fn data_sample(&self, _sample: &M) -> bool {
        false
    }

    /// Link the downstream node. Fails with
    /// [`Error::AlreadyLinked`](crate::Error::AlreadyLinked) on a second call.
    fn set_output(&self, output: NodeRef<M>) -> Result<()>;

    /// The downstream node, if linked.
    fn output(&self) -> Option<NodeRef<M>>;
}
