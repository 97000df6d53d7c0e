//! Adapters binding user-facing endpoints to node chains.
//!
//! A publication owns the head of each of its chains through an
//! [`EndpointInputAdapter`]; a subscription reads the tail of each chain
//! through an [`EndpointOutputAdapter`]. Adapters refer back to their
//! endpoint weakly so chains never keep endpoints alive.

use super::pad::OutputPad;
use super::traits::{ChannelNode, FlowStatus, NodeKind, NodeRef};
use crate::endpoint::{Publication, Subscription};
use crate::error::{Error, Result};
use std::sync::{Arc, Weak};

// ============================================================================
// Input side
// ============================================================================

/// Head of a chain, written to by a publication.
pub struct EndpointInputAdapter<M> {
    publication: Weak<Publication<M>>,
    topic: Arc<str>,
    output: OutputPad<M>,
}

impl<M> EndpointInputAdapter<M> {
    /// Create an unlinked adapter for `publication`.
    pub fn new(publication: &Arc<Publication<M>>) -> Self {
        Self {
            publication: Arc::downgrade(publication),
            topic: publication.topic_arc(),
            output: OutputPad::new(),
        }
    }

    /// Topic of the owning publication.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The owning publication, if still alive.
    pub fn publication(&self) -> Option<Arc<Publication<M>>> {
        self.publication.upgrade()
    }
}

impl<M: Send + Sync + 'static> ChannelNode<M> for EndpointInputAdapter<M> {
    fn kind(&self) -> NodeKind {
        NodeKind::EndpointInput
    }

    fn write(&self, sample: &M) -> Result<()> {
        match self.output.target() {
            Some(next) => next.write(sample),
            None => Err(Error::NotLinked),
        }
    }

    fn read(&self, _sample: &mut M, _copy_old_data: bool) -> Result<FlowStatus> {
        Ok(FlowStatus::NoData)
    }

    /// Ready to accept writes once linked.
    fn is_ready(&self) -> bool {
        self.output.is_linked()
    }

    fn data_sample(&self, sample: &M) -> bool {
        self.output
            .target()
            .is_some_and(|next| next.data_sample(sample))
    }

    fn set_output(&self, output: NodeRef<M>) -> Result<()> {
        self.output.link(self, output)
    }

    fn output(&self) -> Option<NodeRef<M>> {
        self.output.get()
    }
}

// ============================================================================
// Output side
// ============================================================================

/// Tail of a chain, read by a subscription.
///
/// The adapter pulls from a fixed input node given at construction. Pushes
/// arriving at the adapter (from a queue dispatcher) are deposited into that
/// same input, so the subscription sees one latest-value buffer whichever way
/// the sample arrived.
pub struct EndpointOutputAdapter<M> {
    subscription: Weak<Subscription<M>>,
    topic: Arc<str>,
    input: NodeRef<M>,
}

impl<M> EndpointOutputAdapter<M> {
    /// Create the terminal for `subscription`, reading from `input`.
    pub fn new(subscription: &Arc<Subscription<M>>, input: NodeRef<M>) -> Self {
        Self {
            subscription: Arc::downgrade(subscription),
            topic: subscription.topic_arc(),
            input,
        }
    }

    /// Topic of the owning subscription.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The node this terminal reads from.
    pub fn input(&self) -> &NodeRef<M> {
        &self.input
    }

    /// The owning subscription, if still alive.
    pub fn subscription(&self) -> Option<Arc<Subscription<M>>> {
        self.subscription.upgrade()
    }
}

impl<M: Send + Sync + 'static> ChannelNode<M> for EndpointOutputAdapter<M> {
    fn kind(&self) -> NodeKind {
        NodeKind::EndpointOutput
    }

    fn write(&self, sample: &M) -> Result<()> {
        self.input.write(sample)
    }

    fn read(&self, sample: &mut M, copy_old_data: bool) -> Result<FlowStatus> {
        self.input.read(sample, copy_old_data)
    }

    fn is_ready(&self) -> bool {
        self.input.is_ready()
    }

    fn data_sample(&self, sample: &M) -> bool {
        self.input.data_sample(sample)
    }

    fn set_output(&self, _output: NodeRef<M>) -> Result<()> {
        Err(Error::WrongDirection("endpoint output"))
    }

    fn output(&self) -> Option<NodeRef<M>> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::StoreNode;

    fn publication(topic: &str) -> Arc<Publication<u32>> {
        Publication::new(topic, false)
    }

    fn subscription(topic: &str) -> Arc<Subscription<u32>> {
        Subscription::new(topic, |_: u32| {})
    }

    #[test]
    fn test_unlinked_input_rejects_writes() {
        let publication = publication("/adapter/unlinked");
        let adapter = EndpointInputAdapter::new(&publication);
        assert!(!adapter.is_ready());
        assert!(matches!(adapter.write(&1), Err(Error::NotLinked)));
    }

    #[test]
    fn test_input_forwards_to_store() {
        let publication = publication("/adapter/forward");
        let adapter = EndpointInputAdapter::new(&publication);
        let store = Arc::new(StoreNode::new(0u32));
        adapter.set_output(store.clone()).unwrap();

        adapter.write(&42).unwrap();

        let mut out = 0;
        assert_eq!(store.read(&mut out, false).unwrap(), FlowStatus::NewData);
        assert_eq!(out, 42);

        let mut unused = 0;
        assert_eq!(adapter.read(&mut unused, true).unwrap(), FlowStatus::NoData);
    }

    #[test]
    fn test_output_reads_and_deposits_into_input() {
        let subscription = subscription("/adapter/output");
        let store = Arc::new(StoreNode::new(0u32));
        let terminal = EndpointOutputAdapter::new(&subscription, store.clone());

        assert!(!terminal.is_ready());
        terminal.write(&9).unwrap();
        assert!(terminal.is_ready());

        let mut out = 0;
        assert_eq!(terminal.read(&mut out, false).unwrap(), FlowStatus::NewData);
        assert_eq!(out, 9);
        assert_eq!(store.generation(), 1);
    }

    #[test]
    fn test_output_has_no_downstream() {
        let subscription = subscription("/adapter/terminal");
        let terminal = EndpointOutputAdapter::new(&subscription, Arc::new(StoreNode::new(0u32)));
        let other: NodeRef<u32> = Arc::new(StoreNode::new(0u32));
        assert!(matches!(
            terminal.set_output(other),
            Err(Error::WrongDirection(_))
        ));
        assert!(terminal.output().is_none());
    }

    #[test]
    fn test_adapters_do_not_keep_endpoints_alive() {
        let publication = publication("/adapter/weak");
        let adapter = EndpointInputAdapter::new(&publication);
        assert!(adapter.publication().is_some());
        drop(publication);
        assert!(adapter.publication().is_none());
        assert_eq!(adapter.topic(), "/adapter/weak");
    }
}
