//! One-shot output link shared by all node variants.
//!
//! A chain's topology is fixed once built: every node has at most one output
//! and it is set exactly once. Linking twice is rejected and the first link is
//! kept, which together with the builder only linking freshly created nodes
//! keeps every chain acyclic without walking it.

use super::traits::{ChannelNode, NodeRef};
use crate::error::{Error, Result};
use std::sync::{Arc, OnceLock};

/// Output link of a node.
pub struct OutputPad<M> {
    target: OnceLock<NodeRef<M>>,
}

impl<M> Default for OutputPad<M> {
    fn default() -> Self {
        Self {
            target: OnceLock::new(),
        }
    }
}

impl<M> OutputPad<M> {
    /// An unlinked pad.
    pub fn new() -> Self {
        Self::default()
    }

    /// Link `target` as the output of `owner`.
    pub fn link<N: ?Sized>(&self, owner: &N, target: NodeRef<M>) -> Result<()> {
        let owner_ptr = (owner as *const N).cast::<()>();
        if std::ptr::eq(owner_ptr, Arc::as_ptr(&target).cast::<()>()) {
            return Err(Error::SelfLink);
        }
        self.target.set(target).map_err(|_| Error::AlreadyLinked)
    }

    /// The linked output.
    pub fn get(&self) -> Option<NodeRef<M>> {
        self.target.get().cloned()
    }

    /// Borrow the linked output.
    pub fn target(&self) -> Option<&dyn ChannelNode<M>> {
        self.target.get().map(|node| node.as_ref())
    }

    /// Whether an output is linked.
    pub fn is_linked(&self) -> bool {
        self.target.get().is_some()
    }
}
