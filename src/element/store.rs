//! Latest-value store node.

use super::pad::OutputPad;
use super::traits::{ChannelNode, FlowStatus, NodeKind, NodeRef};
use crate::config::DEFAULT_CELL_READERS;
use crate::error::Result;
use crate::memory::{ReadCursor, SampleCell};

/// A node that keeps the most recent sample.
///
/// Writes land in a [`SampleCell`] and, when an output is linked, are also
/// forwarded downstream. Reads go through the node's own cursor, so a store
/// reports [`FlowStatus::NewData`] at most once per written sample.
///
/// A store is the only node that can sit in the middle of two chains: the
/// local connection builder makes it the output of a publication's chain and
/// the input of a subscription's terminal.
pub struct StoreNode<M> {
    cell: SampleCell<M>,
    cursor: ReadCursor,
    output: OutputPad<M>,
}

impl<M: Clone + Send + Sync + 'static> StoreNode<M> {
    /// Create a store holding `initial` (reported as [`FlowStatus::NoData`]
    /// until the first write or seed).
    pub fn new(initial: M) -> Self {
        Self::with_readers(initial, DEFAULT_CELL_READERS)
    }

    /// Create a store sized for `readers` concurrent readers.
    pub fn with_readers(initial: M, readers: usize) -> Self {
        Self {
            cell: SampleCell::with_readers(initial, readers),
            cursor: ReadCursor::new(),
            output: OutputPad::new(),
        }
    }

    /// The backing cell.
    pub fn cell(&self) -> &SampleCell<M> {
        &self.cell
    }

    /// Generation of the newest stored sample (0 when never written).
    pub fn generation(&self) -> u64 {
        self.cell.latest_generation()
    }
}

impl<M: Clone + Send + Sync + 'static> ChannelNode<M> for StoreNode<M> {
    fn kind(&self) -> NodeKind {
        NodeKind::Store
    }

    fn write(&self, sample: &M) -> Result<()> {
        self.cell.write(sample.clone())?;
        match self.output.target() {
            Some(next) => next.write(sample),
            None => Ok(()),
        }
    }

    fn read(&self, sample: &mut M, copy_old_data: bool) -> Result<FlowStatus> {
        Ok(self.cell.read(&self.cursor, sample, copy_old_data))
    }

    fn is_ready(&self) -> bool {
        self.cell.has_new(&self.cursor)
    }

    fn data_sample(&self, sample: &M) -> bool {
        let stored = self.cell.seed(sample.clone()).is_ok();
        if let Some(next) = self.output.target() {
            next.data_sample(sample);
        }
        stored
    }

    fn set_output(&self, output: NodeRef<M>) -> Result<()> {
        self.output.link(self, output)
    }

    fn output(&self) -> Option<NodeRef<M>> {
        self.output.get()
    }
}
