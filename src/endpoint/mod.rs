//! User-facing endpoints of a topic.
//!
//! - [`Publication`]: writes samples into every chain it heads
//! - [`Subscription`]: reads the tails of its chains and invokes a callback
//!
//! Endpoints are always held in an `Arc`; the connection factory attaches
//! chains to them and the nodes in those chains only refer back weakly.
//! Dropping the last `Arc` releases the endpoint's chains, stops its
//! dispatcher thread and closes its queues.

mod publication;
mod subscription;

pub use publication::Publication;
pub use subscription::Subscription;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ENDPOINT_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_endpoint_id() -> u64 {
    NEXT_ENDPOINT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Either kind of endpoint, as accepted by
/// [`ConnectionFactory::build_stream`](crate::pipeline::ConnectionFactory::build_stream).
pub enum Endpoint<M> {
    /// A producing endpoint.
    Publication(Arc<Publication<M>>),
    /// A consuming endpoint.
    Subscription(Arc<Subscription<M>>),
}

impl<M> Endpoint<M> {
    /// Topic of the wrapped endpoint.
    pub fn topic(&self) -> &str {
        match self {
            Self::Publication(publication) => publication.topic(),
            Self::Subscription(subscription) => subscription.topic(),
        }
    }

    /// Whether this is a publication.
    pub fn is_publication(&self) -> bool {
        matches!(self, Self::Publication(_))
    }
}

impl<M> Clone for Endpoint<M> {
    fn clone(&self) -> Self {
        match self {
            Self::Publication(publication) => Self::Publication(Arc::clone(publication)),
            Self::Subscription(subscription) => Self::Subscription(Arc::clone(subscription)),
        }
    }
}

impl<M> From<Arc<Publication<M>>> for Endpoint<M> {
    fn from(publication: Arc<Publication<M>>) -> Self {
        Self::Publication(publication)
    }
}

impl<M> From<Arc<Subscription<M>>> for Endpoint<M> {
    fn from(subscription: Arc<Subscription<M>>) -> Self {
        Self::Subscription(subscription)
    }
}
