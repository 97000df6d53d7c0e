//! Connection factory: assembles chains between endpoints.

use crate::codec::Sample;
use crate::config::TransportConfig;
use crate::element::{ChannelNode, EndpointInputAdapter, EndpointOutputAdapter, StoreNode};
use crate::endpoint::{Endpoint, Publication, Subscription};
use crate::error::{Error, Result};
use crate::link::{QueueTransport, ReceiveStream, Role};
use crate::observability::{record_build, span_topic, trace_build_failed, trace_connection_built};
use std::sync::Arc;

const LOCAL: &str = "local";
const STREAM: &str = "stream";

/// Builds local connections and remote streams.
///
/// Every chain is fully assembled before it is attached to an endpoint, so a
/// failed build leaves nothing reachable from either endpoint. The
/// `build_*` methods log failures and report success as a `bool`; the
/// `try_build_*` variants return the error instead.
#[derive(Debug, Clone, Default)]
pub struct ConnectionFactory {
    config: TransportConfig,
}

impl ConnectionFactory {
    /// Create a factory using `config`.
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }

    /// The configuration in use.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Connect a publication and a subscription in the same process.
    pub fn build_local_connection<M: Sample>(
        &self,
        publication: &Arc<Publication<M>>,
        subscription: &Arc<Subscription<M>>,
    ) -> bool {
        report(
            publication.topic(),
            LOCAL,
            self.try_build_local_connection(publication, subscription),
        )
    }

    /// Give an endpoint its cross-process half.
    ///
    /// `is_sender` must match the endpoint: publications get the sending
    /// half, subscriptions the receiving half.
    pub fn build_stream<M: Sample>(&self, endpoint: &Endpoint<M>, is_sender: bool) -> bool {
        report(endpoint.topic(), STREAM, self.try_build_stream(endpoint, is_sender))
    }

    /// [`build_local_connection`](Self::build_local_connection), returning
    /// the failure.
    pub fn try_build_local_connection<M: Sample>(
        &self,
        publication: &Arc<Publication<M>>,
        subscription: &Arc<Subscription<M>>,
    ) -> Result<()> {
        let topic = publication.topic();
        let _span = span_topic(topic).entered();

        if subscription.topic() != topic {
            return Err(Error::build(
                topic,
                format!("subscription is on topic '{}'", subscription.topic()),
            ));
        }
        if publication.is_connected_to(subscription.id())
            || subscription.is_connected_to(publication.id())
        {
            return Err(Error::build(topic, "endpoints are already connected"));
        }

        let store = Arc::new(StoreNode::with_readers(M::default(), self.config.cell_readers));
        if let Some(latched) = publication.latched_value() {
            store.data_sample(&latched);
        }
        let head = Arc::new(EndpointInputAdapter::new(publication));
        head.set_output(store.clone())?;
        let terminal = Arc::new(EndpointOutputAdapter::new(subscription, store));

        if !publication.attach_local(head, subscription) {
            return Err(Error::build(topic, "endpoints are already connected"));
        }
        if !subscription.attach_local(terminal, publication) {
            publication.detach_local(subscription.id());
            return Err(Error::build(topic, "endpoints are already connected"));
        }
        Ok(())
    }

    /// [`build_stream`](Self::build_stream), returning the failure.
    pub fn try_build_stream<M: Sample>(&self, endpoint: &Endpoint<M>, is_sender: bool) -> Result<()> {
        let _span = span_topic(endpoint.topic()).entered();
        match (endpoint, is_sender) {
            (Endpoint::Publication(publication), true) => self.build_sender(publication),
            (Endpoint::Subscription(subscription), false) => self.build_receiver(subscription),
            (_, is_sender) => Err(Error::build(
                endpoint.topic(),
                format!(
                    "a {} cannot host the {} half of a stream",
                    if endpoint.is_publication() { "publication" } else { "subscription" },
                    if is_sender { Role::Sender } else { Role::Receiver },
                ),
            )),
        }
    }

    fn build_sender<M: Sample>(&self, publication: &Arc<Publication<M>>) -> Result<()> {
        let topic = publication.topic();
        if publication.has_stream() {
            return Err(Error::build(topic, "publication already has a stream"));
        }

        let transport = QueueTransport::<M>::open(topic, Role::Sender, &self.config.queue)
            .map_err(|e| Error::build(topic, format!("cannot open sending queue: {e}")))?;
        let head = Arc::new(EndpointInputAdapter::new(publication));
        head.set_output(Arc::new(transport))?;

        if !publication.attach_stream(head.clone()) {
            return Err(Error::build(topic, "publication already has a stream"));
        }
        if let Some(latched) = publication.latched_value() {
            head.data_sample(&latched);
        }
        Ok(())
    }

    fn build_receiver<M: Sample>(&self, subscription: &Arc<Subscription<M>>) -> Result<()> {
        let topic = subscription.topic();
        if subscription.has_stream() {
            return Err(Error::build(topic, "subscription already has a stream"));
        }

        let transport = QueueTransport::<M>::open(topic, Role::Receiver, &self.config.queue)
            .map_err(|e| Error::build(topic, format!("cannot open receiving queue: {e}")))?;
        let store = Arc::new(StoreNode::with_readers(M::default(), self.config.cell_readers));
        let terminal = Arc::new(EndpointOutputAdapter::new(subscription, store));
        transport.set_output(terminal.clone())?;
        let stream = ReceiveStream::spawn(Arc::new(transport))
            .map_err(|e| Error::build(topic, format!("cannot start dispatcher: {e}")))?;

        if !subscription.attach_stream(terminal, stream) {
            return Err(Error::build(topic, "subscription already has a stream"));
        }
        Ok(())
    }
}

fn report(topic: &str, kind: &'static str, result: Result<()>) -> bool {
    match result {
        Ok(()) => {
            trace_connection_built(topic, kind);
            record_build(topic, kind, true);
            true
        }
        Err(e) => {
            trace_build_failed(topic, kind, &e);
            record_build(topic, kind, false);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Codec;
    use crate::config::QueueConfig;
    use crate::link::{QueueName, unlink};
    use std::sync::Mutex;

    fn factory() -> ConnectionFactory {
        ConnectionFactory::new(TransportConfig::local_only())
    }

    fn recording(topic: &str) -> (Arc<Subscription<u32>>, Arc<Mutex<Vec<u32>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let subscription = Subscription::new(topic, move |value: u32| sink.lock().unwrap().push(value));
        (subscription, seen)
    }

    #[test]
    fn test_local_connection_delivers() {
        let publication = Publication::<u32>::new("/factory/local", false);
        let (subscription, seen) = recording("/factory/local");

        assert!(factory().build_local_connection(&publication, &subscription));
        publication.write(&4).unwrap();

        assert_eq!(subscription.dispatch(), 1);
        assert_eq!(*seen.lock().unwrap(), vec![4]);
    }

    #[test]
    fn test_duplicate_local_connection_refused() {
        let publication = Publication::<u32>::new("/factory/dup", false);
        let (subscription, seen) = recording("/factory/dup");

        assert!(factory().build_local_connection(&publication, &subscription));
        assert!(!factory().build_local_connection(&publication, &subscription));
        assert_eq!(publication.connection_count(), 1);

        publication.write(&1).unwrap();
        assert_eq!(subscription.dispatch(), 1);
        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }

    #[test]
    fn test_topic_mismatch_refused() {
        let publication = Publication::<u32>::new("/factory/a", false);
        let (subscription, _) = recording("/factory/b");
        let err = factory()
            .try_build_local_connection(&publication, &subscription)
            .unwrap_err();
        assert!(matches!(err, Error::BuildFailed { .. }));
        assert_eq!(publication.connection_count(), 0);
        assert_eq!(subscription.connection_count(), 0);
    }

    #[test]
    fn test_latched_value_seeds_new_connection() {
        let publication = Publication::<u32>::new("/factory/latched", true);
        publication.write(&99).unwrap();

        let (subscription, seen) = recording("/factory/latched");
        assert!(factory().build_local_connection(&publication, &subscription));

        assert_eq!(subscription.dispatch(), 1);
        assert_eq!(*seen.lock().unwrap(), vec![99]);
    }

    #[test]
    fn test_stream_role_mismatch_refused() {
        let publication = Publication::<u32>::new("/factory/role", false);
        let (subscription, _) = recording("/factory/role");

        assert!(!factory().build_stream(&Endpoint::Publication(publication.clone()), false));
        assert!(!factory().build_stream(&Endpoint::Subscription(subscription.clone()), true));
        assert!(!publication.has_stream());
        assert!(!subscription.has_stream());
    }

    #[test]
    fn test_second_stream_refused() {
        let config = stream_config(2);
        let factory = ConnectionFactory::new(config.clone());
        let publication = Publication::<u32>::new("/factory/second", false);
        let endpoint = Endpoint::Publication(publication.clone());

        assert!(factory.build_stream(&endpoint, true));
        assert!(!factory.build_stream(&endpoint, true));
        assert!(publication.has_stream());
        remove_queue(&config, "/factory/second");
    }

    #[test]
    fn test_full_stream_does_not_block_local_delivery() {
        let config = stream_config(1);
        let factory = ConnectionFactory::new(config.clone());
        let publication = Publication::<u32>::new("/factory/unheard", false);
        let (subscription, seen) = recording("/factory/unheard");

        assert!(factory.build_stream(&Endpoint::Publication(publication.clone()), true));
        assert!(factory.build_local_connection(&publication, &subscription));

        // Nobody drains the queue, so the second sample only reaches the local side.
        publication.write(&1).unwrap();
        assert!(matches!(publication.write(&2), Err(Error::EnqueueFailed)));
        assert_eq!(subscription.dispatch(), 1);
        assert_eq!(*seen.lock().unwrap(), vec![2]);
        remove_queue(&config, "/factory/unheard");
    }

    fn stream_config(capacity: usize) -> TransportConfig {
        TransportConfig::default().with_queue(
            QueueConfig::default()
                .with_capacity(capacity)
                .with_max_message_size(64)
                .with_name_prefix(format!("tl-fac-{}.", std::process::id())),
        )
    }

    fn remove_queue(config: &TransportConfig, topic: &str) {
        let name = QueueName::derive(&config.queue.name_prefix, topic, <u32 as Codec>::type_name()).unwrap();
        unlink(&name).unwrap();
    }
}
