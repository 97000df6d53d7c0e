//! Process-wide table of topics and their endpoints.
//!
//! The table maps a topic name to its sample type and to weak references to
//! the endpoints using it. It never keeps an endpoint alive: entries whose
//! endpoints were dropped are pruned on the next access, and a topic
//! disappears once it has no live endpoint left.

use crate::codec::Sample;
use crate::endpoint::{Publication, Subscription};
use crate::error::{Error, Result};
use crate::link::validate_topic;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

/// A type-erased weak endpoint reference.
struct Registered {
    id: u64,
    endpoint: Box<dyn Any + Send + Sync>,
    is_live: fn(&(dyn Any + Send + Sync)) -> bool,
}

impl Registered {
    fn publication<M: Sample>(publication: &Arc<Publication<M>>) -> Self {
        Self {
            id: publication.id(),
            endpoint: Box::new(Arc::downgrade(publication)),
            is_live: |endpoint| {
                endpoint
                    .downcast_ref::<Weak<Publication<M>>>()
                    .is_some_and(|weak| weak.strong_count() > 0)
            },
        }
    }

    fn subscription<M: Sample>(subscription: &Arc<Subscription<M>>) -> Self {
        Self {
            id: subscription.id(),
            endpoint: Box::new(Arc::downgrade(subscription)),
            is_live: |endpoint| {
                endpoint
                    .downcast_ref::<Weak<Subscription<M>>>()
                    .is_some_and(|weak| weak.strong_count() > 0)
            },
        }
    }

    fn is_live(&self) -> bool {
        (self.is_live)(self.endpoint.as_ref())
    }

    fn upgrade<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.endpoint.downcast_ref::<Weak<T>>()?.upgrade()
    }
}

struct TopicEntry {
    type_name: &'static str,
    publication: Option<Registered>,
    subscriptions: Vec<Registered>,
}

impl TopicEntry {
    fn new(type_name: &'static str) -> Self {
        Self {
            type_name,
            publication: None,
            subscriptions: Vec::new(),
        }
    }

    fn prune(&mut self) {
        if self.publication.as_ref().is_some_and(|p| !p.is_live()) {
            self.publication = None;
        }
        self.subscriptions.retain(Registered::is_live);
    }

    fn is_empty(&self) -> bool {
        self.publication.is_none() && self.subscriptions.is_empty()
    }

    fn check_type<M: Sample>(&self, topic: &str) -> Result<()> {
        if self.type_name == M::type_name() {
            Ok(())
        } else {
            Err(Error::TypeMismatch {
                topic: topic.to_string(),
                registered: self.type_name,
                requested: M::type_name(),
            })
        }
    }
}

/// Topic registry.
///
/// Each topic has one sample type, at most one publication per table and
/// any number of subscriptions.
#[derive(Default)]
pub struct TopicTable {
    topics: RwLock<HashMap<String, TopicEntry>>,
}

impl TopicTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a publication.
    ///
    /// Fails with [`Error::TypeMismatch`] if the topic carries another type
    /// and with [`Error::TopicTaken`] if it already has a live publication.
    pub fn add_publication<M: Sample>(&self, publication: &Arc<Publication<M>>) -> Result<()> {
        let topic = publication.topic();
        validate_topic(topic)?;

        let mut topics = self.write();
        let entry = topics
            .entry(topic.to_string())
            .or_insert_with(|| TopicEntry::new(M::type_name()));
        entry.prune();
        if entry.is_empty() {
            entry.type_name = M::type_name();
        }
        entry.check_type::<M>(topic)?;
        if entry.publication.is_some() {
            return Err(Error::TopicTaken(topic.to_string()));
        }
        entry.publication = Some(Registered::publication(publication));
        tracing::debug!(topic, id = publication.id(), "registered publication");
        Ok(())
    }

    /// Register a subscription.
    pub fn add_subscription<M: Sample>(&self, subscription: &Arc<Subscription<M>>) -> Result<()> {
        let topic = subscription.topic();
        validate_topic(topic)?;

        let mut topics = self.write();
        let entry = topics
            .entry(topic.to_string())
            .or_insert_with(|| TopicEntry::new(M::type_name()));
        entry.prune();
        if entry.is_empty() {
            entry.type_name = M::type_name();
        }
        entry.check_type::<M>(topic)?;
        entry.subscriptions.push(Registered::subscription(subscription));
        tracing::debug!(topic, id = subscription.id(), "registered subscription");
        Ok(())
    }

    /// The live publication on `topic`, if any.
    pub fn lookup_publication<M: Sample>(&self, topic: &str) -> Result<Option<Arc<Publication<M>>>> {
        let topics = self.read();
        let Some(entry) = topics.get(topic) else {
            return Ok(None);
        };
        entry.check_type::<M>(topic)?;
        Ok(entry.publication.as_ref().and_then(Registered::upgrade))
    }

    /// All live subscriptions on `topic`.
    pub fn lookup_subscriptions<M: Sample>(&self, topic: &str) -> Result<Vec<Arc<Subscription<M>>>> {
        let topics = self.read();
        let Some(entry) = topics.get(topic) else {
            return Ok(Vec::new());
        };
        entry.check_type::<M>(topic)?;
        Ok(entry
            .subscriptions
            .iter()
            .filter_map(Registered::upgrade)
            .collect())
    }

    /// Unregister the publication with `id` from `topic`.
    pub fn remove_publication(&self, topic: &str, id: u64) -> bool {
        self.remove_where(topic, |entry| {
            if entry.publication.as_ref().is_some_and(|p| p.id == id) {
                entry.publication = None;
                true
            } else {
                false
            }
        })
    }

    /// Unregister the subscription with `id` from `topic`.
    pub fn remove_subscription(&self, topic: &str, id: u64) -> bool {
        self.remove_where(topic, |entry| {
            let before = entry.subscriptions.len();
            entry.subscriptions.retain(|s| s.id != id);
            entry.subscriptions.len() != before
        })
    }

    /// Names of topics with at least one live endpoint.
    pub fn topics(&self) -> Vec<String> {
        let mut topics = self.write();
        topics.retain(|_, entry| {
            entry.prune();
            !entry.is_empty()
        });
        let mut names: Vec<String> = topics.keys().cloned().collect();
        names.sort();
        names
    }

    /// Sample type registered for `topic`.
    pub fn type_name(&self, topic: &str) -> Option<&'static str> {
        self.read().get(topic).map(|entry| entry.type_name)
    }

    fn remove_where(&self, topic: &str, remove: impl FnOnce(&mut TopicEntry) -> bool) -> bool {
        let mut topics = self.write();
        let Some(entry) = topics.get_mut(topic) else {
            return false;
        };
        let removed = remove(entry);
        entry.prune();
        if entry.is_empty() {
            topics.remove(topic);
        }
        removed
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, TopicEntry>> {
        self.topics.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, TopicEntry>> {
        self.topics.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publication_lookup() {
        let table = TopicTable::new();
        let publication = Publication::<u32>::new("/reg/pub", false);
        table.add_publication(&publication).unwrap();

        let found = table.lookup_publication::<u32>("/reg/pub").unwrap().unwrap();
        assert!(Arc::ptr_eq(&found, &publication));
        assert!(table.lookup_publication::<u32>("/reg/none").unwrap().is_none());
    }

    #[test]
    fn test_type_mismatch_refused() {
        let table = TopicTable::new();
        let publication = Publication::<u32>::new("/reg/typed", false);
        table.add_publication(&publication).unwrap();

        let subscription = Subscription::<String>::new("/reg/typed", |_| {});
        assert!(matches!(
            table.add_subscription(&subscription),
            Err(Error::TypeMismatch { .. })
        ));
        assert!(matches!(
            table.lookup_subscriptions::<String>("/reg/typed"),
            Err(Error::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_second_publication_refused() {
        let table = TopicTable::new();
        let first = Publication::<u32>::new("/reg/taken", false);
        let second = Publication::<u32>::new("/reg/taken", false);
        table.add_publication(&first).unwrap();
        assert!(matches!(
            table.add_publication(&second),
            Err(Error::TopicTaken(_))
        ));

        drop(first);
        table.add_publication(&second).unwrap();
    }

    #[test]
    fn test_dropped_endpoints_are_pruned() {
        let table = TopicTable::new();
        let subscription = Subscription::<u32>::new("/reg/weak", |_| {});
        table.add_subscription(&subscription).unwrap();
        assert_eq!(table.lookup_subscriptions::<u32>("/reg/weak").unwrap().len(), 1);

        drop(subscription);
        assert!(table.lookup_subscriptions::<u32>("/reg/weak").unwrap().is_empty());
        assert!(table.topics().is_empty());
    }

    #[test]
    fn test_type_can_change_once_topic_is_empty() {
        let table = TopicTable::new();
        let subscription = Subscription::<u32>::new("/reg/retype", |_| {});
        table.add_subscription(&subscription).unwrap();
        assert!(table.remove_subscription("/reg/retype", subscription.id()));
        assert!(table.type_name("/reg/retype").is_none());

        let publication = Publication::<String>::new("/reg/retype", false);
        table.add_publication(&publication).unwrap();
        assert_eq!(table.type_name("/reg/retype"), Some(<String as crate::codec::Codec>::type_name()));
    }

    #[test]
    fn test_invalid_topic_refused() {
        let table = TopicTable::new();
        let publication = Publication::<u32>::new("", false);
        assert!(matches!(
            table.add_publication(&publication),
            Err(Error::InvalidTopic(_))
        ));
    }
}
