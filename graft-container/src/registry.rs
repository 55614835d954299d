//! Producer registry: maps service keys to instance producers.
//!
//! Backed by [`DashMap`], so resolutions of different services never
//! serialize on one container-wide lock. Collection registrations are kept
//! apart until their first lookup, because `append_to_collection` may still
//! add elements while the container is unlocked.
//!
//! No map guard is ever held while a producer is built: every lookup clones
//! the `Arc` out and releases the shard first.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, trace};

use crate::error::{AlreadyRegisteredError, GraftError, Result};
use crate::key::ServiceKey;
use crate::producer::InstanceProducer;
use crate::registration::{CollectionMaker, Registration};

struct CollectionEntry {
    elements: Vec<Arc<InstanceProducer>>,
    make: CollectionMaker,
}

pub(crate) struct Registry {
    producers: DashMap<ServiceKey, Arc<InstanceProducer>>,
    collections: DashMap<ServiceKey, CollectionEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            producers: DashMap::new(),
            collections: DashMap::new(),
        }
    }

    /// Registers a producer for its service key.
    ///
    /// # Errors
    /// Returns [`GraftError::AlreadyRegistered`] if the key is already
    /// registered and `allow_override` is false.
    pub fn register(&self, producer: Arc<InstanceProducer>, allow_override: bool) -> Result<()> {
        let key = producer.service_key().clone();

        match self.producers.entry(key.clone()) {
            Entry::Occupied(_) if !allow_override => {
                return Err(GraftError::AlreadyRegistered(AlreadyRegisteredError { key }));
            }
            Entry::Occupied(mut existing) => {
                debug!(key = %key, "Overriding registration");
                existing.insert(producer.clone());
            }
            Entry::Vacant(slot) => {
                slot.insert(producer.clone());
            }
        }

        debug!(
            key = %key,
            implementation = %producer.implementation(),
            lifestyle = %producer.lifestyle(),
            "Registered service"
        );
        Ok(())
    }

    /// Adds a producer unless one already exists; either way returns the
    /// producer now registered. Used after the container is locked, where
    /// the first of several racing threads wins.
    pub fn publish(&self, producer: Arc<InstanceProducer>) -> Arc<InstanceProducer> {
        let key = producer.service_key().clone();
        let published = self.producers.entry(key.clone()).or_insert(producer).clone();
        trace!(key = %key, producer = published.id(), "Published producer");
        published
    }

    /// Looks up a producer, turning a pending collection registration into
    /// its producer on first use.
    pub fn get(&self, key: &ServiceKey) -> Option<Arc<InstanceProducer>> {
        if let Some(producer) = self.producers.get(key).map(|entry| entry.value().clone()) {
            return Some(producer);
        }
        self.materialize_collection(key)
    }

    /// Replaces (or creates) the element list of a collection.
    pub fn register_collection(
        &self,
        key: ServiceKey,
        elements: Vec<Arc<InstanceProducer>>,
        make: CollectionMaker,
        allow_override: bool,
    ) -> Result<()> {
        if !allow_override && self.collections.contains_key(&key) {
            return Err(GraftError::AlreadyRegistered(AlreadyRegisteredError { key }));
        }

        debug!(key = %key, elements = elements.len(), "Registered collection");
        self.collections.insert(key, CollectionEntry { elements, make });
        Ok(())
    }

    /// Appends one element, creating the collection when needed.
    pub fn append_to_collection(
        &self,
        key: ServiceKey,
        element: Arc<InstanceProducer>,
        make: CollectionMaker,
    ) {
        debug!(key = %key, implementation = %element.implementation(), "Appended to collection");
        self.collections
            .entry(key)
            .or_insert_with(|| CollectionEntry {
                elements: Vec::new(),
                make,
            })
            .elements
            .push(element);
    }

    fn materialize_collection(&self, key: &ServiceKey) -> Option<Arc<InstanceProducer>> {
        let (elements, make) = {
            let entry = self.collections.get(key)?;
            (entry.elements.clone(), entry.make)
        };

        let registration = Registration::collection(key.clone(), elements.into(), make);
        let producer = InstanceProducer::new(key.clone(), Arc::new(registration), None, true);
        Some(self.publish(Arc::new(producer)))
    }

    /// All producers, collections included, in registration order.
    pub fn producers(&self) -> Vec<Arc<InstanceProducer>> {
        let collection_keys: Vec<ServiceKey> =
            self.collections.iter().map(|entry| entry.key().clone()).collect();
        for key in &collection_keys {
            self.get(key);
        }

        let mut producers: Vec<Arc<InstanceProducer>> =
            self.producers.iter().map(|entry| entry.value().clone()).collect();
        producers.sort_by_key(|producer| producer.id());
        producers
    }

    /// Type names of every registered key (for "did you mean?" suggestions).
    pub fn type_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self
            .producers
            .iter()
            .map(|entry| entry.key().type_name())
            .chain(self.collections.iter().map(|entry| entry.key().type_name()))
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    pub fn len(&self) -> usize {
        self.producers.len()
    }
}
