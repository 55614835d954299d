//! Container-controlled collections.
//!
//! Several implementations registered for one service are resolved as a
//! [`Collection`]: an ordered list of element producers that creates
//! instances lazily, each time an element is read. Transient elements are
//! therefore re-created on every pass; scoped and singleton elements are
//! cached by their lifestyle as usual.
//!
//! A collection remembers the scope it was resolved in. Once that scope is
//! disposed, scoped elements are resolved against their lifestyle's ambient
//! scope instead. Depending on a collection with shorter-lived elements is
//! still a lifestyle mismatch and is reported as one.

use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

use crate::component::{Component, Upcast, Upcaster, downcast_instance, upcaster_for};
use crate::container::{Container, ContainerInner, Resolver};
use crate::error::{GraftError, Result};
use crate::key::ServiceKey;
use crate::lifestyle::Lifestyle;
use crate::producer::InstanceProducer;
use crate::registration::{Instance, Registration};

/// All registered implementations of `S`, in registration order.
pub struct Collection<S: ?Sized> {
    elements: Arc<[Arc<InstanceProducer>]>,
    container: Weak<ContainerInner>,
    scope: Option<crate::scope::Scope>,
    _service: PhantomData<fn() -> Arc<S>>,
}

impl<S: ?Sized + Send + Sync + 'static> Collection<S> {
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Resolves the element at `index`, or `None` past the end.
    pub fn get(&self, index: usize) -> Option<Result<Arc<S>>> {
        self.elements.get(index).map(|producer| self.resolve(producer))
    }

    /// Resolves elements one by one as the iterator advances.
    pub fn iter(&self) -> impl Iterator<Item = Result<Arc<S>>> + '_ {
        self.elements.iter().map(|producer| self.resolve(producer))
    }

    /// Resolves every element, stopping at the first failure.
    pub fn to_vec(&self) -> Result<Vec<Arc<S>>> {
        self.iter().collect()
    }

    /// The element producers, for inspection.
    pub fn producers(&self) -> &[Arc<InstanceProducer>] {
        &self.elements
    }

    fn resolve(&self, producer: &Arc<InstanceProducer>) -> Result<Arc<S>> {
        let key = producer.service_key();
        let container = self
            .container
            .upgrade()
            .map(Container::from_inner)
            .ok_or_else(|| GraftError::ContainerDisposed { key: key.clone() })?;

        // A collection held by a longer-lived consumer outlives the scope it
        // was resolved in; scoped elements then go through the ambient scope.
        let scope = self.scope.as_ref().filter(|scope| !scope.is_disposed());
        let resolver = Resolver::new(&container, scope);
        let instance = producer.get_instance(&resolver)?;
        downcast_instance::<S>(key, instance)
    }
}

impl<S: ?Sized> Clone for Collection<S> {
    fn clone(&self) -> Self {
        Self {
            elements: self.elements.clone(),
            container: self.container.clone(),
            scope: self.scope.clone(),
            _service: PhantomData,
        }
    }
}

impl<S: ?Sized> fmt::Debug for Collection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("service", &std::any::type_name::<S>())
            .field("len", &self.elements.len())
            .finish()
    }
}

/// One element of a collection registration.
pub struct Element<S: ?Sized> {
    registration: Arc<Registration>,
    upcaster: Option<Upcaster>,
    _service: PhantomData<fn() -> Arc<S>>,
}

impl<S: ?Sized + Send + Sync + 'static> Element<S> {
    /// An auto-wired implementation with its own lifestyle.
    pub fn of<I: Component + Upcast<S>>(lifestyle: Lifestyle) -> Self {
        Self {
            registration: lifestyle.create_registration::<I>(),
            upcaster: upcaster_for::<I, S>(),
            _service: PhantomData,
        }
    }

    /// A factory-created element.
    pub fn factory(
        lifestyle: Lifestyle,
        factory: impl Fn(&Resolver<'_>) -> Result<Arc<S>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            registration: lifestyle.create_factory_registration::<S>(factory),
            upcaster: None,
            _service: PhantomData,
        }
    }

    /// An element backed by a shared registration of `I`.
    ///
    /// # Errors
    /// [`GraftError::InvalidRegistration`] when the registration does not
    /// create `I`.
    pub fn registration<I: Upcast<S>>(registration: Arc<Registration>) -> Result<Self> {
        if !registration.implementation().is::<I>() {
            return Err(GraftError::InvalidRegistration {
                key: registration.implementation().clone(),
                reason: format!(
                    "the registration creates {}, not {}",
                    registration.implementation(),
                    std::any::type_name::<I>()
                ),
            });
        }

        Ok(Self {
            registration,
            upcaster: upcaster_for::<I, S>(),
            _service: PhantomData,
        })
    }

    pub(crate) fn into_producer(self) -> Arc<InstanceProducer> {
        Arc::new(InstanceProducer::new(
            ServiceKey::of::<S>(),
            self.registration,
            self.upcaster,
            true,
        ))
    }
}

/// Builds the `Collection<S>` instance handed to consumers.
pub(crate) fn make_collection<S: ?Sized + Send + Sync + 'static>(
    elements: Arc<[Arc<InstanceProducer>]>,
    resolver: &Resolver<'_>,
) -> Instance {
    let collection = Collection::<S> {
        elements,
        container: resolver.container().downgrade(),
        scope: resolver.scope().cloned(),
        _service: PhantomData,
    };
    Arc::new(Arc::new(collection))
}

/// Fallback for collections nobody registered: an empty collection, when
/// the options allow it.
pub(crate) fn empty_collection_fallback<S: ?Sized + Send + Sync + 'static>(
    container: &Container,
) -> Option<Arc<InstanceProducer>> {
    if !container.options().resolve_unregistered_collections {
        return None;
    }

    let key = ServiceKey::of::<Collection<S>>();
    let registration = Registration::collection(key.clone(), Arc::from(Vec::new()), make_collection::<S>);
    let producer = InstanceProducer::new(key, Arc::new(registration), None, false);
    Some(container.publish_producer(producer))
}
