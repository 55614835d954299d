//! Decorators: components that wrap another producer of the same service.
//!
//! A decorator is a plain [`Component`] that declares a dependency on the
//! service it decorates. When a producer for that service is built, each
//! matching decorator gets a fresh registration whose dependency on the
//! service resolves to the producer built so far. Decorators wrap in
//! registration order, so the last one registered is the outermost.

use std::any::TypeId;
use std::sync::Arc;

use crate::component::{Component, Upcast, Upcaster, upcaster_for};
use crate::error::{GraftError, Result};
use crate::key::ServiceKey;
use crate::lifestyle::Lifestyle;
use crate::producer::InstanceProducer;
use crate::registration::Registration;

pub type DecoratorPredicate = Arc<dyn Fn(&DecoratorContext<'_>) -> bool + Send + Sync>;

/// What a decorator predicate gets to see about the producer being
/// decorated.
pub struct DecoratorContext<'a> {
    service: &'a ServiceKey,
    implementation: &'a ServiceKey,
    lifestyle: &'a Lifestyle,
    applied: &'a [ServiceKey],
}

impl<'a> DecoratorContext<'a> {
    pub(crate) fn new(
        service: &'a ServiceKey,
        implementation: &'a ServiceKey,
        lifestyle: &'a Lifestyle,
        applied: &'a [ServiceKey],
    ) -> Self {
        Self {
            service,
            implementation,
            lifestyle,
            applied,
        }
    }

    pub fn service_key(&self) -> &ServiceKey {
        self.service
    }

    /// The undecorated implementation.
    pub fn implementation(&self) -> &ServiceKey {
        self.implementation
    }

    pub fn lifestyle(&self) -> &Lifestyle {
        self.lifestyle
    }

    /// Decorators already wrapped around the implementation, innermost first.
    pub fn applied_decorators(&self) -> &[ServiceKey] {
        self.applied
    }

    pub fn is_applied<D: 'static>(&self) -> bool {
        self.applied.iter().any(|key| key.is::<D>())
    }
}

#[derive(Clone)]
pub(crate) struct DecoratorEntry {
    service: TypeId,
    implementation: ServiceKey,
    lifestyle: Lifestyle,
    predicate: Option<DecoratorPredicate>,
    create: fn(Lifestyle, Arc<InstanceProducer>) -> Registration,
    upcaster: Option<Upcaster>,
}

impl DecoratorEntry {
    /// # Errors
    /// [`GraftError::InvalidRegistration`] when `D` does not depend on `S`.
    pub fn new<S, D>(lifestyle: Lifestyle, predicate: Option<DecoratorPredicate>) -> Result<Self>
    where
        S: ?Sized + Send + Sync + 'static,
        D: Component + Upcast<S>,
    {
        let service = ServiceKey::of::<S>();
        let wraps_service = D::dependencies()
            .iter()
            .any(|dependency| dependency.key().type_id() == service.type_id());

        if !wraps_service {
            return Err(GraftError::InvalidRegistration {
                key: ServiceKey::of::<D>(),
                reason: format!(
                    "a decorator for {service} must declare a dependency on {service}"
                ),
            });
        }

        Ok(Self {
            service: service.type_id(),
            implementation: ServiceKey::of::<D>(),
            lifestyle,
            predicate,
            create: Registration::decorator::<D>,
            upcaster: upcaster_for::<D, S>(),
        })
    }

    pub fn decorates(&self, service: &ServiceKey) -> bool {
        self.service == service.type_id()
    }

    pub fn applies_to(&self, context: &DecoratorContext<'_>) -> bool {
        self.predicate
            .as_ref()
            .is_none_or(|predicate| predicate(context))
    }

    pub fn create_registration(&self, decoratee: Arc<InstanceProducer>) -> Registration {
        (self.create)(self.lifestyle.clone(), decoratee)
    }

    pub fn upcaster(&self) -> Option<Upcaster> {
        self.upcaster
    }

    pub fn implementation(&self) -> &ServiceKey {
        &self.implementation
    }
}
