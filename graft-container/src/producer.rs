//! Instance producers: the unit of resolution.
//!
//! An [`InstanceProducer`] binds a service key to a [`Registration`]. It
//! builds its factory at most once: the registration's factory, converted
//! to the service type, wrapped by every matching decorator and passed
//! through the container's factory-built hooks.
//!
//! # Build states
//! ```text
//! NotBuilt ──factory()──> Building ──ok──> Built
//!                             │
//!                             └──err──> Failed (cached, cloned to every caller)
//! ```
//! The "building" marker lives on the calling thread's activation stack,
//! never on the producer, so threads building the same producer at the same
//! time do not trip cycle detection.

use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::{debug, trace, warn};

use crate::activation::{ActivationGuard, FrameKind};
use crate::component::Upcaster;
use crate::container::{Container, Resolver};
use crate::decorator::DecoratorContext;
use crate::error::{GraftError, Result};
use crate::graph::KnownRelationship;
use crate::key::ServiceKey;
use crate::lifestyle::Lifestyle;
use crate::registration::{Instance, InstanceFactory, Registration, next_id};

struct ProducerBuild {
    factory: InstanceFactory,
    relationships: Vec<KnownRelationship>,
}

/// Produces instances of one service.
pub struct InstanceProducer {
    id: u64,
    service: ServiceKey,
    registration: Arc<Registration>,
    upcaster: Option<Upcaster>,
    decoratable: bool,
    explicit: bool,
    built: OnceCell<Result<Arc<ProducerBuild>>>,
}

impl InstanceProducer {
    pub(crate) fn new(
        service: ServiceKey,
        registration: Arc<Registration>,
        upcaster: Option<Upcaster>,
        explicit: bool,
    ) -> Self {
        Self {
            id: next_id(),
            service,
            registration,
            upcaster,
            decoratable: true,
            explicit,
            built: OnceCell::new(),
        }
    }

    /// A producer that is never decorated itself.
    fn sealed(service: ServiceKey, registration: Arc<Registration>, upcaster: Option<Upcaster>) -> Self {
        Self {
            decoratable: false,
            ..Self::new(service, registration, upcaster, false)
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn service_key(&self) -> &ServiceKey {
        &self.service
    }

    pub fn registration(&self) -> &Arc<Registration> {
        &self.registration
    }

    pub fn implementation(&self) -> &ServiceKey {
        self.registration.implementation()
    }

    pub fn lifestyle(&self) -> &Lifestyle {
        self.registration.lifestyle()
    }

    /// Returns `false` for producers the container created on its own:
    /// auto-registered concrete types, empty collections and producers
    /// added by unregistered-type handlers.
    pub fn is_explicit(&self) -> bool {
        self.explicit
    }

    pub fn is_collection(&self) -> bool {
        self.registration.collection_elements().is_some()
    }

    /// Element producers of a collection, in registration order.
    pub fn collection_elements(&self) -> Vec<Arc<InstanceProducer>> {
        self.registration
            .collection_elements()
            .map(<[_]>::to_vec)
            .unwrap_or_default()
    }

    pub fn is_built(&self) -> bool {
        self.built.get().is_some()
    }

    /// The cached build failure, if building failed.
    pub fn build_error(&self) -> Option<GraftError> {
        match self.built.get() {
            Some(Err(error)) => Some(error.clone()),
            _ => None,
        }
    }

    /// Dependencies of the outermost component (the last decorator when
    /// decorated). Empty until built.
    pub fn relationships(&self) -> Vec<KnownRelationship> {
        match self.built.get() {
            Some(Ok(build)) => build.relationships.clone(),
            _ => Vec::new(),
        }
    }

    /// Returns the built factory, building it on first use.
    ///
    /// # Errors
    /// The build failure, identical on every call.
    pub fn factory(&self, container: &Container) -> Result<InstanceFactory> {
        self.built(container).map(|build| build.factory.clone())
    }

    /// Creates (or fetches, per lifestyle) one instance.
    pub fn get_instance(&self, resolver: &Resolver<'_>) -> Result<Instance> {
        trace!(service = %self.service, "Producing instance");
        let factory = self.factory(resolver.container())?;
        factory(resolver)
    }

    fn built(&self, container: &Container) -> Result<Arc<ProducerBuild>> {
        if let Some(result) = self.built.get() {
            return result.clone();
        }

        let _guard = ActivationGuard::enter(self.id, FrameKind::Producer, self.implementation())?;

        let result = self.build(container).map(Arc::new);
        if let Err(error) = &result {
            warn!(service = %self.service, %error, "Producer build failed; failure is cached");
        }

        self.built.get_or_init(|| result).clone()
    }

    fn build(&self, container: &Container) -> Result<ProducerBuild> {
        let registration = self.registration.build(container)?;
        let mut factory = upcast_factory(registration.factory.clone(), self.upcaster, &self.service);
        let mut relationships = registration.relationships.clone();

        if self.decoratable {
            if let Some(outermost) = self.decorate(container)? {
                let build = outermost.built(container)?;
                factory = build.factory.clone();
                relationships = build.relationships.clone();
            }
        }

        // Decorator links are internal; hooks see the finished chain once.
        if self.decoratable {
            factory = container.run_factory_built_hooks(self, factory)?;
        }
        debug!(service = %self.service, implementation = %self.implementation(), "Built producer");

        Ok(ProducerBuild {
            factory,
            relationships,
        })
    }

    /// Chains the matching decorators around an undecorated copy of this
    /// producer. The last registered decorator ends up outermost.
    fn decorate(&self, container: &Container) -> Result<Option<Arc<InstanceProducer>>> {
        let decorators = container.decorators_for(&self.service);
        if decorators.is_empty() {
            return Ok(None);
        }

        let mut current = Arc::new(Self::sealed(
            self.service.clone(),
            self.registration.clone(),
            self.upcaster,
        ));
        let mut applied: Vec<ServiceKey> = Vec::new();

        for decorator in decorators {
            let context = DecoratorContext::new(
                &self.service,
                self.registration.implementation(),
                self.registration.lifestyle(),
                &applied,
            );
            if !decorator.applies_to(&context) {
                continue;
            }

            let registration = Arc::new(decorator.create_registration(current.clone()));
            current = Arc::new(Self::sealed(
                self.service.clone(),
                registration,
                decorator.upcaster(),
            ));

            debug!(service = %self.service, decorator = %decorator.implementation(), "Applied decorator");
            applied.push(decorator.implementation().clone());
        }

        Ok((!applied.is_empty()).then_some(current))
    }
}

impl fmt::Debug for InstanceProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceProducer")
            .field("id", &self.id)
            .field("service", &self.service)
            .field("implementation", self.implementation())
            .field("lifestyle", self.lifestyle())
            .field("built", &self.is_built())
            .finish()
    }
}

fn upcast_factory(
    factory: InstanceFactory,
    upcaster: Option<Upcaster>,
    service: &ServiceKey,
) -> InstanceFactory {
    let Some(upcast) = upcaster else {
        return factory;
    };

    let service = service.clone();
    Arc::new(move |r: &Resolver<'_>| {
        let instance = factory(r)?;
        upcast(instance).ok_or_else(|| GraftError::TypeMismatch {
            key: service.clone(),
            expected: service.type_name(),
        })
    })
}
