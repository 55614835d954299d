//! Registrations: an implementation bound to a lifestyle.
//!
//! A [`Registration`] is built at most once into an [`InstanceFactory`].
//! Building asks the container for the producer of every declared
//! dependency and captures that producer's factory, so shared
//! sub-producers are reused and never re-walked. Each dependency found
//! while building is recorded as a [`KnownRelationship`] for diagnostics.
//!
//! A failed build is cached and the same error is returned on every later
//! attempt.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::activation::{ActivationGuard, FrameKind};
use crate::component::{Arguments, BoundDependency, Component, Dependency};
use crate::container::{Container, Resolver};
use crate::diagnostics::DiagnosticType;
use crate::error::{GraftError, LifestyleMismatchError, Result};
use crate::graph::KnownRelationship;
use crate::key::ServiceKey;
use crate::lifestyle::Lifestyle;
use crate::producer::InstanceProducer;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Ids shared by registrations, producers, scopes and containers.
pub(crate) fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// A type-erased instance. Always holds an `Arc<T>` for the `T` named by
/// the key it was produced for.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// A built factory: produces one instance per call, honoring the lifestyle.
pub type InstanceFactory = Arc<dyn Fn(&Resolver<'_>) -> Result<Instance> + Send + Sync>;

pub(crate) type Disposer = Box<dyn FnOnce() + Send>;

/// A freshly created instance and its cleanup, before any caching.
pub(crate) struct Created {
    pub instance: Instance,
    pub disposer: Option<Disposer>,
}

pub(crate) type RawFactory = Arc<dyn Fn(&Resolver<'_>) -> Result<Created> + Send + Sync>;

pub(crate) type Initializer = Arc<dyn Fn(&Instance, &Resolver<'_>) -> Result<()> + Send + Sync>;

pub(crate) type CollectionMaker = fn(Arc<[Arc<InstanceProducer>]>, &Resolver<'_>) -> Instance;

type DelegateFn = Arc<dyn Fn(&Resolver<'_>) -> Result<Instance> + Send + Sync>;

pub(crate) enum Creator {
    Component {
        dependencies: fn() -> Vec<Dependency>,
        construct: fn(&mut Arguments<'_>) -> Result<Instance>,
        disposer: fn(&Instance) -> Option<Disposer>,
    },
    Delegate(DelegateFn),
    Instance(Instance),
    Collection {
        elements: Arc<[Arc<InstanceProducer>]>,
        make: CollectionMaker,
    },
}

pub(crate) struct BuiltRegistration {
    pub factory: InstanceFactory,
    pub relationships: Vec<KnownRelationship>,
}

/// An implementation plus a lifestyle.
///
/// Create one with [`Lifestyle::create_registration`] to share it between
/// several services; the container creates one per `register*` call
/// otherwise.
pub struct Registration {
    id: u64,
    implementation: ServiceKey,
    lifestyle: Lifestyle,
    disposable: bool,
    creator: Creator,
    /// The producer a decorator wraps
    decoratee: Option<Arc<InstanceProducer>>,
    suppressions: Mutex<Vec<(DiagnosticType, String)>>,
    built: OnceCell<Result<Arc<BuiltRegistration>>>,
}

impl Registration {
    fn new(
        implementation: ServiceKey,
        lifestyle: Lifestyle,
        disposable: bool,
        creator: Creator,
        decoratee: Option<Arc<InstanceProducer>>,
    ) -> Self {
        Self {
            id: next_id(),
            implementation,
            lifestyle,
            disposable,
            creator,
            decoratee,
            suppressions: Mutex::new(Vec::new()),
            built: OnceCell::new(),
        }
    }

    pub(crate) fn component<I: Component>(lifestyle: Lifestyle) -> Self {
        Self::new(
            ServiceKey::of::<I>(),
            lifestyle,
            I::disposer().is_some(),
            component_creator::<I>(),
            None,
        )
    }

    /// A registration for decorator `D` wrapping `decoratee`.
    pub(crate) fn decorator<D: Component>(
        lifestyle: Lifestyle,
        decoratee: Arc<InstanceProducer>,
    ) -> Self {
        Self::new(
            ServiceKey::of::<D>(),
            lifestyle,
            D::disposer().is_some(),
            component_creator::<D>(),
            Some(decoratee),
        )
    }

    pub(crate) fn delegate<S>(
        lifestyle: Lifestyle,
        factory: impl Fn(&Resolver<'_>) -> Result<Arc<S>> + Send + Sync + 'static,
    ) -> Self
    where
        S: ?Sized + Send + Sync + 'static,
    {
        let delegate: DelegateFn =
            Arc::new(move |r: &Resolver<'_>| factory(r).map(|service| Arc::new(service) as Instance));
        Self::new(
            ServiceKey::of::<S>(),
            lifestyle,
            false,
            Creator::Delegate(delegate),
            None,
        )
    }

    pub(crate) fn instance<S>(value: Arc<S>) -> Self
    where
        S: ?Sized + Send + Sync + 'static,
    {
        Self::new(
            ServiceKey::of::<S>(),
            Lifestyle::Singleton,
            false,
            Creator::Instance(Arc::new(value)),
            None,
        )
    }

    pub(crate) fn collection(
        key: ServiceKey,
        elements: Arc<[Arc<InstanceProducer>]>,
        make: CollectionMaker,
    ) -> Self {
        Self::new(
            key,
            Lifestyle::Transient,
            false,
            Creator::Collection { elements, make },
            None,
        )
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// The implementation this registration creates. For factory and
    /// instance registrations this is the service type itself.
    pub fn implementation(&self) -> &ServiceKey {
        &self.implementation
    }

    pub fn lifestyle(&self) -> &Lifestyle {
        &self.lifestyle
    }

    /// Returns `true` when created instances carry a disposer.
    pub fn is_disposable(&self) -> bool {
        self.disposable
    }

    /// Silences one diagnostic kind for this registration.
    ///
    /// # Errors
    /// [`GraftError::InvalidRegistration`] when `justification` is blank.
    pub fn suppress_diagnostic_warning(
        &self,
        kind: DiagnosticType,
        justification: impl Into<String>,
    ) -> Result<()> {
        let justification = justification.into();
        if justification.trim().is_empty() {
            return Err(GraftError::InvalidRegistration {
                key: self.implementation.clone(),
                reason: format!("suppressing {kind} requires a justification"),
            });
        }

        debug!(implementation = %self.implementation, %kind, %justification, "Suppressed diagnostic");
        self.suppressions.lock().push((kind, justification));
        Ok(())
    }

    pub fn is_suppressed(&self, kind: DiagnosticType) -> bool {
        self.suppressions.lock().iter().any(|(k, _)| *k == kind)
    }

    /// Dependencies found while building. Empty until built.
    pub fn relationships(&self) -> Vec<KnownRelationship> {
        match self.built.get() {
            Some(Ok(built)) => built.relationships.clone(),
            _ => Vec::new(),
        }
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

    /// Returns `true` for auto-wired components (decorators included).
    pub fn is_component(&self) -> bool {
        matches!(self.creator, Creator::Component { .. })
    }

    pub(crate) fn collection_elements(&self) -> Option<&[Arc<InstanceProducer>]> {
        match &self.creator {
            Creator::Collection { elements, .. } => Some(&elements[..]),
            _ => None,
        }
    }

    /// Builds the factory, or returns the cached outcome of the first build.
    ///
    /// Concurrent first builds each run to completion; the first to publish
    /// wins and the others adopt its result.
    pub(crate) fn build(&self, container: &Container) -> Result<Arc<BuiltRegistration>> {
        if let Some(result) = self.built.get() {
            return result.clone();
        }

        let _guard = ActivationGuard::enter(self.id, FrameKind::Registration, &self.implementation)?;

        let result = self.build_uncached(container).map(Arc::new);
        if let Err(error) = &result {
            warn!(implementation = %self.implementation, %error, "Registration build failed");
        }

        self.built.get_or_init(|| result).clone()
    }

    fn build_uncached(&self, container: &Container) -> Result<BuiltRegistration> {
        let (raw, relationships): (RawFactory, Vec<KnownRelationship>) = match &self.creator {
            Creator::Component {
                dependencies,
                construct,
                disposer,
            } => self.build_component(container, dependencies(), *construct, *disposer)?,

            Creator::Delegate(delegate) => {
                let delegate = delegate.clone();
                let implementation = self.implementation.clone();
                let initializers = container.initializers_for(&self.implementation);
                let raw: RawFactory = Arc::new(move |r: &Resolver<'_>| {
                    let instance =
                        delegate(r).map_err(|e| GraftError::activation_failed(&implementation, e))?;
                    run_initializers(&initializers, &instance, r)?;
                    Ok(Created {
                        instance,
                        disposer: None,
                    })
                });
                (raw, Vec::new())
            }

            Creator::Instance(instance) => {
                let instance = instance.clone();
                let raw: RawFactory = Arc::new(move |_: &Resolver<'_>| {
                    Ok(Created {
                        instance: instance.clone(),
                        disposer: None,
                    })
                });
                (raw, Vec::new())
            }

            Creator::Collection { elements, make } => {
                let elements = elements.clone();
                let make = *make;
                let raw: RawFactory = Arc::new(move |r: &Resolver<'_>| {
                    Ok(Created {
                        instance: make(elements.clone(), r),
                        disposer: None,
                    })
                });
                (raw, Vec::new())
            }
        };

        let factory = self.lifestyle.apply(self.id, &self.implementation, raw);
        let factory = guard_activation(self.id, &self.implementation, factory);

        debug!(
            implementation = %self.implementation,
            lifestyle = %self.lifestyle,
            dependencies = relationships.len(),
            "Built registration"
        );

        Ok(BuiltRegistration {
            factory,
            relationships,
        })
    }

    fn build_component(
        &self,
        container: &Container,
        dependencies: Vec<Dependency>,
        construct: fn(&mut Arguments<'_>) -> Result<Instance>,
        disposer: fn(&Instance) -> Option<Disposer>,
    ) -> Result<(RawFactory, Vec<KnownRelationship>)> {
        let mut bound = Vec::with_capacity(dependencies.len());
        let mut relationships = Vec::with_capacity(dependencies.len());

        for dependency in dependencies {
            let producer = self.dependency_producer(container, &dependency)?;
            let factory = producer.factory(container)?;

            if container.options().enforce_lifestyle_compatibility {
                self.check_lifestyle(&producer)?;
            }

            relationships.push(KnownRelationship::new(
                self.implementation.clone(),
                self.lifestyle.clone(),
                producer,
                dependency.parameter(),
            ));
            bound.push(BoundDependency { dependency, factory });
        }

        let bound: Arc<[BoundDependency]> = bound.into();
        let implementation = self.implementation.clone();
        let initializers = container.initializers_for(&self.implementation);

        let raw: RawFactory = Arc::new(move |r: &Resolver<'_>| {
            let mut args = Arguments::new(&implementation, &bound, *r);
            let instance = construct(&mut args).map_err(|error| match error {
                GraftError::Custom(_) => GraftError::activation_failed(&implementation, error),
                other => other,
            })?;
            run_initializers(&initializers, &instance, r)?;
            Ok(Created {
                disposer: disposer(&instance),
                instance,
            })
        });

        Ok((raw, relationships))
    }

    /// Finds the producer for one declared dependency: the decoratee, a
    /// registered producer, or the dependency's fallback.
    fn dependency_producer(
        &self,
        container: &Container,
        dependency: &Dependency,
    ) -> Result<Arc<InstanceProducer>> {
        if let Some(decoratee) = &self.decoratee {
            if dependency.key().type_id() == decoratee.service_key().type_id() {
                return Ok(decoratee.clone());
            }
        }

        if let Some(producer) = container.find_producer(dependency.key()) {
            return Ok(producer);
        }

        if let Some(producer) = dependency.fallback().and_then(|fallback| fallback(container)) {
            return Ok(producer);
        }

        Err(container.not_registered(
            dependency.key(),
            Some(&self.implementation),
            Some(dependency.parameter()),
        ))
    }

    /// Collections are checked element by element: a consumer keeps its
    /// collection for as long as it lives itself.
    fn check_lifestyle(&self, producer: &InstanceProducer) -> Result<()> {
        let elements = producer.collection_elements();
        let shorter = if producer.is_collection() {
            elements
                .iter()
                .map(|element| &**element)
                .find(|element| self.lifestyle.outlives(element.lifestyle()))
        } else {
            Some(producer).filter(|producer| self.lifestyle.outlives(producer.lifestyle()))
        };
        let Some(producer) = shorter else {
            return Ok(());
        };

        warn!(
            consumer = %self.implementation,
            consumer_lifestyle = %self.lifestyle,
            dependency = %producer.service_key(),
            dependency_lifestyle = %producer.lifestyle(),
            "Lifestyle mismatch detected"
        );

        Err(GraftError::LifestyleMismatch(LifestyleMismatchError {
            consumer: self.implementation.clone(),
            consumer_lifestyle: self.lifestyle.name().to_string(),
            dependency: producer.service_key().clone(),
            dependency_implementation: producer.implementation().clone(),
            dependency_lifestyle: producer.lifestyle().name().to_string(),
        }))
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("id", &self.id)
            .field("implementation", &self.implementation)
            .field("lifestyle", &self.lifestyle)
            .field("built", &self.is_built())
            .finish()
    }
}

fn component_creator<I: Component>() -> Creator {
    Creator::Component {
        dependencies: I::dependencies,
        construct: construct_component::<I>,
        disposer: component_disposer::<I>,
    }
}

fn construct_component<I: Component>(args: &mut Arguments<'_>) -> Result<Instance> {
    let component = I::construct(args)?;
    Ok(Arc::new(Arc::new(component)))
}

fn component_disposer<I: Component>(instance: &Instance) -> Option<Disposer> {
    let dispose = I::disposer()?;
    let component = instance.clone().downcast::<Arc<I>>().ok()?;
    Some(Box::new(move || dispose(&component)))
}

fn run_initializers(initializers: &[Initializer], instance: &Instance, r: &Resolver<'_>) -> Result<()> {
    for initializer in initializers {
        initializer(instance, r)?;
    }
    Ok(())
}

/// Pushes an activation frame around every call, so a cycle hidden in a
/// factory delegate or a collection is reported instead of recursing.
fn guard_activation(id: u64, implementation: &ServiceKey, factory: InstanceFactory) -> InstanceFactory {
    let implementation = implementation.clone();
    Arc::new(move |r: &Resolver<'_>| {
        let _guard = ActivationGuard::enter(id, FrameKind::Activation, &implementation)?;
        trace!(implementation = %implementation, "Activating");
        factory(r)
    })
}

/// Wraps a typed initializer so it runs on matching instances.
pub(crate) fn erase_initializer<T>(
    action: impl Fn(&T, &Resolver<'_>) -> Result<()> + Send + Sync + 'static,
) -> (TypeId, Initializer)
where
    T: ?Sized + Send + Sync + 'static,
{
    let initializer: Initializer = Arc::new(move |instance: &Instance, r: &Resolver<'_>| {
        match instance.downcast_ref::<Arc<T>>() {
            Some(target) => action(&**target, r),
            None => Ok(()),
        }
    });
    (TypeId::of::<T>(), initializer)
}
