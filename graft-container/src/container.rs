//! # The Container
//!
//! Maps services to [`InstanceProducer`]s and orchestrates registration,
//! resolution, verification and diagnostics.
//!
//! # Lifecycle
//! ```text
//! Unlocked ──first resolution / verify()──> Locked ──dispose()──> Disposed
//!    │                                         │
//!  register*()                           get_instance()
//!                                         begin_scope()
//! ```
//! Registration calls made after the container is locked fail with
//! [`GraftError::ContainerLocked`].
//!
//! # Examples
//! ```rust
//! use graft_container::prelude::*;
//! use std::sync::Arc;
//!
//! trait Logger: Send + Sync {
//!     fn log(&self, msg: &str) -> String;
//! }
//!
//! struct ConsoleLogger;
//! impl Logger for ConsoleLogger {
//!     fn log(&self, msg: &str) -> String { format!("[console] {msg}") }
//! }
//! impl Component for ConsoleLogger {
//!     fn construct(_: &mut Arguments<'_>) -> Result<Self> { Ok(ConsoleLogger) }
//! }
//! graft_container::implements!(ConsoleLogger => dyn Logger);
//!
//! struct UserService {
//!     logger: Arc<dyn Logger>,
//! }
//! impl Component for UserService {
//!     fn dependencies() -> Vec<Dependency> {
//!         vec![Dependency::on::<dyn Logger>("logger")]
//!     }
//!     fn construct(args: &mut Arguments<'_>) -> Result<Self> {
//!         Ok(UserService { logger: args.get()? })
//!     }
//! }
//!
//! let container = Container::new();
//! container.register_singleton::<dyn Logger, ConsoleLogger>().unwrap();
//! container.register_transient::<UserService, UserService>().unwrap();
//!
//! let service = container.get_instance::<UserService>().unwrap();
//! assert_eq!(service.logger.log("hi"), "[console] hi");
//! ```

use std::any::{TypeId, type_name};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use graft_support::rendering::{shorten_type_name, suggest_similar};
use parking_lot::RwLock;
use tracing::{debug, info, instrument, trace, warn};

use crate::collection::{Collection, Element, empty_collection_fallback, make_collection};
use crate::component::{Component, Upcast, Upcaster, downcast_instance, upcaster_for};
use crate::decorator::{DecoratorContext, DecoratorEntry};
use crate::diagnostics::{self, Analysis};
use crate::error::{
    AlreadyRegisteredError, DiagnosticsError, GraftError, NotRegisteredError, Result,
    VerificationError,
};
use crate::graph::ProducerGraph;
use crate::key::ServiceKey;
use crate::lifestyle::Lifestyle;
use crate::options::ContainerOptions;
use crate::producer::InstanceProducer;
use crate::provider::Provider;
use crate::registration::{
    Disposer, Initializer, Instance, InstanceFactory, Registration, erase_initializer, next_id,
};
use crate::registry::Registry;
use crate::scope::{AmbientScope, Scope};

type UnregisteredTypeHandler = Arc<dyn Fn(&mut UnregisteredTypeEvent<'_>) + Send + Sync>;
type FactoryBuiltHandler = Arc<dyn Fn(&mut FactoryBuiltEvent<'_>) -> Result<()> + Send + Sync>;

const MAX_SUGGESTIONS: usize = 3;

// ═══════════════════════════════════════════
// Container
// ═══════════════════════════════════════════

pub(crate) struct ContainerInner {
    id: u64,
    options: ContainerOptions,
    registry: Registry,
    decorators: RwLock<Vec<DecoratorEntry>>,
    initializers: RwLock<Vec<(TypeId, Initializer)>>,
    unregistered_handlers: RwLock<Vec<UnregisteredTypeHandler>>,
    factory_built_handlers: RwLock<Vec<FactoryBuiltHandler>>,
    locked: AtomicBool,
    disposed: AtomicBool,
    /// Owns the disposers of singleton instances
    singletons: Scope,
}

/// The dependency injection container.
///
/// Cheap to clone; clones share every registration and cached instance.
#[derive(Clone)]
pub struct Container {
    inner: Arc<ContainerInner>,
}

/// How much work [`Container::verify`] does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationMode {
    /// Build every producer's factory.
    Build,
    /// Build every factory, then create one instance of every producer
    /// inside a temporary scope.
    Full,
}

impl Container {
    pub fn new() -> Self {
        Self::with_options(ContainerOptions::default())
    }

    pub fn with_options(options: ContainerOptions) -> Self {
        let id = next_id();
        debug!(container = id, ?options, "Creating container");

        let inner = Arc::new_cyclic(|weak: &Weak<ContainerInner>| ContainerInner {
            id,
            options,
            registry: Registry::new(),
            decorators: RwLock::new(Vec::new()),
            initializers: RwLock::new(Vec::new()),
            unregistered_handlers: RwLock::new(Vec::new()),
            factory_built_handlers: RwLock::new(Vec::new()),
            locked: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            singletons: Scope::new(id, weak.clone(), None, None),
        });

        Self { inner }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn options(&self) -> &ContainerOptions {
        &self.inner.options
    }

    /// Returns `true` once the first resolution or verification happened.
    pub fn is_locked(&self) -> bool {
        self.inner.locked.load(Ordering::Acquire)
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// A resolver without an explicit scope.
    pub fn resolver(&self) -> Resolver<'_> {
        Resolver::new(self, None)
    }

    /// Starts a new root scope for this container.
    pub fn begin_scope(&self) -> Scope {
        self.create_scope(None, None)
    }

    // ── Registration ──

    /// Registers `I` as the implementation of `S`.
    ///
    /// # Errors
    /// - [`GraftError::ContainerLocked`] after the first resolution
    /// - [`GraftError::AlreadyRegistered`] if `S` is registered and
    ///   overriding is not allowed
    pub fn register<S, I>(&self, lifestyle: Lifestyle) -> Result<()>
    where
        S: ?Sized + Send + Sync + 'static,
        I: Component + Upcast<S>,
    {
        self.ensure_unlocked::<S>()?;
        let registration = lifestyle.create_registration::<I>();
        self.add_producer(ServiceKey::of::<S>(), registration, upcaster_for::<I, S>())
    }

    pub fn register_transient<S, I>(&self) -> Result<()>
    where
        S: ?Sized + Send + Sync + 'static,
        I: Component + Upcast<S>,
    {
        self.register::<S, I>(Lifestyle::Transient)
    }

    pub fn register_singleton<S, I>(&self) -> Result<()>
    where
        S: ?Sized + Send + Sync + 'static,
        I: Component + Upcast<S>,
    {
        self.register::<S, I>(Lifestyle::Singleton)
    }

    /// Registers with the default scoped lifestyle from the options, or
    /// [`Lifestyle::scoped`] when none is configured.
    pub fn register_scoped<S, I>(&self) -> Result<()>
    where
        S: ?Sized + Send + Sync + 'static,
        I: Component + Upcast<S>,
    {
        let lifestyle = self
            .inner
            .options
            .default_scoped_lifestyle
            .clone()
            .unwrap_or_else(Lifestyle::scoped);
        self.register::<S, I>(lifestyle)
    }

    /// Registers with the lifestyle picked by the configured selector;
    /// transient when no selector is configured.
    ///
    /// # Errors
    /// [`GraftError::InvalidLifestyle`] when the selector returns `None`.
    pub fn register_default<S, I>(&self) -> Result<()>
    where
        S: ?Sized + Send + Sync + 'static,
        I: Component + Upcast<S>,
    {
        let service = ServiceKey::of::<S>();
        let implementation = ServiceKey::of::<I>();

        let lifestyle = match &self.inner.options.lifestyle_selector {
            None => Lifestyle::Transient,
            Some(select) => {
                select(&service, &implementation).ok_or_else(|| GraftError::InvalidLifestyle {
                    key: service.clone(),
                    reason: format!(
                        "the lifestyle selection behavior returned no lifestyle for {}",
                        implementation.short_name()
                    ),
                })?
            }
        };

        self.register::<S, I>(lifestyle)
    }

    /// Registers `I` for `S` under a name; resolve it with
    /// [`get_named_instance`](Self::get_named_instance).
    pub fn register_named<S, I>(&self, name: &'static str, lifestyle: Lifestyle) -> Result<()>
    where
        S: ?Sized + Send + Sync + 'static,
        I: Component + Upcast<S>,
    {
        self.ensure_unlocked::<S>()?;
        let registration = lifestyle.create_registration::<I>();
        self.add_producer(
            ServiceKey::named::<S>(name),
            registration,
            upcaster_for::<I, S>(),
        )
    }

    /// Registers a factory delegate for `S`.
    pub fn register_factory<S>(
        &self,
        lifestyle: Lifestyle,
        factory: impl Fn(&Resolver<'_>) -> Result<Arc<S>> + Send + Sync + 'static,
    ) -> Result<()>
    where
        S: ?Sized + Send + Sync + 'static,
    {
        self.ensure_unlocked::<S>()?;
        let registration = lifestyle.create_factory_registration::<S>(factory);
        self.add_producer(ServiceKey::of::<S>(), registration, None)
    }

    /// Registers an existing instance as a singleton. The container never
    /// disposes it.
    pub fn register_instance<S>(&self, instance: Arc<S>) -> Result<()>
    where
        S: ?Sized + Send + Sync + 'static,
    {
        self.ensure_unlocked::<S>()?;
        let registration = Arc::new(Registration::instance(instance));
        self.add_producer(ServiceKey::of::<S>(), registration, None)
    }

    /// Maps `S` to an existing registration of `I`. Services sharing one
    /// registration share its cached instances.
    ///
    /// # Errors
    /// [`GraftError::InvalidRegistration`] when the registration does not
    /// create `I`.
    pub fn add_registration<S, I>(&self, registration: Arc<Registration>) -> Result<()>
    where
        S: ?Sized + Send + Sync + 'static,
        I: Upcast<S>,
    {
        self.ensure_unlocked::<S>()?;
        if !registration.implementation().is::<I>() {
            return Err(GraftError::InvalidRegistration {
                key: ServiceKey::of::<S>(),
                reason: format!(
                    "the registration creates {}, not {}",
                    registration.implementation(),
                    type_name::<I>()
                ),
            });
        }
        self.add_producer(ServiceKey::of::<S>(), registration, upcaster_for::<I, S>())
    }

    /// Registers the elements resolved by
    /// [`get_all_instances::<S>`](Self::get_all_instances).
    pub fn register_collection<S>(&self, elements: Vec<Element<S>>) -> Result<()>
    where
        S: ?Sized + Send + Sync + 'static,
    {
        self.ensure_unlocked::<Collection<S>>()?;
        let producers = elements.into_iter().map(Element::into_producer).collect();
        self.inner.registry.register_collection(
            ServiceKey::of::<Collection<S>>(),
            producers,
            make_collection::<S>,
            self.inner.options.allow_overriding_registrations,
        )
    }

    /// Adds one element to the collection of `S`, creating it if needed.
    pub fn append_to_collection<S, I>(&self, lifestyle: Lifestyle) -> Result<()>
    where
        S: ?Sized + Send + Sync + 'static,
        I: Component + Upcast<S>,
    {
        self.ensure_unlocked::<Collection<S>>()?;
        self.inner.registry.append_to_collection(
            ServiceKey::of::<Collection<S>>(),
            Element::<S>::of::<I>(lifestyle).into_producer(),
            make_collection::<S>,
        );
        Ok(())
    }

    /// Wraps every producer of `S` (collection elements included) in `D`.
    ///
    /// # Errors
    /// [`GraftError::InvalidRegistration`] when `D` does not declare a
    /// dependency on `S`.
    pub fn register_decorator<S, D>(&self, lifestyle: Lifestyle) -> Result<()>
    where
        S: ?Sized + Send + Sync + 'static,
        D: Component + Upcast<S>,
    {
        self.add_decorator(DecoratorEntry::new::<S, D>(lifestyle, None)?)
    }

    /// Like [`register_decorator`](Self::register_decorator), applied only
    /// where `predicate` returns `true`.
    pub fn register_decorator_if<S, D>(
        &self,
        lifestyle: Lifestyle,
        predicate: impl Fn(&DecoratorContext<'_>) -> bool + Send + Sync + 'static,
    ) -> Result<()>
    where
        S: ?Sized + Send + Sync + 'static,
        D: Component + Upcast<S>,
    {
        self.add_decorator(DecoratorEntry::new::<S, D>(lifestyle, Some(Arc::new(predicate)))?)
    }

    /// Runs `action` on every created instance whose implementation is `T`,
    /// after construction and before it is cached.
    pub fn register_initializer<T>(
        &self,
        action: impl Fn(&T, &Resolver<'_>) -> Result<()> + Send + Sync + 'static,
    ) -> Result<()>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.ensure_unlocked::<T>()?;
        debug!(target_type = %shorten_type_name(type_name::<T>()), "Registered initializer");
        self.inner.initializers.write().push(erase_initializer::<T>(action));
        Ok(())
    }

    /// Called for service keys with no registration. The first handler that
    /// registers something for the key wins.
    pub fn on_unregistered_type(
        &self,
        handler: impl Fn(&mut UnregisteredTypeEvent<'_>) + Send + Sync + 'static,
    ) -> Result<()> {
        self.ensure_unlocked::<UnregisteredTypeEvent<'static>>()?;
        self.inner.unregistered_handlers.write().push(Arc::new(handler));
        Ok(())
    }

    /// Called once per producer after its factory was built. A handler may
    /// replace the factory; an error fails (and is cached as) the build.
    pub fn on_factory_built(
        &self,
        handler: impl Fn(&mut FactoryBuiltEvent<'_>) -> Result<()> + Send + Sync + 'static,
    ) -> Result<()> {
        self.ensure_unlocked::<FactoryBuiltEvent<'static>>()?;
        self.inner.factory_built_handlers.write().push(Arc::new(handler));
        Ok(())
    }

    /// Lets `provider` register its services.
    pub fn add_provider(&self, provider: &dyn Provider) -> Result<()> {
        debug!(provider = provider.name(), "Adding provider");
        provider.register(self)
    }

    // ── Resolution ──

    /// Resolves `S`.
    ///
    /// # Errors
    /// - [`GraftError::NotRegistered`] if `S` has no registration
    /// - [`GraftError::CyclicDependency`] if `S` depends on itself
    /// - any build or activation failure, identical on every call
    pub fn get_instance<S: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<S>> {
        self.resolver().resolve::<S>()
    }

    pub fn get_named_instance<S: ?Sized + Send + Sync + 'static>(
        &self,
        name: &'static str,
    ) -> Result<Arc<S>> {
        self.resolver().resolve_named::<S>(name)
    }

    /// Resolves by key. The instance holds an `Arc<S>` for the key's type.
    pub fn get_instance_by_key(&self, key: &ServiceKey) -> Result<Instance> {
        self.resolver().resolve_key(key)
    }

    /// Resolves every registered implementation of `S`, lazily.
    pub fn get_all_instances<S: ?Sized + Send + Sync + 'static>(&self) -> Result<Collection<S>> {
        self.resolver().resolve_all::<S>()
    }

    /// Resolves a concrete component, auto-registering it as transient when
    /// the options allow it.
    pub fn get_concrete_instance<I: Component>(&self) -> Result<Arc<I>> {
        let key = ServiceKey::of::<I>();
        self.ensure_live(&key)?;
        self.lock();

        let producer = self
            .find_producer(&key)
            .or_else(|| concrete_fallback::<I>(self))
            .ok_or_else(|| self.not_registered(&key, None, None))?;
        let instance = producer.get_instance(&self.resolver())?;
        downcast_instance::<I>(&key, instance)
    }

    /// The producer for `key`, if any. Locks the container.
    pub fn get_registration(&self, key: &ServiceKey) -> Option<Arc<InstanceProducer>> {
        self.lock();
        self.find_producer(key)
    }

    pub fn get_required_registration(&self, key: &ServiceKey) -> Result<Arc<InstanceProducer>> {
        self.get_registration(key)
            .ok_or_else(|| self.not_registered(key, None, None))
    }

    /// Every producer known so far, in registration order. Includes
    /// producers the container created itself.
    pub fn get_current_registrations(&self) -> Vec<Arc<InstanceProducer>> {
        self.inner.registry.producers()
    }

    /// Producers no other producer depends on.
    ///
    /// # Errors
    /// [`GraftError::Verification`] if any producer fails to build.
    pub fn get_root_registrations(&self) -> Result<Vec<Arc<InstanceProducer>>> {
        self.verify(VerificationMode::Build)?;
        let graph = ProducerGraph::build(&self.inner.registry.producers());
        Ok(graph.roots().map(|node| node.producer().clone()).collect())
    }

    // ── Verification & diagnostics ──

    /// Builds (and with [`VerificationMode::Full`], instantiates) every
    /// producer, collecting every failure.
    ///
    /// # Errors
    /// [`GraftError::Verification`] listing each failing producer.
    #[instrument(skip(self), fields(container = self.inner.id))]
    pub fn verify(&self, mode: VerificationMode) -> Result<()> {
        self.lock();

        let mut targets: Vec<Arc<InstanceProducer>> = Vec::new();
        let mut seen = HashSet::new();
        for producer in self.inner.registry.producers() {
            let elements = producer.collection_elements();
            for target in std::iter::once(producer).chain(elements) {
                if seen.insert(target.id()) {
                    targets.push(target);
                }
            }
        }

        info!(producers = targets.len(), ?mode, "Verifying container");

        let mut failures: Vec<(ServiceKey, GraftError)> = Vec::new();
        let mut built: Vec<Arc<InstanceProducer>> = Vec::with_capacity(targets.len());
        for target in targets {
            match target.factory(self) {
                Ok(_) => built.push(target),
                Err(error) => failures.push((target.service_key().clone(), error)),
            }
        }

        if mode == VerificationMode::Full {
            let scope = self.begin_scope();
            let resolver = Resolver::new(self, Some(&scope));
            for target in &built {
                if let Err(error) = target.get_instance(&resolver) {
                    failures.push((target.service_key().clone(), error));
                }
            }
            scope.dispose();
        }

        if failures.is_empty() {
            info!("Container verified ✓");
            Ok(())
        } else {
            warn!(failures = failures.len(), "Container verification failed");
            Err(GraftError::Verification(VerificationError { failures }))
        }
    }

    /// Builds every producer and runs the diagnostic analyzers.
    ///
    /// # Errors
    /// [`GraftError::Verification`] if any producer fails to build.
    #[instrument(skip(self), fields(container = self.inner.id))]
    pub fn analyze(&self) -> Result<Analysis> {
        self.verify(VerificationMode::Build)?;
        let graph = ProducerGraph::build(&self.inner.registry.producers());
        let analysis = diagnostics::analyze(&graph, &self.inner.options);

        info!(
            results = analysis.results().len(),
            warnings = analysis.warnings().count(),
            "Diagnostics complete"
        );
        Ok(analysis)
    }

    /// Fully verifies the container, then fails if any warning-level
    /// diagnostic is left unsuppressed.
    ///
    /// # Errors
    /// [`GraftError::Verification`] or [`GraftError::Diagnostics`].
    pub fn verify_and_diagnose(&self) -> Result<Analysis> {
        self.verify(VerificationMode::Full)?;
        let analysis = self.analyze()?;

        let warnings: Vec<String> = analysis
            .warnings()
            .map(|result| format!("[{}] {}", result.kind(), result.description()))
            .collect();
        if !warnings.is_empty() {
            return Err(GraftError::Diagnostics(DiagnosticsError { warnings }));
        }
        Ok(analysis)
    }

    // ── Disposal ──

    /// Disposes singletons in reverse creation order. Later resolutions
    /// fail with [`GraftError::ContainerDisposed`].
    #[instrument(skip(self), fields(container = self.inner.id))]
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.locked.store(true, Ordering::Release);
        info!("Disposing container");
        self.inner.singletons.dispose();
    }

    // ── Crate internals ──

    pub(crate) fn from_inner(inner: Arc<ContainerInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<ContainerInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn create_scope(
        &self,
        parent: Option<Scope>,
        ambient: Option<Weak<dyn AmbientScope>>,
    ) -> Scope {
        Scope::new(self.inner.id, self.downgrade(), parent, ambient)
    }

    /// A registered producer, a pending collection, or whatever an
    /// unregistered-type handler supplies.
    pub(crate) fn find_producer(&self, key: &ServiceKey) -> Option<Arc<InstanceProducer>> {
        if let Some(producer) = self.inner.registry.get(key) {
            return Some(producer);
        }
        self.resolve_unregistered(key)
    }

    /// Adds a producer created while resolving. The first one published
    /// for a key wins.
    pub(crate) fn publish_producer(&self, producer: InstanceProducer) -> Arc<InstanceProducer> {
        self.inner.registry.publish(Arc::new(producer))
    }

    pub(crate) fn not_registered(
        &self,
        key: &ServiceKey,
        required_by: Option<&ServiceKey>,
        parameter: Option<&'static str>,
    ) -> GraftError {
        let available = self.inner.registry.type_names();
        let suggestions = suggest_similar(key.type_name(), &available, MAX_SUGGESTIONS)
            .into_iter()
            .map(|name| shorten_type_name(&name))
            .collect();

        debug!(key = %key, required_by = ?required_by.map(ServiceKey::short_name), "Service not registered");

        GraftError::NotRegistered(NotRegisteredError {
            requested: key.clone(),
            required_by: required_by.cloned(),
            parameter,
            suggestions,
        })
    }

    pub(crate) fn initializers_for(&self, implementation: &ServiceKey) -> Vec<Initializer> {
        self.inner
            .initializers
            .read()
            .iter()
            .filter(|(type_id, _)| *type_id == implementation.type_id())
            .map(|(_, initializer)| initializer.clone())
            .collect()
    }

    pub(crate) fn decorators_for(&self, service: &ServiceKey) -> Vec<DecoratorEntry> {
        self.inner
            .decorators
            .read()
            .iter()
            .filter(|entry| entry.decorates(service))
            .cloned()
            .collect()
    }

    pub(crate) fn run_factory_built_hooks(
        &self,
        producer: &InstanceProducer,
        factory: InstanceFactory,
    ) -> Result<InstanceFactory> {
        let handlers = self.inner.factory_built_handlers.read().clone();
        let mut factory = factory;
        for handler in handlers {
            let mut event = FactoryBuiltEvent { producer, factory };
            handler(&mut event)?;
            factory = event.factory;
        }
        Ok(factory)
    }

    pub(crate) fn register_singleton_disposer(&self, disposer: Disposer) {
        self.inner.singletons.push_disposer(disposer);
    }

    fn add_producer(
        &self,
        key: ServiceKey,
        registration: Arc<Registration>,
        upcaster: Option<Upcaster>,
    ) -> Result<()> {
        let producer = InstanceProducer::new(key, registration, upcaster, true);
        self.inner
            .registry
            .register(Arc::new(producer), self.inner.options.allow_overriding_registrations)
    }

    fn add_decorator(&self, entry: DecoratorEntry) -> Result<()> {
        if self.is_locked() {
            return Err(GraftError::ContainerLocked {
                action: format!("register decorator {}", entry.implementation().short_name()),
            });
        }
        debug!(decorator = %entry.implementation(), "Registered decorator");
        self.inner.decorators.write().push(entry);
        Ok(())
    }

    fn resolve_unregistered(&self, key: &ServiceKey) -> Option<Arc<InstanceProducer>> {
        let handlers = self.inner.unregistered_handlers.read().clone();
        for handler in handlers {
            let mut event = UnregisteredTypeEvent {
                key,
                registered: None,
            };
            handler(&mut event);

            if let Some((registration, upcaster)) = event.registered {
                debug!(key = %key, implementation = %registration.implementation(), "Resolved unregistered type");
                let producer = InstanceProducer::new(key.clone(), registration, upcaster, false);
                return Some(self.publish_producer(producer));
            }
        }
        None
    }

    fn ensure_unlocked<T: ?Sized + 'static>(&self) -> Result<()> {
        if self.is_locked() {
            return Err(GraftError::ContainerLocked {
                action: format!("register {}", shorten_type_name(type_name::<T>())),
            });
        }
        Ok(())
    }

    fn ensure_live(&self, key: &ServiceKey) -> Result<()> {
        if self.is_disposed() {
            return Err(GraftError::ContainerDisposed { key: key.clone() });
        }
        Ok(())
    }

    fn lock(&self) {
        if !self.inner.locked.swap(true, Ordering::AcqRel) {
            info!(
                container = self.inner.id,
                registrations = self.inner.registry.len(),
                "Container locked ✓"
            );
        }
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("id", &self.inner.id)
            .field("registered", &self.inner.registry.len())
            .field("locked", &self.is_locked())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Auto-registers a concrete component as transient, if the options allow.
pub(crate) fn concrete_fallback<I: Component>(container: &Container) -> Option<Arc<InstanceProducer>> {
    if !container.options().resolve_unregistered_concrete_types {
        return None;
    }

    debug!(implementation = %shorten_type_name(type_name::<I>()), "Auto-registering concrete type");
    let producer = InstanceProducer::new(
        ServiceKey::of::<I>(),
        Lifestyle::Transient.create_registration::<I>(),
        None,
        false,
    );
    Some(container.publish_producer(producer))
}

// ═══════════════════════════════════════════
// Resolver
// ═══════════════════════════════════════════

/// A resolution context: the container plus the explicit scope of the
/// current request, if any. Handed to factory delegates and initializers.
#[derive(Clone, Copy)]
pub struct Resolver<'a> {
    container: &'a Container,
    scope: Option<&'a Scope>,
}

impl<'a> Resolver<'a> {
    pub(crate) fn new(container: &'a Container, scope: Option<&'a Scope>) -> Self {
        Self { container, scope }
    }

    pub fn container(&self) -> &'a Container {
        self.container
    }

    /// The explicit scope of this request.
    pub fn scope(&self) -> Option<&'a Scope> {
        self.scope
    }

    /// The same request, carrying `scope` instead.
    pub fn with_scope<'b>(&self, scope: &'b Scope) -> Resolver<'b>
    where
        'a: 'b,
    {
        Resolver {
            container: self.container,
            scope: Some(scope),
        }
    }

    pub fn resolve<S: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<S>> {
        let key = ServiceKey::of::<S>();
        let instance = self.resolve_key(&key)?;
        downcast_instance::<S>(&key, instance)
    }

    pub fn resolve_named<S: ?Sized + Send + Sync + 'static>(
        &self,
        name: &'static str,
    ) -> Result<Arc<S>> {
        let key = ServiceKey::named::<S>(name);
        let instance = self.resolve_key(&key)?;
        downcast_instance::<S>(&key, instance)
    }

    pub fn resolve_all<S: ?Sized + Send + Sync + 'static>(&self) -> Result<Collection<S>> {
        let key = ServiceKey::of::<Collection<S>>();
        self.container.ensure_live(&key)?;
        self.container.lock();

        let producer = self
            .container
            .find_producer(&key)
            .or_else(|| empty_collection_fallback::<S>(self.container))
            .ok_or_else(|| self.container.not_registered(&key, None, None))?;

        let instance = producer.get_instance(self)?;
        let collection = downcast_instance::<Collection<S>>(&key, instance)?;
        Ok((*collection).clone())
    }

    pub fn resolve_key(&self, key: &ServiceKey) -> Result<Instance> {
        self.container.ensure_live(key)?;
        self.container.lock();
        trace!(key = %key, scope = ?self.scope.map(Scope::id), "Resolving");

        let producer = self
            .container
            .find_producer(key)
            .ok_or_else(|| self.container.not_registered(key, None, None))?;
        producer.get_instance(self)
    }
}

impl fmt::Debug for Resolver<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("container", &self.container.id())
            .field("scope", &self.scope.map(Scope::id))
            .finish()
    }
}

// ═══════════════════════════════════════════
// Events
// ═══════════════════════════════════════════

/// Raised for a service key nobody registered.
pub struct UnregisteredTypeEvent<'a> {
    key: &'a ServiceKey,
    registered: Option<(Arc<Registration>, Option<Upcaster>)>,
}

impl UnregisteredTypeEvent<'_> {
    pub fn service_key(&self) -> &ServiceKey {
        self.key
    }

    pub fn is_handled(&self) -> bool {
        self.registered.is_some()
    }

    /// Supplies `I` as the implementation of the requested `S`.
    ///
    /// # Errors
    /// [`GraftError::InvalidRegistration`] when `S` is not the requested
    /// type, [`GraftError::AlreadyRegistered`] when already handled.
    pub fn register<S, I>(&mut self, lifestyle: Lifestyle) -> Result<()>
    where
        S: ?Sized + Send + Sync + 'static,
        I: Component + Upcast<S>,
    {
        self.accept::<S>(lifestyle.create_registration::<I>(), upcaster_for::<I, S>())
    }

    pub fn register_factory<S>(
        &mut self,
        lifestyle: Lifestyle,
        factory: impl Fn(&Resolver<'_>) -> Result<Arc<S>> + Send + Sync + 'static,
    ) -> Result<()>
    where
        S: ?Sized + Send + Sync + 'static,
    {
        self.accept::<S>(lifestyle.create_factory_registration::<S>(factory), None)
    }

    fn accept<S: ?Sized + 'static>(
        &mut self,
        registration: Arc<Registration>,
        upcaster: Option<Upcaster>,
    ) -> Result<()> {
        if self.key.type_id() != TypeId::of::<S>() {
            return Err(GraftError::InvalidRegistration {
                key: self.key.clone(),
                reason: format!(
                    "a handler for {} cannot register {}",
                    self.key.short_name(),
                    shorten_type_name(type_name::<S>())
                ),
            });
        }
        if self.registered.is_some() {
            return Err(GraftError::AlreadyRegistered(AlreadyRegisteredError {
                key: self.key.clone(),
            }));
        }
        self.registered = Some((registration, upcaster));
        Ok(())
    }
}

/// Raised once per producer after its factory was built.
pub struct FactoryBuiltEvent<'a> {
    producer: &'a InstanceProducer,
    factory: InstanceFactory,
}

impl FactoryBuiltEvent<'_> {
    pub fn service_key(&self) -> &ServiceKey {
        self.producer.service_key()
    }

    pub fn registration(&self) -> &Arc<Registration> {
        self.producer.registration()
    }

    pub fn factory(&self) -> &InstanceFactory {
        &self.factory
    }

    /// Replaces the factory. The replacement must produce instances of the
    /// same service type.
    pub fn replace_factory(&mut self, factory: InstanceFactory) {
        trace!(service = %self.producer.service_key(), "Factory replaced");
        self.factory = factory;
    }
}

// ═══════════════════════════════════════════
// Prelude
// ═══════════════════════════════════════════

pub mod prelude {
    pub use super::{Container, FactoryBuiltEvent, Resolver, UnregisteredTypeEvent, VerificationMode};
    pub use crate::collection::{Collection, Element};
    pub use crate::component::{Arguments, Component, Dependency, Disposable, Upcast};
    pub use crate::decorator::DecoratorContext;
    pub use crate::diagnostics::{Analysis, DiagnosticType, Severity};
    pub use crate::error::{GraftError, Result};
    pub use crate::key::ServiceKey;
    pub use crate::lifestyle::{Lifestyle, ScopedLifestyle};
    pub use crate::options::ContainerOptions;
    pub use crate::producer::InstanceProducer;
    pub use crate::provider::Provider;
    pub use crate::registration::Registration;
    pub use crate::scope::{AmbientScope, Scope, ThreadScopeManager};

    #[cfg(feature = "async")]
    pub use crate::async_scope::AsyncScopeManager;
}

// ═══════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════
