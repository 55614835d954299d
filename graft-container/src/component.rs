//! Constructor contracts for auto-wired components.
//!
//! A [`Component`] declares the services its constructor needs as a list of
//! [`Dependency`] values and builds itself from [`Arguments`]. The container
//! reads the declaration once, when the component's registration is built,
//! and hands the constructor one pre-built factory per dependency.
//!
//! Binding an implementation to a trait-object service goes through
//! [`Upcast`]. Every type upcasts to itself; the [`implements!`](crate::implements)
//! macro adds `Arc<Impl> -> Arc<dyn Trait>` coercions.

use std::any::{TypeId, type_name};
use std::sync::Arc;

use crate::container::{Container, Resolver};
use crate::error::{ArgumentMismatchError, GraftError, Result};
use crate::key::ServiceKey;
use crate::producer::InstanceProducer;
use crate::registration::{Instance, InstanceFactory};

/// A type the container knows how to construct.
///
/// # Examples
/// ```
/// use std::sync::Arc;
/// use graft_container::prelude::*;
///
/// trait UserRepository: Send + Sync {
///     fn find(&self, id: u32) -> Option<String>;
/// }
///
/// struct InMemoryUserRepository;
/// impl UserRepository for InMemoryUserRepository {
///     fn find(&self, id: u32) -> Option<String> {
///         (id == 1).then(|| "ada".to_string())
///     }
/// }
/// impl Component for InMemoryUserRepository {
///     fn construct(_: &mut Arguments<'_>) -> Result<Self> {
///         Ok(InMemoryUserRepository)
///     }
/// }
/// graft_container::implements!(InMemoryUserRepository => dyn UserRepository);
///
/// struct UserService {
///     repository: Arc<dyn UserRepository>,
/// }
/// impl Component for UserService {
///     fn dependencies() -> Vec<Dependency> {
///         vec![Dependency::on::<dyn UserRepository>("repository")]
///     }
///     fn construct(args: &mut Arguments<'_>) -> Result<Self> {
///         Ok(UserService { repository: args.get()? })
///     }
/// }
///
/// let container = Container::new();
/// container.register_singleton::<dyn UserRepository, InMemoryUserRepository>().unwrap();
/// container.register_transient::<UserService, UserService>().unwrap();
///
/// let service = container.get_instance::<UserService>().unwrap();
/// assert_eq!(service.repository.find(1).as_deref(), Some("ada"));
/// ```
pub trait Component: Sized + Send + Sync + 'static {
    /// Services the constructor reads, in the order it reads them.
    fn dependencies() -> Vec<Dependency> {
        Vec::new()
    }

    /// Builds the component from its resolved dependencies.
    fn construct(args: &mut Arguments<'_>) -> Result<Self>;

    /// Cleanup run when the owning scope (or the container, for
    /// singletons) is disposed.
    fn disposer() -> Option<fn(&Self)> {
        None
    }
}

/// An object that can be handed to a scope for cleanup.
pub trait Disposable: Send + Sync {
    fn dispose(&self);
}

/// Converts a shared implementation into a shared service.
pub trait Upcast<S: ?Sized>: Send + Sync + 'static {
    fn upcast(self: Arc<Self>) -> Arc<S>;
}

impl<T: Send + Sync + 'static> Upcast<T> for T {
    fn upcast(self: Arc<Self>) -> Arc<T> {
        self
    }
}

/// Declares that an implementation can be handed out as one or more
/// trait-object services.
///
/// ```
/// trait Clock: Send + Sync {}
/// struct SystemClock;
/// impl Clock for SystemClock {}
///
/// graft_container::implements!(SystemClock => dyn Clock);
/// ```
#[macro_export]
macro_rules! implements {
    ($ty:ty => $($service:ty),+ $(,)?) => {
        $(
            impl $crate::component::Upcast<$service> for $ty {
                fn upcast(self: ::std::sync::Arc<Self>) -> ::std::sync::Arc<$service> {
                    self
                }
            }
        )+
    };
}

pub(crate) type Fallback = fn(&Container) -> Option<Arc<InstanceProducer>>;

/// A constructor dependency: the service it needs and the parameter name
/// used in error messages.
#[derive(Clone)]
pub struct Dependency {
    key: ServiceKey,
    parameter: &'static str,
    fallback: Option<Fallback>,
}

impl Dependency {
    /// A dependency on a registered service.
    pub fn on<T: ?Sized + Send + Sync + 'static>(parameter: &'static str) -> Self {
        Self {
            key: ServiceKey::of::<T>(),
            parameter,
            fallback: None,
        }
    }

    /// A dependency on a named registration.
    pub fn named<T: ?Sized + Send + Sync + 'static>(
        parameter: &'static str,
        name: &'static str,
    ) -> Self {
        Self {
            key: ServiceKey::named::<T>(name),
            parameter,
            fallback: None,
        }
    }

    /// A dependency on a concrete component. When the component is not
    /// registered it is auto-registered as transient, unless
    /// `resolve_unregistered_concrete_types` is disabled.
    pub fn concrete<I: Component>(parameter: &'static str) -> Self {
        Self {
            key: ServiceKey::of::<I>(),
            parameter,
            fallback: Some(crate::container::concrete_fallback::<I>),
        }
    }

    /// A dependency on all registered implementations of `T`.
    ///
    /// Resolves to an empty [`Collection`](crate::collection::Collection)
    /// when nothing was registered and `resolve_unregistered_collections`
    /// is enabled.
    pub fn collection<T: ?Sized + Send + Sync + 'static>(parameter: &'static str) -> Self {
        Self {
            key: ServiceKey::of::<crate::collection::Collection<T>>(),
            parameter,
            fallback: Some(crate::collection::empty_collection_fallback::<T>),
        }
    }

    pub fn key(&self) -> &ServiceKey {
        &self.key
    }

    pub fn parameter(&self) -> &'static str {
        self.parameter
    }

    pub(crate) fn fallback(&self) -> Option<Fallback> {
        self.fallback
    }
}

impl std::fmt::Debug for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dependency")
            .field("key", &self.key)
            .field("parameter", &self.parameter)
            .finish()
    }
}

/// A declared dependency paired with the factory built for it.
pub(crate) struct BoundDependency {
    pub dependency: Dependency,
    pub factory: InstanceFactory,
}

/// Resolved constructor arguments, read in declaration order.
pub struct Arguments<'a> {
    consumer: &'a ServiceKey,
    bound: &'a [BoundDependency],
    resolver: Resolver<'a>,
    position: usize,
}

impl<'a> Arguments<'a> {
    pub(crate) fn new(
        consumer: &'a ServiceKey,
        bound: &'a [BoundDependency],
        resolver: Resolver<'a>,
    ) -> Self {
        Self {
            consumer,
            bound,
            resolver,
            position: 0,
        }
    }

    /// Returns the next argument.
    ///
    /// # Errors
    /// [`GraftError::ArgumentMismatch`] when `T` differs from the declared
    /// dependency at this position, or when every declared dependency was
    /// already read.
    pub fn get<T: ?Sized + Send + Sync + 'static>(&mut self) -> Result<Arc<T>> {
        let position = self.position;
        let bound = match self.bound.get(position) {
            Some(bound) if bound.dependency.key.is::<T>() => bound,
            other => {
                return Err(GraftError::ArgumentMismatch(ArgumentMismatchError {
                    consumer: self.consumer.clone(),
                    position,
                    requested: type_name::<T>(),
                    declared: other.map(|b| b.dependency.key.clone()),
                }));
            }
        };

        self.position += 1;
        let instance = (bound.factory)(&self.resolver)?;
        downcast_instance::<T>(&bound.dependency.key, instance)
    }

    /// Number of declared arguments not read yet.
    pub fn remaining(&self) -> usize {
        self.bound.len().saturating_sub(self.position)
    }

    /// The resolver the component is being built with.
    pub fn resolver(&self) -> &Resolver<'a> {
        &self.resolver
    }
}

/// Converts an implementation-level instance into a service-level one.
pub(crate) type Upcaster = fn(Instance) -> Option<Instance>;

fn upcast_instance<I, S>(instance: Instance) -> Option<Instance>
where
    I: Upcast<S>,
    S: ?Sized + Send + Sync + 'static,
{
    let concrete = instance.downcast::<Arc<I>>().ok()?;
    let service: Arc<S> = <I as Upcast<S>>::upcast(Arc::unwrap_or_clone(concrete));
    Some(Arc::new(service))
}

/// `None` when `I` is the service itself.
pub(crate) fn upcaster_for<I, S>() -> Option<Upcaster>
where
    I: Upcast<S>,
    S: ?Sized + Send + Sync + 'static,
{
    if TypeId::of::<I>() == TypeId::of::<S>() {
        None
    } else {
        Some(upcast_instance::<I, S>)
    }
}

pub(crate) fn downcast_instance<T: ?Sized + Send + Sync + 'static>(
    key: &ServiceKey,
    instance: Instance,
) -> Result<Arc<T>> {
    instance
        .downcast::<Arc<T>>()
        .map(Arc::unwrap_or_clone)
        .map_err(|_| GraftError::TypeMismatch {
            key: key.clone(),
            expected: type_name::<Arc<T>>(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }

    struct English;
    impl Greeter for English {
        fn greet(&self) -> String {
            "hello".into()
        }
    }
    crate::implements!(English => dyn Greeter);

    #[test]
    fn identity_has_no_upcaster() {
        assert!(upcaster_for::<English, English>().is_none());
        assert!(upcaster_for::<English, dyn Greeter>().is_some());
    }

    #[test]
    fn upcaster_converts_implementation_to_service() {
        let instance: Instance = Arc::new(Arc::new(English));
        let upcast = upcaster_for::<English, dyn Greeter>().unwrap();
        let service = upcast(instance).unwrap();

        let greeter =
            downcast_instance::<dyn Greeter>(&ServiceKey::of::<dyn Greeter>(), service).unwrap();
        assert_eq!(greeter.greet(), "hello");
    }

    #[test]
    fn upcaster_rejects_foreign_instance() {
        let instance: Instance = Arc::new(Arc::new(42u32));
        let upcast = upcaster_for::<English, dyn Greeter>().unwrap();
        assert!(upcast(instance).is_none());
    }

    #[test]
    fn downcast_reports_type_mismatch() {
        let instance: Instance = Arc::new(Arc::new(42u32));
        let err = downcast_instance::<String>(&ServiceKey::of::<String>(), instance).unwrap_err();
        assert!(matches!(err, GraftError::TypeMismatch { .. }));
    }

    #[test]
    fn dependency_keys() {
        let dep = Dependency::named::<String>("url", "primary");
        assert_eq!(dep.parameter(), "url");
        assert_eq!(dep.key(), &ServiceKey::named::<String>("primary"));
        assert!(dep.fallback().is_none());
        assert!(Dependency::collection::<dyn Greeter>("greeters").fallback().is_some());
    }
}
