//! Lifestyles: how long an instance lives and who caches it.
//!
//! A [`Lifestyle`] is a closed set of variants dispatched by `match`:
//! - [`Lifestyle::Transient`]: a new instance on every request
//! - [`Lifestyle::Singleton`]: one instance per registration for the
//!   lifetime of the container
//! - [`Lifestyle::Scoped`]: one instance per [`Scope`]
//! - [`Lifestyle::Hybrid`]: one of two lifestyles, picked per request
//!
//! # Length
//! Every lifestyle has a length used only by mismatch detection. A
//! component must not depend on a component with a shorter length.
//!
//! | Lifestyle       | Length                     |
//! |-----------------|----------------------------|
//! | Transient       | `0`                        |
//! | Thread scoped   | [`THREAD_SCOPED_LENGTH`]   |
//! | Async scoped    | [`ASYNC_SCOPED_LENGTH`]    |
//! | Scoped          | [`DEFAULT_SCOPED_LENGTH`]  |
//! | Singleton       | `u32::MAX`                 |
//!
//! Scoped lengths are a convention. Use [`ScopedLifestyle::with_length`]
//! to place a custom scope elsewhere in the order.

use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::component::Component;
use crate::container::Resolver;
use crate::error::{GraftError, Result};
use crate::key::ServiceKey;
use crate::registration::{Instance, InstanceFactory, RawFactory, Registration};
use crate::scope::{AmbientScope, Scope};

/// Length of [`Lifestyle::scoped()`] and of scoped lifestyles created with
/// [`ScopedLifestyle::new`].
pub const DEFAULT_SCOPED_LENGTH: u32 = 500;

/// Length of the lifestyle returned by
/// [`ThreadScopeManager::lifestyle`](crate::scope::ThreadScopeManager::lifestyle).
pub const THREAD_SCOPED_LENGTH: u32 = 250;

/// Length of the lifestyle returned by `AsyncScopeManager::lifestyle`.
pub const ASYNC_SCOPED_LENGTH: u32 = 300;

/// Decides at resolution time which branch of a hybrid lifestyle applies.
pub type HybridSelector = Arc<dyn Fn(&Resolver<'_>) -> bool + Send + Sync>;

/// Defines the lifetime of instances created by a registration.
///
/// # Examples
/// ```
/// use graft_container::lifestyle::Lifestyle;
///
/// assert!(Lifestyle::Singleton.length() > Lifestyle::scoped().length());
/// assert!(Lifestyle::scoped().length() > Lifestyle::Transient.length());
/// ```
#[derive(Clone)]
pub enum Lifestyle {
    /// New instance created on every request. Never cached, never disposed.
    Transient,

    /// One instance per registration, created on first request and disposed
    /// with the container.
    Singleton,

    /// One instance per scope, disposed with the scope.
    Scoped(ScopedLifestyle),

    /// Picks one of two lifestyles on every request.
    Hybrid(Arc<HybridLifestyle>),
}

impl Lifestyle {
    /// The default scoped lifestyle. Instances are cached in the scope the
    /// request is made in.
    pub fn scoped() -> Self {
        Lifestyle::Scoped(ScopedLifestyle::new("Scoped"))
    }

    /// Combines two lifestyles behind a runtime selector.
    ///
    /// ```
    /// use graft_container::lifestyle::Lifestyle;
    ///
    /// let lifestyle = Lifestyle::hybrid(
    ///     |resolver| resolver.scope().is_some(),
    ///     Lifestyle::scoped(),
    ///     Lifestyle::Transient,
    /// );
    /// assert_eq!(lifestyle.name(), "Hybrid Scoped / Transient");
    /// assert_eq!(lifestyle.length(), Lifestyle::scoped().length());
    /// ```
    pub fn hybrid(
        selector: impl Fn(&Resolver<'_>) -> bool + Send + Sync + 'static,
        when_true: Lifestyle,
        when_false: Lifestyle,
    ) -> Self {
        let name = format!("Hybrid {} / {}", when_true.name(), when_false.name());
        Lifestyle::Hybrid(Arc::new(HybridLifestyle {
            name,
            selector: Arc::new(selector),
            when_true,
            when_false,
        }))
    }

    pub fn name(&self) -> &str {
        match self {
            Lifestyle::Transient => "Transient",
            Lifestyle::Singleton => "Singleton",
            Lifestyle::Scoped(scoped) => scoped.name(),
            Lifestyle::Hybrid(hybrid) => &hybrid.name,
        }
    }

    /// Ordering value used by mismatch detection (higher = longer lived).
    ///
    /// A hybrid is as long as its longest branch: the branch is only known
    /// at resolution time.
    pub fn length(&self) -> u32 {
        match self {
            Lifestyle::Transient => 0,
            Lifestyle::Singleton => u32::MAX,
            Lifestyle::Scoped(scoped) => scoped.length(),
            Lifestyle::Hybrid(hybrid) => hybrid.when_true.length().max(hybrid.when_false.length()),
        }
    }

    /// Returns `true` when a component with this lifestyle must not depend
    /// on a component with lifestyle `dependency`.
    ///
    /// ```
    /// use graft_container::lifestyle::Lifestyle;
    ///
    /// assert!(Lifestyle::Singleton.outlives(&Lifestyle::Transient));
    /// assert!(!Lifestyle::Transient.outlives(&Lifestyle::Singleton));
    /// assert!(!Lifestyle::Singleton.outlives(&Lifestyle::Singleton));
    /// ```
    pub fn outlives(&self, dependency: &Lifestyle) -> bool {
        self.length() > dependency.length()
    }

    /// Returns `true` if some branch of this lifestyle needs a scope.
    pub fn is_scoped(&self) -> bool {
        match self {
            Lifestyle::Scoped(_) => true,
            Lifestyle::Hybrid(hybrid) => hybrid.when_true.is_scoped() || hybrid.when_false.is_scoped(),
            _ => false,
        }
    }

    /// Creates a registration that auto-wires `I` with this lifestyle.
    ///
    /// The registration can be shared by several services through
    /// [`Container::add_registration`](crate::container::Container::add_registration);
    /// they then share one cached instance.
    pub fn create_registration<I: Component>(&self) -> Arc<Registration> {
        Arc::new(Registration::component::<I>(self.clone()))
    }

    /// Creates a registration that calls `factory` with this lifestyle.
    pub fn create_factory_registration<S>(
        &self,
        factory: impl Fn(&Resolver<'_>) -> Result<Arc<S>> + Send + Sync + 'static,
    ) -> Arc<Registration>
    where
        S: ?Sized + Send + Sync + 'static,
    {
        Arc::new(Registration::delegate::<S>(self.clone(), factory))
    }

    /// Wraps a raw factory with this lifestyle's caching.
    pub(crate) fn apply(&self, id: u64, key: &ServiceKey, raw: RawFactory) -> InstanceFactory {
        match self {
            Lifestyle::Transient => Arc::new(move |r: &Resolver<'_>| raw(r).map(|c| c.instance)),

            Lifestyle::Singleton => {
                let cell: Arc<OnceCell<Instance>> = Arc::new(OnceCell::new());
                Arc::new(move |r: &Resolver<'_>| {
                    let instance = cell.get_or_try_init(|| {
                        let created = raw(r)?;
                        if let Some(disposer) = created.disposer {
                            r.container().register_singleton_disposer(disposer);
                        }
                        Ok::<Instance, GraftError>(created.instance)
                    })?;
                    Ok(instance.clone())
                })
            }

            Lifestyle::Scoped(scoped) => {
                let scoped = scoped.clone();
                let key = key.clone();
                Arc::new(move |r: &Resolver<'_>| {
                    let scope = scoped.active_scope(r).ok_or_else(|| GraftError::ScopeRequired {
                        key: key.clone(),
                        lifestyle: scoped.name().to_string(),
                    })?;
                    scope.get_or_create(id, &key, || raw(&r.with_scope(&scope)))
                })
            }

            Lifestyle::Hybrid(hybrid) => {
                let when_true = hybrid.when_true.apply(id, key, raw.clone());
                let when_false = hybrid.when_false.apply(id, key, raw);
                let selector = hybrid.selector.clone();
                Arc::new(move |r: &Resolver<'_>| {
                    if selector(r) { when_true(r) } else { when_false(r) }
                })
            }
        }
    }
}

/// Hybrids compare by name and branches. Selectors are closures and are not
/// compared.
impl PartialEq for Lifestyle {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Lifestyle::Transient, Lifestyle::Transient) => true,
            (Lifestyle::Singleton, Lifestyle::Singleton) => true,
            (Lifestyle::Scoped(a), Lifestyle::Scoped(b)) => a.name == b.name && a.length == b.length,
            (Lifestyle::Hybrid(a), Lifestyle::Hybrid(b)) => {
                Arc::ptr_eq(a, b)
                    || (a.name == b.name && a.when_true == b.when_true && a.when_false == b.when_false)
            }
            _ => false,
        }
    }
}

impl fmt::Debug for Lifestyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Lifestyle({}, length={})", self.name(), self.length())
    }
}

impl fmt::Display for Lifestyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<ScopedLifestyle> for Lifestyle {
    fn from(scoped: ScopedLifestyle) -> Self {
        Lifestyle::Scoped(scoped)
    }
}

/// A scoped lifestyle: its name, its length and where it finds the current
/// scope when none is passed explicitly.
#[derive(Clone)]
pub struct ScopedLifestyle {
    name: Arc<str>,
    length: u32,
    ambient: Option<Arc<dyn AmbientScope>>,
}

impl ScopedLifestyle {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            length: DEFAULT_SCOPED_LENGTH,
            ambient: None,
        }
    }

    /// Places this lifestyle in the length order. Clamped into
    /// `1..u32::MAX` so Transient and Singleton stay the extremes.
    pub fn with_length(mut self, length: u32) -> Self {
        self.length = length.clamp(1, u32::MAX - 1);
        self
    }

    /// Uses `ambient` to find the current scope when a request carries no
    /// explicit scope.
    pub fn with_ambient(mut self, ambient: Arc<dyn AmbientScope>) -> Self {
        self.ambient = Some(ambient);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn length(&self) -> u32 {
        self.length
    }

    pub fn ambient(&self) -> Option<&Arc<dyn AmbientScope>> {
        self.ambient.as_ref()
    }

    /// The explicit scope of the request if it belongs to the resolving
    /// container, otherwise the ambient current scope.
    fn active_scope(&self, resolver: &Resolver<'_>) -> Option<Scope> {
        let container_id = resolver.container().id();
        if let Some(scope) = resolver.scope() {
            if scope.container_id() == container_id {
                return Some(scope.clone());
            }
        }
        self.ambient
            .as_ref()
            .and_then(|ambient| ambient.current_scope())
            .filter(|scope| scope.container_id() == container_id)
    }
}

impl fmt::Debug for ScopedLifestyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedLifestyle")
            .field("name", &self.name)
            .field("length", &self.length)
            .field("ambient", &self.ambient.is_some())
            .finish()
    }
}

/// Two lifestyles behind a runtime selector. See [`Lifestyle::hybrid`].
pub struct HybridLifestyle {
    name: String,
    selector: HybridSelector,
    when_true: Lifestyle,
    when_false: Lifestyle,
}

impl HybridLifestyle {
    pub fn when_true(&self) -> &Lifestyle {
        &self.when_true
    }

    pub fn when_false(&self) -> &Lifestyle {
        &self.when_false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifestyle_lengths_are_ordered() {
        assert!(Lifestyle::Singleton.length() > Lifestyle::scoped().length());
        assert!(Lifestyle::scoped().length() > Lifestyle::Transient.length());
        assert!(THREAD_SCOPED_LENGTH < ASYNC_SCOPED_LENGTH);
        assert!(ASYNC_SCOPED_LENGTH < DEFAULT_SCOPED_LENGTH);
    }

    #[test]
    fn scoped_length_is_clamped() {
        let low = ScopedLifestyle::new("Low").with_length(0);
        let high = ScopedLifestyle::new("High").with_length(u32::MAX);
        assert_eq!(low.length(), 1);
        assert_eq!(high.length(), u32::MAX - 1);
    }

    #[test]
    fn hybrid_takes_longest_branch() {
        let hybrid = Lifestyle::hybrid(|_| true, Lifestyle::Transient, Lifestyle::Singleton);
        assert_eq!(hybrid.length(), u32::MAX);
        assert!(!hybrid.is_scoped());

        let hybrid = Lifestyle::hybrid(|_| true, Lifestyle::scoped(), Lifestyle::Transient);
        assert_eq!(hybrid.length(), DEFAULT_SCOPED_LENGTH);
        assert!(hybrid.is_scoped());
    }

    #[test]
    fn lifestyle_equality() {
        assert_eq!(Lifestyle::Singleton, Lifestyle::Singleton);
        assert_ne!(Lifestyle::Singleton, Lifestyle::Transient);
        assert_eq!(Lifestyle::scoped(), Lifestyle::scoped());

        let custom: Lifestyle = ScopedLifestyle::new("Scoped").with_length(42).into();
        assert_ne!(custom, Lifestyle::scoped());

        let hybrid = Lifestyle::hybrid(|_| true, Lifestyle::scoped(), Lifestyle::Transient);
        assert_eq!(hybrid, hybrid.clone());
    }

    #[test]
    fn separately_built_hybrids_are_equal() {
        let a = Lifestyle::hybrid(|r| r.scope().is_some(), Lifestyle::scoped(), Lifestyle::Transient);
        let b = Lifestyle::hybrid(|_| false, Lifestyle::scoped(), Lifestyle::Transient);
        assert_eq!(a, b);

        let longer: Lifestyle = ScopedLifestyle::new("Scoped").with_length(600).into();
        let c = Lifestyle::hybrid(|_| true, longer, Lifestyle::Transient);
        assert_ne!(a, c);

        let d = Lifestyle::hybrid(|_| true, Lifestyle::scoped(), Lifestyle::Singleton);
        assert_ne!(a, d);
    }

    #[test]
    fn lifestyle_display() {
        assert_eq!(format!("{}", Lifestyle::Singleton), "Singleton");
        assert_eq!(format!("{}", Lifestyle::Transient), "Transient");
        assert_eq!(format!("{}", Lifestyle::scoped()), "Scoped");
    }
}
