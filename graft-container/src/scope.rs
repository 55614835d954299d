//! Scopes: disposal boundaries for scoped instances.
//!
//! A [`Scope`] caches one instance per scoped registration and owns the
//! cleanup of everything created in it. Disposal runs the
//! [`when_scope_ends`](Scope::when_scope_ends) callbacks first, in
//! registration order, then disposes instances in reverse order of
//! registration. A component registers its disposer only after its
//! constructor returned, so it is always disposed before the dependencies
//! it was built from.
//!
//! Scopes are passed explicitly by default. An [`AmbientScope`] carrier,
//! such as [`ThreadScopeManager`], lets scoped lifestyles find "the current
//! scope" when a request carries none.
//!
//! # Examples
//! ```
//! use graft_container::prelude::*;
//!
//! struct UnitOfWork;
//! impl Component for UnitOfWork {
//!     fn construct(_: &mut Arguments<'_>) -> Result<Self> {
//!         Ok(UnitOfWork)
//!     }
//! }
//!
//! let container = Container::new();
//! container.register_scoped::<UnitOfWork, UnitOfWork>().unwrap();
//!
//! let scope = container.begin_scope();
//! let a = scope.get_instance::<UnitOfWork>().unwrap();
//! let b = scope.get_instance::<UnitOfWork>().unwrap();
//! assert!(std::sync::Arc::ptr_eq(&a, &b));
//! scope.dispose();
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use tracing::{debug, instrument, trace, warn};

use crate::collection::Collection;
use crate::component::Disposable;
use crate::container::{Container, ContainerInner, Resolver};
use crate::error::{GraftError, Result};
use crate::key::ServiceKey;
use crate::lifestyle::{Lifestyle, ScopedLifestyle, THREAD_SCOPED_LENGTH};
use crate::registration::{Created, Disposer, Instance, next_id};

#[derive(Default)]
struct ScopeState {
    /// Scoped instances keyed by registration id
    instances: HashMap<u64, Instance>,
    disposables: Vec<Disposer>,
    end_actions: Vec<Disposer>,
}

struct ScopeInner {
    id: u64,
    container_id: u64,
    container: Weak<ContainerInner>,
    parent: Option<Scope>,
    state: Mutex<ScopeState>,
    disposing: AtomicBool,
    disposed: AtomicBool,
    ambient: Option<Weak<dyn AmbientScope>>,
}

/// A disposal boundary. Cheap to clone; clones share the same scope.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

impl Scope {
    pub(crate) fn new(
        container_id: u64,
        container: Weak<ContainerInner>,
        parent: Option<Scope>,
        ambient: Option<Weak<dyn AmbientScope>>,
    ) -> Self {
        let id = next_id();
        debug!(scope = id, parent = ?parent.as_ref().map(Scope::id), "Scope created");
        Self {
            inner: Arc::new(ScopeInner {
                id,
                container_id,
                container,
                parent,
                state: Mutex::new(ScopeState::default()),
                disposing: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
                ambient,
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Id of the container this scope belongs to.
    pub fn container_id(&self) -> u64 {
        self.inner.container_id
    }

    pub fn parent(&self) -> Option<&Scope> {
        self.inner.parent.as_ref()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Resolves `S` with this scope as the active scope.
    ///
    /// # Errors
    /// [`GraftError::ScopeDisposed`] once the scope was disposed, plus every
    /// error [`Container::get_instance`] can return.
    pub fn get_instance<S: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<S>> {
        let key = ServiceKey::of::<S>();
        let container = self.live_container(&key)?;
        Resolver::new(&container, Some(self)).resolve::<S>()
    }

    pub fn get_named_instance<S: ?Sized + Send + Sync + 'static>(
        &self,
        name: &'static str,
    ) -> Result<Arc<S>> {
        let key = ServiceKey::named::<S>(name);
        let container = self.live_container(&key)?;
        Resolver::new(&container, Some(self)).resolve_named::<S>(name)
    }

    pub fn get_all_instances<S: ?Sized + Send + Sync + 'static>(&self) -> Result<Collection<S>> {
        let key = ServiceKey::of::<Collection<S>>();
        let container = self.live_container(&key)?;
        Resolver::new(&container, Some(self)).resolve_all::<S>()
    }

    /// Starts a child scope. Disposing the child never touches instances
    /// owned by this scope.
    pub fn begin_nested_scope(&self) -> Result<Scope> {
        let container = self.live_container(&ServiceKey::of::<Scope>())?;
        Ok(container.create_scope(Some(self.clone()), None))
    }

    /// Disposes `instance` when this scope ends.
    pub fn register_for_disposal(&self, instance: Arc<dyn Disposable>) -> Result<()> {
        self.register_disposer(move || instance.dispose())
    }

    /// Runs `disposer` when this scope ends, after the end-of-scope
    /// callbacks and before anything registered earlier.
    pub fn register_disposer(&self, disposer: impl FnOnce() + Send + 'static) -> Result<()> {
        let mut state = self.inner.state.lock();
        if self.is_disposed() {
            return Err(self.disposed_error());
        }
        state.disposables.push(Box::new(disposer));
        Ok(())
    }

    /// Runs `action` when this scope ends, before any instance is disposed.
    pub fn when_scope_ends(&self, action: impl FnOnce() + Send + 'static) -> Result<()> {
        let mut state = self.inner.state.lock();
        if self.is_disposed() {
            return Err(self.disposed_error());
        }
        state.end_actions.push(Box::new(action));
        Ok(())
    }

    /// Ends the scope.
    ///
    /// Runs end-of-scope callbacks (FIFO), then disposers (LIFO). A panicking
    /// callback or disposer does not stop the others; the first panic is
    /// resumed once everything ran. Safe to call from any thread and more
    /// than once.
    #[instrument(skip(self), fields(scope = self.inner.id))]
    pub fn dispose(&self) {
        if self.inner.disposing.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut first_panic: Option<Box<dyn Any + Send>> = None;

        // Callbacks may resolve more scoped instances or add callbacks.
        loop {
            let actions = std::mem::take(&mut self.inner.state.lock().end_actions);
            if actions.is_empty() {
                break;
            }
            for action in actions {
                run_guarded(action, &mut first_panic);
            }
        }

        let (disposables, instances) = {
            let mut state = self.inner.state.lock();
            self.inner.disposed.store(true, Ordering::Release);
            (
                std::mem::take(&mut state.disposables),
                std::mem::take(&mut state.instances),
            )
        };

        let count = disposables.len();
        for disposer in disposables.into_iter().rev() {
            run_guarded(disposer, &mut first_panic);
        }
        drop(instances);

        if let Some(ambient) = self.inner.ambient.as_ref().and_then(Weak::upgrade) {
            ambient.scope_disposed(self);
        }

        debug!(disposed = count, "Scope disposed");

        if let Some(payload) = first_panic {
            resume_unwind(payload);
        }
    }

    /// Returns the cached instance for a registration, or creates and caches
    /// it. Creation runs without holding the scope lock; if two callers race,
    /// the first to insert wins and the loser's instance is disposed.
    pub(crate) fn get_or_create(
        &self,
        registration_id: u64,
        key: &ServiceKey,
        create: impl FnOnce() -> Result<Created>,
    ) -> Result<Instance> {
        {
            let state = self.inner.state.lock();
            if self.is_disposed() {
                return Err(GraftError::ScopeDisposed { key: key.clone() });
            }
            if let Some(instance) = state.instances.get(&registration_id) {
                trace!(scope = self.inner.id, key = %key, "Scoped cache hit");
                return Ok(instance.clone());
            }
        }

        let created = create()?;

        let mut state = self.inner.state.lock();
        if self.is_disposed() {
            drop(state);
            if let Some(disposer) = created.disposer {
                disposer();
            }
            return Err(GraftError::ScopeDisposed { key: key.clone() });
        }

        match state.instances.entry(registration_id) {
            Entry::Occupied(existing) => {
                let winner = existing.get().clone();
                drop(state);
                if let Some(disposer) = created.disposer {
                    disposer();
                }
                Ok(winner)
            }
            Entry::Vacant(slot) => {
                slot.insert(created.instance.clone());
                if let Some(disposer) = created.disposer {
                    state.disposables.push(disposer);
                }
                Ok(created.instance)
            }
        }
    }

    /// Adds a disposer, silently running it right away if the scope is
    /// already gone.
    pub(crate) fn push_disposer(&self, disposer: Disposer) {
        let mut state = self.inner.state.lock();
        if self.is_disposed() {
            drop(state);
            disposer();
            return;
        }
        state.disposables.push(disposer);
    }

    fn live_container(&self, key: &ServiceKey) -> Result<Container> {
        if self.is_disposed() {
            return Err(GraftError::ScopeDisposed { key: key.clone() });
        }
        self.inner
            .container
            .upgrade()
            .map(Container::from_inner)
            .ok_or_else(|| GraftError::ContainerDisposed { key: key.clone() })
    }

    fn disposed_error(&self) -> GraftError {
        GraftError::ScopeDisposed {
            key: ServiceKey::of::<Scope>(),
        }
    }
}

impl PartialEq for Scope {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Scope {}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.inner.id)
            .field("container", &self.inner.container_id)
            .field("parent", &self.parent().map(Scope::id))
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

fn run_guarded(action: Disposer, first_panic: &mut Option<Box<dyn Any + Send>>) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(action)) {
        warn!("Disposer panicked; continuing with remaining disposers");
        first_panic.get_or_insert(payload);
    }
}

/// The nearest scope, starting at `scope` itself, that is not disposed.
pub fn nearest_live(scope: &Scope) -> Option<Scope> {
    let mut candidate = Some(scope);
    while let Some(scope) = candidate {
        if !scope.is_disposed() {
            return Some(scope.clone());
        }
        candidate = scope.parent();
    }
    None
}

// ═══════════════════════════════════════════
// Ambient scopes
// ═══════════════════════════════════════════

/// Carrier of "the current scope" for scoped lifestyles used without an
/// explicit scope.
pub trait AmbientScope: Send + Sync {
    fn current_scope(&self) -> Option<Scope>;

    fn set_current_scope(&self, scope: Option<Scope>);

    /// Called after a scope that was begun through this carrier was
    /// disposed. The default moves "current" to the nearest live ancestor
    /// when the current scope is gone.
    fn scope_disposed(&self, _scope: &Scope) {
        if let Some(current) = self.current_scope() {
            if current.is_disposed() {
                self.set_current_scope(nearest_live(&current));
            }
        }
    }
}

/// Tracks one current scope per thread.
///
/// # Examples
/// ```
/// use graft_container::prelude::*;
///
/// struct Session;
/// impl Component for Session {
///     fn construct(_: &mut Arguments<'_>) -> Result<Self> {
///         Ok(Session)
///     }
/// }
///
/// let scopes = ThreadScopeManager::new();
/// let container = Container::new();
/// container.register::<Session, Session>(scopes.lifestyle()).unwrap();
///
/// let scope = scopes.begin_scope(&container);
/// let a = container.get_instance::<Session>().unwrap();
/// let b = container.get_instance::<Session>().unwrap();
/// assert!(std::sync::Arc::ptr_eq(&a, &b));
///
/// scope.dispose();
/// assert!(scopes.current_scope().is_none());
/// ```
#[derive(Default)]
pub struct ThreadScopeManager {
    scopes: Mutex<HashMap<ThreadId, Scope>>,
}

impl ThreadScopeManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A scoped lifestyle that finds its scope through this manager.
    pub fn lifestyle(self: &Arc<Self>) -> Lifestyle {
        Lifestyle::Scoped(
            ScopedLifestyle::new("Thread Scoped")
                .with_length(THREAD_SCOPED_LENGTH)
                .with_ambient(self.clone()),
        )
    }

    /// Starts a scope on the calling thread, nested in the thread's current
    /// scope, and makes it current.
    pub fn begin_scope(self: &Arc<Self>, container: &Container) -> Scope {
        let parent = self
            .current_scope()
            .filter(|scope| scope.container_id() == container.id());
        let ambient: Arc<dyn AmbientScope> = self.clone();
        let scope = container.create_scope(parent, Some(Arc::downgrade(&ambient)));
        self.set_current_scope(Some(scope.clone()));
        scope
    }
}

impl AmbientScope for ThreadScopeManager {
    fn current_scope(&self) -> Option<Scope> {
        self.scopes.lock().get(&thread::current().id()).cloned()
    }

    fn set_current_scope(&self, scope: Option<Scope>) {
        let thread = thread::current().id();
        let mut scopes = self.scopes.lock();
        match scope {
            Some(scope) => {
                scopes.insert(thread, scope);
            }
            None => {
                scopes.remove(&thread);
            }
        }
    }

    /// Scopes may be disposed from any thread, so every thread's entry is
    /// checked, not only the caller's.
    fn scope_disposed(&self, _scope: &Scope) {
        self.scopes.lock().retain(|_, current| {
            if !current.is_disposed() {
                return true;
            }
            match nearest_live(current) {
                Some(live) => {
                    *current = live;
                    true
                }
                None => false,
            }
        });
    }
}

impl fmt::Debug for ThreadScopeManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadScopeManager")
            .field("threads", &self.scopes.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn detached() -> Scope {
        Scope::new(0, Weak::new(), None, None)
    }

    #[test]
    fn disposal_runs_in_reverse_registration_order() {
        let scope = detached();
        let log = Arc::new(Mutex::new(Vec::new()));

        for name in ["first", "second", "third"] {
            let log = log.clone();
            scope.register_disposer(move || log.lock().push(name)).unwrap();
        }

        scope.dispose();
        assert_eq!(*log.lock(), vec!["third", "second", "first"]);
        assert!(scope.is_disposed());
    }

    #[test]
    fn end_actions_run_before_disposers() {
        let scope = detached();
        let log = Arc::new(Mutex::new(Vec::new()));

        {
            let log = log.clone();
            scope.register_disposer(move || log.lock().push("disposed")).unwrap();
        }
        {
            let log = log.clone();
            scope.when_scope_ends(move || log.lock().push("ended")).unwrap();
        }

        scope.dispose();
        assert_eq!(*log.lock(), vec!["ended", "disposed"]);
    }

    #[test]
    fn dispose_is_idempotent() {
        let scope = detached();
        let calls = Arc::new(AtomicUsize::new(0));
        {
            let calls = calls.clone();
            scope
                .register_disposer(move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }

        scope.dispose();
        scope.dispose();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn registering_after_dispose_fails() {
        let scope = detached();
        scope.dispose();

        assert!(matches!(
            scope.register_disposer(|| {}),
            Err(GraftError::ScopeDisposed { .. })
        ));
        assert!(scope.when_scope_ends(|| {}).is_err());
    }

    #[test]
    fn get_or_create_caches_per_registration() {
        let scope = detached();
        let key = ServiceKey::of::<u32>();
        let created = AtomicUsize::new(0);

        let make = || {
            created.fetch_add(1, Ordering::SeqCst);
            Ok(Created {
                instance: Arc::new(Arc::new(7u32)) as Instance,
                disposer: None,
            })
        };

        let a = scope.get_or_create(1, &key, make).unwrap();
        let b = scope.get_or_create(1, &key, make).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(created.load(Ordering::SeqCst), 1);

        scope.get_or_create(2, &key, make).unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn get_or_create_fails_after_dispose() {
        let scope = detached();
        scope.dispose();

        let result = scope.get_or_create(1, &ServiceKey::of::<u32>(), || {
            Ok(Created {
                instance: Arc::new(Arc::new(1u32)) as Instance,
                disposer: None,
            })
        });
        assert!(matches!(result, Err(GraftError::ScopeDisposed { .. })));
    }

    #[test]
    fn nearest_live_skips_disposed_ancestors() {
        let outer = detached();
        let middle = Scope::new(0, Weak::new(), Some(outer.clone()), None);
        let inner = Scope::new(0, Weak::new(), Some(middle.clone()), None);

        middle.dispose();
        assert_eq!(nearest_live(&inner), Some(inner.clone()));

        inner.dispose();
        assert_eq!(nearest_live(&inner), Some(outer.clone()));

        outer.dispose();
        assert_eq!(nearest_live(&inner), None);
    }
}
