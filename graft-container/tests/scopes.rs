//! Scope behavior: disposal order, ambient scope managers, end-of-scope
//! callbacks and container disposal.

use graft_container::error::GraftError;
use graft_container::prelude::*;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

// ═══════════════════════════════════════════
// Disposal order within a scope
// ═══════════════════════════════════════════

static CHAIN_LOG: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());

struct Prop;
impl Component for Prop {
    fn construct(_: &mut Arguments<'_>) -> Result<Self> {
        Ok(Prop)
    }
    fn disposer() -> Option<fn(&Self)> {
        Some(|_| CHAIN_LOG.lock().push("prop"))
    }
}

struct Inner {
    prop: OnceCell<Arc<Prop>>,
}
impl Component for Inner {
    fn construct(_: &mut Arguments<'_>) -> Result<Self> {
        Ok(Inner {
            prop: OnceCell::new(),
        })
    }
    fn disposer() -> Option<fn(&Self)> {
        Some(|_| CHAIN_LOG.lock().push("inner"))
    }
}

struct Middle {
    _inner: Arc<Inner>,
}
impl Component for Middle {
    fn dependencies() -> Vec<Dependency> {
        vec![Dependency::on::<Inner>("inner")]
    }
    fn construct(args: &mut Arguments<'_>) -> Result<Self> {
        Ok(Middle { _inner: args.get()? })
    }
    fn disposer() -> Option<fn(&Self)> {
        Some(|_| CHAIN_LOG.lock().push("middle"))
    }
}

struct Outer {
    _middle: Arc<Middle>,
}
impl Component for Outer {
    fn dependencies() -> Vec<Dependency> {
        vec![Dependency::on::<Middle>("middle")]
    }
    fn construct(args: &mut Arguments<'_>) -> Result<Self> {
        Ok(Outer { _middle: args.get()? })
    }
    fn disposer() -> Option<fn(&Self)> {
        Some(|_| CHAIN_LOG.lock().push("outer"))
    }
}

#[test]
fn scoped_instances_are_disposed_in_reverse_creation_order() {
    let container = Container::new();
    container.register_scoped::<Outer, Outer>().unwrap();
    container.register_scoped::<Middle, Middle>().unwrap();
    container.register_scoped::<Inner, Inner>().unwrap();
    container.register_scoped::<Prop, Prop>().unwrap();
    container
        .register_initializer::<Inner>(|inner, r| {
            let prop = r.resolve::<Prop>()?;
            let _ = inner.prop.set(prop);
            Ok(())
        })
        .unwrap();

    let scope = container.begin_scope();
    let outer = scope.get_instance::<Outer>().unwrap();
    let inner = scope.get_instance::<Inner>().unwrap();
    assert!(inner.prop.get().is_some());
    drop((outer, inner));

    scope.dispose();
    assert_eq!(*CHAIN_LOG.lock(), vec!["outer", "middle", "inner", "prop"]);
}

// ═══════════════════════════════════════════
// Scope lifetime
// ═══════════════════════════════════════════

#[derive(Debug)]
struct Session;
impl Component for Session {
    fn construct(_: &mut Arguments<'_>) -> Result<Self> {
        Ok(Session)
    }
}

#[test]
fn scoped_service_outside_scope_fails() {
    let container = Container::new();
    container.register_scoped::<Session, Session>().unwrap();

    let err = container.get_instance::<Session>().unwrap_err();
    assert!(matches!(err, GraftError::ScopeRequired { .. }));
    assert!(err.to_string().contains("outside the context of an active scope"));
}

#[test]
fn disposed_scope_refuses_resolution() {
    let container = Container::new();
    container.register_scoped::<Session, Session>().unwrap();

    let scope = container.begin_scope();
    scope.get_instance::<Session>().unwrap();
    scope.dispose();

    let err = scope.get_instance::<Session>().unwrap_err();
    assert!(matches!(err, GraftError::ScopeDisposed { .. }));
}

#[test]
fn scopes_cache_per_scope() {
    let container = Container::new();
    container.register_scoped::<Session, Session>().unwrap();

    let first = container.begin_scope();
    let second = container.begin_scope();

    let a = first.get_instance::<Session>().unwrap();
    let b = first.get_instance::<Session>().unwrap();
    let c = second.get_instance::<Session>().unwrap();

    assert!(Arc::ptr_eq(&a, &b));
    assert!(!Arc::ptr_eq(&a, &c));
}

#[test]
fn end_actions_run_before_disposers() {
    static LOG: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());

    let container = Container::new();
    let scope = container.begin_scope();
    scope.register_disposer(|| LOG.lock().push("disposer")).unwrap();
    scope.when_scope_ends(|| LOG.lock().push("first action")).unwrap();
    scope.when_scope_ends(|| LOG.lock().push("second action")).unwrap();

    scope.dispose();
    assert_eq!(*LOG.lock(), vec!["first action", "second action", "disposer"]);

    // Second dispose is a no-op
    scope.dispose();
    assert_eq!(LOG.lock().len(), 3);
}

#[test]
fn panicking_disposer_does_not_skip_others() {
    static LOG: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());

    let container = Container::new();
    let scope = container.begin_scope();
    scope.register_disposer(|| LOG.lock().push("first")).unwrap();
    scope.register_disposer(|| panic!("disposer failed")).unwrap();
    scope.register_disposer(|| LOG.lock().push("last")).unwrap();

    let outcome = catch_unwind(AssertUnwindSafe(|| scope.dispose()));
    assert!(outcome.is_err());
    assert_eq!(*LOG.lock(), vec!["last", "first"]);
    assert!(scope.is_disposed());
}

struct Connection {
    label: &'static str,
}
impl Component for Connection {
    fn construct(_: &mut Arguments<'_>) -> Result<Self> {
        Ok(Connection { label: "unset" })
    }
}

#[test]
fn disposing_nested_scope_leaves_outer_instances_alone() {
    static LOG: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());

    let container = Container::new();
    container
        .register_factory::<Connection>(Lifestyle::scoped(), |r| {
            let label = if r.scope().is_some_and(|scope| scope.parent().is_some()) {
                "nested"
            } else {
                "outer"
            };
            Ok(Arc::new(Connection { label }))
        })
        .unwrap();

    let outer = container.begin_scope();
    let outer_connection = outer.get_instance::<Connection>().unwrap();
    outer
        .register_disposer(|| LOG.lock().push("outer"))
        .unwrap();

    let nested = outer.begin_nested_scope().unwrap();
    assert_eq!(nested.parent(), Some(&outer));
    let nested_connection = nested.get_instance::<Connection>().unwrap();
    nested
        .register_disposer(|| LOG.lock().push("nested"))
        .unwrap();
    assert_eq!(nested_connection.label, "nested");
    assert!(!Arc::ptr_eq(&outer_connection, &nested_connection));

    nested.dispose();
    assert_eq!(*LOG.lock(), vec!["nested"]);
    assert!(!outer.is_disposed());

    let again = outer.get_instance::<Connection>().unwrap();
    assert!(Arc::ptr_eq(&outer_connection, &again));
    assert_eq!(again.label, "outer");

    outer.dispose();
    assert_eq!(*LOG.lock(), vec!["nested", "outer"]);
}

// ═══════════════════════════════════════════
// Thread-ambient scopes
// ═══════════════════════════════════════════

#[test]
fn nested_thread_scopes_restore_nearest_live_ancestor() {
    let scopes = ThreadScopeManager::new();
    let container = Container::new();
    container.register::<Session, Session>(scopes.lifestyle()).unwrap();

    let outer = scopes.begin_scope(&container);
    let outer_session = container.get_instance::<Session>().unwrap();

    let middle = scopes.begin_scope(&container);
    let inner = scopes.begin_scope(&container);
    assert_eq!(inner.parent(), Some(&middle));
    assert_eq!(middle.parent(), Some(&outer));

    let inner_session = container.get_instance::<Session>().unwrap();
    assert!(!Arc::ptr_eq(&outer_session, &inner_session));

    // Out of order: the current scope stays the live innermost one
    middle.dispose();
    assert_eq!(scopes.current_scope(), Some(inner.clone()));

    inner.dispose();
    assert_eq!(scopes.current_scope(), Some(outer.clone()));
    let again = container.get_instance::<Session>().unwrap();
    assert!(Arc::ptr_eq(&outer_session, &again));

    outer.dispose();
    assert!(scopes.current_scope().is_none());
}

#[test]
fn thread_scopes_are_per_thread() {
    let scopes = ThreadScopeManager::new();
    let container = Container::new();
    container.register::<Session, Session>(scopes.lifestyle()).unwrap();

    let scope = scopes.begin_scope(&container);
    container.get_instance::<Session>().unwrap();

    let other = {
        let container = container.clone();
        std::thread::spawn(move || container.get_instance::<Session>().map(|_| ()))
    };
    assert!(matches!(
        other.join().unwrap(),
        Err(GraftError::ScopeRequired { .. })
    ));

    scope.dispose();
}

#[test]
fn scope_disposed_on_another_thread_restores_parent() {
    static LOG: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());

    let scopes = ThreadScopeManager::new();
    let container = Container::new();
    container.register::<Session, Session>(scopes.lifestyle()).unwrap();

    let outer = scopes.begin_scope(&container);
    let outer_session = container.get_instance::<Session>().unwrap();

    let inner = scopes.begin_scope(&container);
    container.get_instance::<Session>().unwrap();
    inner.register_disposer(|| LOG.lock().push("inner")).unwrap();

    let worker = {
        let inner = inner.clone();
        std::thread::spawn(move || inner.dispose())
    };
    worker.join().unwrap();

    assert!(inner.is_disposed());
    assert_eq!(*LOG.lock(), vec!["inner"]);
    assert_eq!(scopes.current_scope(), Some(outer.clone()));

    let again = container.get_instance::<Session>().unwrap();
    assert!(Arc::ptr_eq(&outer_session, &again));

    outer.dispose();
    assert!(scopes.current_scope().is_none());
}

trait Plugin: Send + Sync {}

struct RequestPlugin;
impl Plugin for RequestPlugin {}
impl Component for RequestPlugin {
    fn construct(_: &mut Arguments<'_>) -> Result<Self> {
        Ok(RequestPlugin)
    }
}
graft_container::implements!(RequestPlugin => dyn Plugin);

struct PluginHost {
    plugins: Arc<Collection<dyn Plugin>>,
}
impl Component for PluginHost {
    fn dependencies() -> Vec<Dependency> {
        vec![Dependency::collection::<dyn Plugin>("plugins")]
    }
    fn construct(args: &mut Arguments<'_>) -> Result<Self> {
        Ok(PluginHost {
            plugins: args.get()?,
        })
    }
}

#[test]
fn singleton_collection_follows_current_scope_after_first_scope_ends() {
    let scopes = ThreadScopeManager::new();
    let container = Container::new();
    container.register_singleton::<PluginHost, PluginHost>().unwrap();
    container
        .append_to_collection::<dyn Plugin, RequestPlugin>(scopes.lifestyle())
        .unwrap();

    let first = scopes.begin_scope(&container);
    let host = first.get_instance::<PluginHost>().unwrap();
    let from_first = host.plugins.to_vec().unwrap();
    first.dispose();

    let second = scopes.begin_scope(&container);
    let again = second.get_instance::<PluginHost>().unwrap();
    assert!(Arc::ptr_eq(&host, &again));

    let from_second = again.plugins.to_vec().unwrap();
    let direct = second.get_all_instances::<dyn Plugin>().unwrap().to_vec().unwrap();
    assert!(!Arc::ptr_eq(&from_first[0], &from_second[0]));
    assert!(Arc::ptr_eq(&from_second[0], &direct[0]));

    second.dispose();
}

// ═══════════════════════════════════════════
// Container disposal
// ═══════════════════════════════════════════

static SINGLETON_LOG: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());

#[derive(Debug)]
struct Pool;
impl Component for Pool {
    fn construct(_: &mut Arguments<'_>) -> Result<Self> {
        Ok(Pool)
    }
    fn disposer() -> Option<fn(&Self)> {
        Some(|_| SINGLETON_LOG.lock().push("pool"))
    }
}

struct Repository {
    _pool: Arc<Pool>,
}
impl Component for Repository {
    fn dependencies() -> Vec<Dependency> {
        vec![Dependency::on::<Pool>("pool")]
    }
    fn construct(args: &mut Arguments<'_>) -> Result<Self> {
        Ok(Repository { _pool: args.get()? })
    }
    fn disposer() -> Option<fn(&Self)> {
        Some(|_| SINGLETON_LOG.lock().push("repository"))
    }
}

#[test]
fn container_disposes_singletons_in_reverse_order() {
    let container = Container::new();
    container.register_singleton::<Pool, Pool>().unwrap();
    container.register_singleton::<Repository, Repository>().unwrap();

    container.get_instance::<Repository>().unwrap();
    container.dispose();

    assert_eq!(*SINGLETON_LOG.lock(), vec!["repository", "pool"]);
    assert!(container.is_disposed());

    let err = container.get_instance::<Pool>().unwrap_err();
    assert!(matches!(err, GraftError::ContainerDisposed { .. }));
}

#[test]
fn scope_outliving_container_reports_disposal() {
    let scope = {
        let container = Container::new();
        container.register_scoped::<Session, Session>().unwrap();
        container.begin_scope()
    };

    let err = scope.get_instance::<Session>().unwrap_err();
    assert!(matches!(err, GraftError::ContainerDisposed { .. }));
}
