//! Decorator chains and collections.

use graft_container::error::GraftError;
use graft_container::prelude::*;
use std::sync::Arc;

trait Handler: Send + Sync {
    fn handle(&self) -> String;
}

struct BaseHandler;
impl Handler for BaseHandler {
    fn handle(&self) -> String {
        "base".to_string()
    }
}
impl Component for BaseHandler {
    fn construct(_: &mut Arguments<'_>) -> Result<Self> {
        Ok(BaseHandler)
    }
}
graft_container::implements!(BaseHandler => dyn Handler);

struct AuditHandler;
impl Handler for AuditHandler {
    fn handle(&self) -> String {
        "audit".to_string()
    }
}
impl Component for AuditHandler {
    fn construct(_: &mut Arguments<'_>) -> Result<Self> {
        Ok(AuditHandler)
    }
}
graft_container::implements!(AuditHandler => dyn Handler);

macro_rules! decorator {
    ($name:ident, $label:literal) => {
        struct $name {
            inner: Arc<dyn Handler>,
        }
        impl Handler for $name {
            fn handle(&self) -> String {
                format!("{}({})", $label, self.inner.handle())
            }
        }
        impl Component for $name {
            fn dependencies() -> Vec<Dependency> {
                vec![Dependency::on::<dyn Handler>("inner")]
            }
            fn construct(args: &mut Arguments<'_>) -> Result<Self> {
                Ok($name { inner: args.get()? })
            }
        }
        graft_container::implements!($name => dyn Handler);
    };
}

decorator!(LoggingHandler, "logging");
decorator!(RetryHandler, "retry");
decorator!(TimingHandler, "timing");

#[test]
fn last_registered_decorator_is_outermost() {
    let container = Container::new();
    container.register_transient::<dyn Handler, BaseHandler>().unwrap();
    container
        .register_decorator::<dyn Handler, LoggingHandler>(Lifestyle::Transient)
        .unwrap();
    container
        .register_decorator::<dyn Handler, RetryHandler>(Lifestyle::Transient)
        .unwrap();

    let handler = container.get_instance::<dyn Handler>().unwrap();
    assert_eq!(handler.handle(), "retry(logging(base))");
}

#[test]
fn predicate_sees_decorators_already_applied() {
    let container = Container::new();
    container.register_transient::<dyn Handler, BaseHandler>().unwrap();
    container
        .register_decorator::<dyn Handler, LoggingHandler>(Lifestyle::Transient)
        .unwrap();
    container
        .register_decorator_if::<dyn Handler, RetryHandler>(Lifestyle::Transient, |ctx| {
            !ctx.is_applied::<LoggingHandler>()
        })
        .unwrap();
    container
        .register_decorator_if::<dyn Handler, TimingHandler>(Lifestyle::Transient, |ctx| {
            ctx.implementation().is::<BaseHandler>() && ctx.applied_decorators().len() == 1
        })
        .unwrap();

    let handler = container.get_instance::<dyn Handler>().unwrap();
    assert_eq!(handler.handle(), "timing(logging(base))");
}

#[test]
fn decorator_without_decoratee_dependency_is_rejected() {
    let container = Container::new();
    let err = container
        .register_decorator::<dyn Handler, AuditHandler>(Lifestyle::Transient)
        .unwrap_err();
    assert!(matches!(err, GraftError::InvalidRegistration { .. }));
}

#[test]
fn singleton_decorator_wraps_once() {
    let container = Container::new();
    container.register_transient::<dyn Handler, BaseHandler>().unwrap();
    container
        .register_decorator::<dyn Handler, LoggingHandler>(Lifestyle::Singleton)
        .unwrap();

    let a = container.get_instance::<dyn Handler>().unwrap();
    let b = container.get_instance::<dyn Handler>().unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(a.handle(), "logging(base)");
}

// ═══════════════════════════════════════════
// Collections
// ═══════════════════════════════════════════

#[test]
fn collection_elements_are_decorated() {
    let container = Container::new();
    container
        .register_collection::<dyn Handler>(vec![
            Element::of::<BaseHandler>(Lifestyle::Transient),
            Element::of::<AuditHandler>(Lifestyle::Singleton),
        ])
        .unwrap();
    container
        .register_decorator::<dyn Handler, LoggingHandler>(Lifestyle::Transient)
        .unwrap();

    let handlers = container.get_all_instances::<dyn Handler>().unwrap();
    let names: Vec<String> = handlers
        .iter()
        .map(|handler| handler.map(|h| h.handle()))
        .collect::<Result<_>>()
        .unwrap();
    assert_eq!(names, vec!["logging(base)", "logging(audit)"]);
}

#[test]
fn collections_honor_element_lifestyles() {
    let container = Container::new();
    container
        .append_to_collection::<dyn Handler, BaseHandler>(Lifestyle::Transient)
        .unwrap();
    container
        .append_to_collection::<dyn Handler, AuditHandler>(Lifestyle::Singleton)
        .unwrap();

    let first = container.get_all_instances::<dyn Handler>().unwrap().to_vec().unwrap();
    let second = container.get_all_instances::<dyn Handler>().unwrap().to_vec().unwrap();

    assert_eq!(first.len(), 2);
    assert!(!Arc::ptr_eq(&first[0], &second[0]));
    assert!(Arc::ptr_eq(&first[1], &second[1]));
}

#[test]
fn unregistered_collection_resolves_empty() {
    let container = Container::new();
    let handlers = container.get_all_instances::<dyn Handler>().unwrap();
    assert!(handlers.is_empty());
}

#[test]
fn unregistered_collection_fails_when_disabled() {
    let container =
        Container::with_options(ContainerOptions::default().with_unregistered_collections(false));
    let err = container.get_all_instances::<dyn Handler>().unwrap_err();
    assert!(matches!(err, GraftError::NotRegistered(_)));
}

struct Dispatcher {
    handlers: Arc<Collection<dyn Handler>>,
}
impl Component for Dispatcher {
    fn dependencies() -> Vec<Dependency> {
        vec![Dependency::collection::<dyn Handler>("handlers")]
    }
    fn construct(args: &mut Arguments<'_>) -> Result<Self> {
        Ok(Dispatcher {
            handlers: args.get()?,
        })
    }
}

#[test]
fn components_receive_collections() {
    let container = Container::new();
    container.register_transient::<Dispatcher, Dispatcher>().unwrap();
    container
        .append_to_collection::<dyn Handler, BaseHandler>(Lifestyle::Transient)
        .unwrap();

    let dispatcher = container.get_instance::<Dispatcher>().unwrap();
    assert_eq!(dispatcher.handlers.len(), 1);
    assert_eq!(
        dispatcher.handlers.get(0).unwrap().unwrap().handle(),
        "base"
    );
    assert!(dispatcher.handlers.get(1).is_none());
}
