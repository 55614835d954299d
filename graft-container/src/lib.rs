//! Core container implementation for Graft DI.
//!
//! Services are resolved through [`InstanceProducer`]s that build their
//! factories once, cache failures, detect cyclic dependencies per call chain
//! and honor the [`Lifestyle`] of each registration. Scopes own scoped
//! instances and dispose them in reverse creation order; diagnostics
//! analyze the relationship graph of a verified container.

mod activation;
#[cfg(feature = "async")]
pub mod async_scope;
pub mod collection;
pub mod component;
pub mod container;
pub mod decorator;
pub mod diagnostics;
pub mod error;
pub mod graph;
pub mod key;
pub mod lifestyle;
pub mod options;
pub mod producer;
pub mod provider;
pub mod registration;
mod registry;
pub mod scope;

pub use collection::{Collection, Element};
pub use component::{Arguments, Component, Dependency, Disposable, Upcast};
pub use container::{Container, Resolver, VerificationMode, prelude};
pub use error::{GraftError, Result};
pub use key::ServiceKey;
pub use lifestyle::Lifestyle;
pub use options::ContainerOptions;
pub use producer::InstanceProducer;
pub use scope::Scope;
