//! Provider trait: a module of related registrations.
//!
//! Providers group the registrations of one area of an application so
//! startup code stays a list of modules instead of one long block.
//!
//! # Examples
//! ```rust
//! use graft_container::prelude::*;
//!
//! struct Database;
//! impl Component for Database {
//!     fn construct(_: &mut Arguments<'_>) -> Result<Self> {
//!         Ok(Database)
//!     }
//! }
//!
//! struct DatabaseProvider;
//!
//! impl Provider for DatabaseProvider {
//!     fn register(&self, container: &Container) -> Result<()> {
//!         container.register_singleton::<Database, Database>()
//!     }
//! }
//!
//! let container = Container::new();
//! container.add_provider(&DatabaseProvider).unwrap();
//! assert!(container.get_instance::<Database>().is_ok());
//! ```

use crate::container::Container;
use crate::error::Result;

/// A module that registers related services into a container.
pub trait Provider: Send + Sync {
    /// Registers this module's services.
    ///
    /// # Errors
    /// Whatever the registration calls return, typically
    /// `AlreadyRegistered` or `ContainerLocked`.
    fn register(&self, container: &Container) -> Result<()>;

    /// Human-readable name for logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}
