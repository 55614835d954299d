//! # Graft: a dependency injection container for Rust
//!
//! Lifestyles, scopes, decorators, collections and configuration
//! diagnostics over explicit, compile-time component wiring.
//!
//! ```rust
//! use graft::prelude::*;
//!
//! struct Clock;
//! impl Component for Clock {
//!     fn construct(_: &mut Arguments<'_>) -> Result<Self> {
//!         Ok(Clock)
//!     }
//! }
//!
//! let container = Container::new();
//! container.register_singleton::<Clock, Clock>().unwrap();
//! container.verify(VerificationMode::Build).unwrap();
//! ```

pub use graft_container::*;
pub use graft_support::*;
