//! Container configuration.
//!
//! [`ContainerOptions`] is fixed when the container is created. The plain
//! data part derives `serde` so it can be loaded from any configuration
//! format; lifestyles and selectors are code and are skipped.
//!
//! ```
//! use graft_container::options::ContainerOptions;
//!
//! let options = ContainerOptions::default()
//!     .with_overriding_registrations(true)
//!     .with_srp_dependency_threshold(5);
//! assert!(options.allow_overriding_registrations);
//! assert!(options.resolve_unregistered_collections);
//! ```

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::key::ServiceKey;
use crate::lifestyle::Lifestyle;

/// Picks the lifestyle for `register_default::<S, I>()` from the service and
/// implementation keys. Returning `None` is a configuration error.
pub type LifestyleSelector =
    Arc<dyn Fn(&ServiceKey, &ServiceKey) -> Option<Lifestyle> + Send + Sync>;

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerOptions {
    /// Replace existing registrations instead of failing with
    /// `AlreadyRegistered`.
    pub allow_overriding_registrations: bool,

    /// Fail the build of a component whose dependency has a shorter
    /// lifestyle, instead of leaving it to diagnostics.
    pub enforce_lifestyle_compatibility: bool,

    /// Auto-register concrete components declared with
    /// `Dependency::concrete` as transient.
    pub resolve_unregistered_concrete_types: bool,

    /// Resolve never-registered collections as empty.
    pub resolve_unregistered_collections: bool,

    /// Components with more distinct dependencies than this are reported as
    /// possible single-responsibility violations.
    pub srp_dependency_threshold: usize,

    /// Lifestyle used by `register_scoped`. Defaults to `Lifestyle::scoped()`.
    #[serde(skip)]
    pub default_scoped_lifestyle: Option<Lifestyle>,

    /// Lifestyle selection for `register_default`. Transient when unset.
    #[serde(skip)]
    pub lifestyle_selector: Option<LifestyleSelector>,
}

impl ContainerOptions {
    pub fn with_overriding_registrations(mut self, allow: bool) -> Self {
        self.allow_overriding_registrations = allow;
        self
    }

    pub fn with_lifestyle_enforcement(mut self, enforce: bool) -> Self {
        self.enforce_lifestyle_compatibility = enforce;
        self
    }

    pub fn with_unregistered_concrete_types(mut self, resolve: bool) -> Self {
        self.resolve_unregistered_concrete_types = resolve;
        self
    }

    pub fn with_unregistered_collections(mut self, resolve: bool) -> Self {
        self.resolve_unregistered_collections = resolve;
        self
    }

    pub fn with_srp_dependency_threshold(mut self, threshold: usize) -> Self {
        self.srp_dependency_threshold = threshold;
        self
    }

    pub fn with_default_scoped_lifestyle(mut self, lifestyle: Lifestyle) -> Self {
        self.default_scoped_lifestyle = Some(lifestyle);
        self
    }

    pub fn with_lifestyle_selector(
        mut self,
        selector: impl Fn(&ServiceKey, &ServiceKey) -> Option<Lifestyle> + Send + Sync + 'static,
    ) -> Self {
        self.lifestyle_selector = Some(Arc::new(selector));
        self
    }
}

impl Default for ContainerOptions {
    fn default() -> Self {
        Self {
            allow_overriding_registrations: false,
            enforce_lifestyle_compatibility: false,
            resolve_unregistered_concrete_types: true,
            resolve_unregistered_collections: true,
            srp_dependency_threshold: 7,
            default_scoped_lifestyle: None,
            lifestyle_selector: None,
        }
    }
}

impl fmt::Debug for ContainerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerOptions")
            .field("allow_overriding_registrations", &self.allow_overriding_registrations)
            .field("enforce_lifestyle_compatibility", &self.enforce_lifestyle_compatibility)
            .field("resolve_unregistered_concrete_types", &self.resolve_unregistered_concrete_types)
            .field("resolve_unregistered_collections", &self.resolve_unregistered_collections)
            .field("srp_dependency_threshold", &self.srp_dependency_threshold)
            .field("default_scoped_lifestyle", &self.default_scoped_lifestyle)
            .field("lifestyle_selector", &self.lifestyle_selector.is_some())
            .finish()
    }
}
