//! Error types for Graft container operations.
//!
//! Every error names the exact types involved. Errors are `Clone` because a
//! failed build is cached by its producer and handed out again, unchanged,
//! to every later caller.

use std::fmt;
use std::sync::Arc;

use graft_support::rendering::{is_primitive_type_name, render_chain};

use crate::key::ServiceKey;

/// Main error type for all Graft operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GraftError {
    /// Requested service was never registered and could not be resolved
    /// as an unregistered type.
    #[error("{}", .0)]
    NotRegistered(NotRegisteredError),

    /// A component depends on itself, directly or through other components.
    #[error("{}", .0)]
    CyclicDependency(CyclicDependencyError),

    /// A longer-lived component depends on a shorter-lived one and lifestyle
    /// compatibility is enforced.
    #[error("{}", .0)]
    LifestyleMismatch(LifestyleMismatchError),

    /// Service was already registered and overriding is disabled.
    #[error("{}", .0)]
    AlreadyRegistered(AlreadyRegisteredError),

    /// A constructor asked its arguments for something it did not declare.
    #[error("{}", .0)]
    ArgumentMismatch(ArgumentMismatchError),

    /// One or more registrations failed verification.
    #[error("{}", .0)]
    Verification(VerificationError),

    /// Verification succeeded but diagnostics reported warnings.
    #[error("{}", .0)]
    Diagnostics(DiagnosticsError),

    /// The container was used to resolve and can no longer be changed.
    #[error(
        "The container can't be changed after the first call to get_instance, get_all_instances, \
         get_registration or verify. Attempted to {action}."
    )]
    ContainerLocked { action: String },

    /// A factory delegate returned an error while creating an instance.
    #[error("Failed to construct {key}: {source}")]
    ActivationFailed {
        key: ServiceKey,
        #[source]
        source: Arc<dyn std::error::Error + Send + Sync>,
    },

    /// A scoped service was requested without an active scope.
    #[error(
        "{key} is registered with the '{lifestyle}' lifestyle, but the instance is requested \
         outside the context of an active scope."
    )]
    ScopeRequired { key: ServiceKey, lifestyle: String },

    /// The scope used for resolution has already been disposed.
    #[error("Cannot resolve {key}: the scope has already been disposed.")]
    ScopeDisposed { key: ServiceKey },

    /// The container has been disposed.
    #[error("Cannot resolve {key}: the container has been disposed.")]
    ContainerDisposed { key: ServiceKey },

    /// A produced instance did not have the type its key promised.
    #[error("Type mismatch while resolving {key}: expected {expected}")]
    TypeMismatch { key: ServiceKey, expected: &'static str },

    /// A lifestyle could not be determined or is not usable.
    #[error("Invalid lifestyle for {key}: {reason}")]
    InvalidLifestyle { key: ServiceKey, reason: String },

    /// A registration call was rejected.
    #[error("Invalid registration for {key}: {reason}")]
    InvalidRegistration { key: ServiceKey, reason: String },

    /// An application error raised from a factory or initializer.
    #[error(transparent)]
    Custom(Arc<dyn std::error::Error + Send + Sync>),
}

impl GraftError {
    /// Wraps an application error so it can be returned from factories,
    /// constructors and initializers.
    ///
    /// ```
    /// use graft_container::error::GraftError;
    ///
    /// let err = GraftError::custom("connection refused");
    /// assert_eq!(err.to_string(), "connection refused");
    /// ```
    pub fn custom(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        GraftError::Custom(Arc::from(error.into()))
    }

    /// Returns `true` for cyclic dependency errors.
    pub fn is_cyclic(&self) -> bool {
        matches!(self, GraftError::CyclicDependency(_))
    }

    /// Wraps a failure raised while running the factory of `key`.
    ///
    /// Cycles pass through unchanged so the message keeps naming the type
    /// that depends on itself.
    pub(crate) fn activation_failed(key: &ServiceKey, error: GraftError) -> Self {
        match error {
            GraftError::CyclicDependency(_) | GraftError::ActivationFailed { .. } => error,
            other => GraftError::ActivationFailed {
                key: key.clone(),
                source: Arc::new(other),
            },
        }
    }
}

/// Error when a service is not registered.
#[derive(Debug, Clone)]
pub struct NotRegisteredError {
    /// The service that was requested
    pub requested: ServiceKey,
    /// The implementation whose constructor asked for it (if any)
    pub required_by: Option<ServiceKey>,
    /// The constructor parameter name (if any)
    pub parameter: Option<&'static str>,
    /// Similar registered types for "did you mean?" suggestions
    pub suggestions: Vec<String>,
}

impl fmt::Display for NotRegisteredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.required_by, self.parameter) {
            (Some(consumer), Some(parameter)) => write!(
                f,
                "The constructor of type {consumer} contains the parameter with name '{parameter}' \
                 and type {} that is not registered. Please ensure {} is registered, or change \
                 the constructor of {consumer}.",
                self.requested, self.requested,
            )?,
            (Some(consumer), None) => write!(
                f,
                "No registration for type {} could be found. Required by: {consumer}",
                self.requested,
            )?,
            _ => write!(f, "No registration for type {} could be found.", self.requested)?,
        }

        if is_primitive_type_name(self.requested.type_name()) {
            write!(
                f,
                "\n  Note: primitive types and String can't be auto-wired. Register an instance \
                 or use a factory."
            )?;
        }

        if !self.suggestions.is_empty() {
            write!(f, "\n  Did you mean one of:")?;
            for suggestion in &self.suggestions {
                write!(f, "\n    - {suggestion}")?;
            }
        }

        Ok(())
    }
}

/// Error when a component depends on itself.
#[derive(Debug, Clone)]
pub struct CyclicDependencyError {
    /// The implementation that was requested again while it was being built
    pub implementation: ServiceKey,
    /// The implementations on the activation path, ending with the repeat.
    /// Example: `[A, B, A]`
    pub chain: Vec<ServiceKey>,
}

impl CyclicDependencyError {
    /// Returns `true` when the component depends on itself without any
    /// component in between.
    pub fn is_direct(&self) -> bool {
        self.chain.len() <= 2
    }
}

impl fmt::Display for CyclicDependencyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "The configuration is invalid. The type {} is directly or indirectly depending on itself.",
            self.implementation,
        )?;

        if self.is_direct() {
            write!(f, " The cycle is direct: it depends on itself.")?;
        } else {
            let names: Vec<String> = self.chain.iter().map(ServiceKey::short_name).collect();
            write!(
                f,
                " The cycle is indirect. The cyclic graph contains the following types: {}.",
                render_chain(&names)
            )?;
        }

        write!(
            f,
            "\n  Hint: Consider resolving one side through a factory or restructuring your dependencies"
        )
    }
}

/// Error when a longer-lived component captures a shorter-lived one.
#[derive(Debug, Clone)]
pub struct LifestyleMismatchError {
    /// The consuming implementation
    pub consumer: ServiceKey,
    pub consumer_lifestyle: String,
    /// The service being injected and the implementation behind it
    pub dependency: ServiceKey,
    pub dependency_implementation: ServiceKey,
    pub dependency_lifestyle: String,
}

impl fmt::Display for LifestyleMismatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Lifestyle mismatch: {} ({}) depends on {} implemented by {} ({}).",
            self.consumer,
            self.consumer_lifestyle,
            self.dependency,
            self.dependency_implementation,
            self.dependency_lifestyle,
        )?;
        write!(
            f,
            "\n  A {} component can't depend on a {} component",
            self.consumer_lifestyle, self.dependency_lifestyle,
        )?;
        write!(
            f,
            "\n  Hint: Change {} to {} or longer",
            self.dependency, self.consumer_lifestyle,
        )
    }
}

/// Error when trying to register a service that already exists.
#[derive(Debug, Clone)]
pub struct AlreadyRegisteredError {
    pub key: ServiceKey,
}

impl fmt::Display for AlreadyRegisteredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Type {} has already been registered.", self.key)?;
        write!(
            f,
            "\n  Hint: Enable ContainerOptions::allow_overriding_registrations to replace it, \
             or use append_to_collection for multiple implementations"
        )
    }
}

/// Error when a constructor reads its arguments inconsistently with its
/// declared dependencies.
#[derive(Debug, Clone)]
pub struct ArgumentMismatchError {
    pub consumer: ServiceKey,
    /// Zero-based argument position
    pub position: usize,
    /// Type the constructor asked for
    pub requested: &'static str,
    /// Declared dependency at that position, if there is one
    pub declared: Option<ServiceKey>,
}

impl fmt::Display for ArgumentMismatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.declared {
            Some(declared) => write!(
                f,
                "The constructor of {} requested argument #{} as {}, but the declared dependency \
                 at that position is {declared}.",
                self.consumer,
                self.position + 1,
                self.requested,
            ),
            None => write!(
                f,
                "The constructor of {} requested argument #{} as {}, but only {} dependencies \
                 are declared.",
                self.consumer,
                self.position + 1,
                self.requested,
                self.position,
            ),
        }
    }
}

/// Aggregated verification failures.
#[derive(Debug, Clone)]
pub struct VerificationError {
    pub failures: Vec<(ServiceKey, GraftError)>,
}

impl fmt::Display for VerificationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "The configuration is invalid. {} registration(s) failed verification:",
            self.failures.len()
        )?;
        for (key, error) in &self.failures {
            write!(f, "\n  - {key}: {error}")?;
        }
        Ok(())
    }
}

/// Warning-level diagnostics reported by `verify_and_diagnose`.
#[derive(Debug, Clone)]
pub struct DiagnosticsError {
    /// One line per warning: `[kind] description`
    pub warnings: Vec<String>,
}

impl fmt::Display for DiagnosticsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "The configuration is invalid. The following diagnostic warnings were reported:"
        )?;
        for warning in &self.warnings {
            write!(f, "\n  - {warning}")?;
        }
        write!(f, "\n  See Container::analyze() for more information")
    }
}

/// Convenient Result type for Graft operations.
pub type Result<T> = std::result::Result<T, GraftError>;
