//! Service identification keys.
//!
//! [`ServiceKey`] identifies a service within the container. It combines a
//! [`TypeId`] with an optional name for keyed registrations. Trait-object
//! services are keyed by their `dyn Trait` type.

use std::any::{TypeId, type_name};
use std::fmt;
use std::hash::{Hash, Hasher};

use graft_support::rendering::shorten_type_name;

/// Uniquely identifies a service in the container.
///
/// # Examples
/// ```
/// use graft_container::key::ServiceKey;
///
/// let key = ServiceKey::of::<String>();
/// assert_eq!(key.type_name(), "alloc::string::String");
/// assert_eq!(key.name(), None);
///
/// let key = ServiceKey::named::<String>("connection_string");
/// assert_eq!(key.name(), Some("connection_string"));
/// ```
#[derive(Clone)]
pub struct ServiceKey {
    type_id: TypeId,
    type_name: &'static str,
    name: Option<&'static str>,
}

impl ServiceKey {
    /// Creates a key for type `T`.
    #[inline]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            name: None,
        }
    }

    /// Creates a named key for type `T`.
    ///
    /// Named keys allow several registrations of the same service type.
    ///
    /// ```
    /// use graft_container::key::ServiceKey;
    ///
    /// let primary = ServiceKey::named::<String>("primary_db");
    /// let replica = ServiceKey::named::<String>("replica_db");
    /// assert_ne!(primary, replica);
    /// ```
    #[inline]
    pub fn named<T: ?Sized + 'static>(name: &'static str) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            name: Some(name),
        }
    }

    /// Returns the [`TypeId`] of the service.
    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Returns the fully qualified type name.
    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns the optional registration name.
    #[inline]
    pub fn name(&self) -> Option<&'static str> {
        self.name
    }

    /// Returns `true` if this key identifies type `T`, ignoring the name.
    #[inline]
    pub fn is<T: ?Sized + 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    /// Returns the type name without module paths, as used in diagnostics.
    pub fn short_name(&self) -> String {
        match self.name {
            Some(name) => format!("{} ({name})", shorten_type_name(self.type_name)),
            None => shorten_type_name(self.type_name),
        }
    }
}

impl PartialEq for ServiceKey {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id && self.name == other.name
    }
}

impl Eq for ServiceKey {}

impl Hash for ServiceKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
        self.name.hash(state);
    }
}

impl fmt::Debug for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name {
            Some(name) => write!(f, "ServiceKey({}, name={:?})", self.type_name, name),
            None => write!(f, "ServiceKey({})", self.type_name),
        }
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name {
            Some(name) => write!(f, "{} (name={:?})", self.type_name, name),
            None => write!(f, "{}", self.type_name),
        }
    }
}
