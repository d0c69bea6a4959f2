//! Opaque identifiers used to group running effects for cancellation.

use std::any::TypeId;
use std::borrow::Cow;
use std::fmt;

/// Identifier under which cancellable effects are registered.
///
/// The identity of a running effect for cancellation purposes is supplied
/// from the outside: several effects may share one identifier and any number
/// of identifiers may be active at once.
///
/// # Example
///
/// ```
/// use ripple_core::EffectId;
///
/// struct SearchRequest;
///
/// let by_name = EffectId::from("search");
/// let by_type = EffectId::of::<SearchRequest>();
/// let by_number = EffectId::from(42_u64);
///
/// assert_ne!(by_name, by_type);
/// assert_eq!(by_number, EffectId::from(42_u64));
/// ```
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct EffectId(Key);

#[derive(Clone, PartialEq, Eq, Hash)]
enum Key {
    Name(Cow<'static, str>),
    Number(u64),
    Type(TypeId, &'static str),
}

impl EffectId {
    /// Identifier derived from a marker type
    #[must_use]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self(Key::Type(TypeId::of::<T>(), std::any::type_name::<T>()))
    }

    /// Identifier derived from a name
    #[must_use]
    pub fn named(name: impl Into<Cow<'static, str>>) -> Self {
        Self(Key::Name(name.into()))
    }
}

impl From<&'static str> for EffectId {
    fn from(name: &'static str) -> Self {
        Self(Key::Name(Cow::Borrowed(name)))
    }
}

impl From<String> for EffectId {
    fn from(name: String) -> Self {
        Self(Key::Name(Cow::Owned(name)))
    }
}

impl From<u64> for EffectId {
    fn from(number: u64) -> Self {
        Self(Key::Number(number))
    }
}

impl fmt::Debug for EffectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EffectId({self})")
    }
}

impl fmt::Display for EffectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Key::Name(name) => write!(f, "{name}"),
            Key::Number(number) => write!(f, "#{number}"),
            Key::Type(_, name) => write!(f, "<{name}>"),
        }
    }
}
