//! The three-state result of reading a key from any tier.

use indexmap::IndexMap;

/// Outcome of looking a key up in a cache tier or data source.
///
/// `Null` is a cacheable answer ("the origin confirmed there is no value")
/// and must never be confused with `Miss` ("nobody has answered yet").
/// Collapsing the two makes every read of a known-absent key fall through to
/// the origin again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<V> {
    /// A genuine value.
    Hit(V),
    /// A confirmed absence.
    Null,
    /// Never loaded, expired or invalidated.
    Miss,
}

impl<V> Lookup<V> {
    /// Builds a resolved lookup from a stored slot (`None` is a stored null).
    pub fn from_stored(value: Option<V>) -> Self {
        match value {
            Some(value) => Self::Hit(value),
            None => Self::Null,
        }
    }

    /// Returns `true` for `Hit` and `Null`.
    pub fn is_resolved(&self) -> bool {
        !matches!(self, Self::Miss)
    }

    pub fn is_miss(&self) -> bool {
        matches!(self, Self::Miss)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The storable slot of a resolved lookup; `None` for `Miss`.
    ///
    /// The inner `Option` is `None` for a confirmed null.
    pub fn into_stored(self) -> Option<Option<V>> {
        match self {
            Self::Hit(value) => Some(Some(value)),
            Self::Null => Some(None),
            Self::Miss => None,
        }
    }

    /// Flattens the lookup into the value, treating `Null` and `Miss` alike.
    pub fn into_value(self) -> Option<V> {
        match self {
            Self::Hit(value) => Some(value),
            Self::Null | Self::Miss => None,
        }
    }

    pub fn as_ref(&self) -> Lookup<&V> {
        match self {
            Self::Hit(value) => Lookup::Hit(value),
            Self::Null => Lookup::Null,
            Self::Miss => Lookup::Miss,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(V) -> U) -> Lookup<U> {
        match self {
            Self::Hit(value) => Lookup::Hit(f(value)),
            Self::Null => Lookup::Null,
            Self::Miss => Lookup::Miss,
        }
    }
}

impl<V> From<Option<Option<V>>> for Lookup<V> {
    fn from(slot: Option<Option<V>>) -> Self {
        match slot {
            Some(stored) => Self::from_stored(stored),
            None => Self::Miss,
        }
    }
}

/// Result of a batch read against one tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchLookup<V> {
    /// Keys the tier answered for (`None` is a stored null), in request order.
    pub resolved: IndexMap<String, Option<V>>,
    /// Keys the tier knows nothing about, in request order.
    pub unresolved: Vec<String>,
}

impl<V> BatchLookup<V> {
    pub fn new() -> Self {
        Self {
            resolved: IndexMap::new(),
            unresolved: Vec::new(),
        }
    }

    /// Sorts each lookup into the resolved or unresolved bucket.
    pub fn push(&mut self, key: String, lookup: Lookup<V>) {
        match lookup.into_stored() {
            Some(stored) => {
                self.resolved.insert(key, stored);
            }
            None => self.unresolved.push(key),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }
}

impl<V> Default for BatchLookup<V> {
    fn default() -> Self {
        Self::new()
    }
}
