//! Cache entry identity.

use std::fmt;

/// Identity of a cache entry: a key, optionally scoped within a group.
///
/// Flat and grouped entries never collide, even when their keys are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryKey {
    group: Option<String>,
    key: String,
}

impl EntryKey {
    pub fn flat(key: impl Into<String>) -> Self {
        Self {
            group: None,
            key: key.into(),
        }
    }

    pub fn grouped(key: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            group: Some(group.into()),
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    pub fn in_group(&self, group: &str) -> bool {
        self.group.as_deref() == Some(group)
    }
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.group {
            Some(group) => write!(f, "{group}/{}", self.key),
            None => f.write_str(&self.key),
        }
    }
}
