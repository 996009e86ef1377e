//! Capability strings and capability sets.
//!
//! # Purpose
//! Wraps permission namespaces (for example `admin.create`) in a newtype and
//! collects them into an ordered set used for exact-match gating.
//!
//! # Key invariants
//! - Capabilities are compared exactly; there is no wildcard expansion.
//! - A [`CapabilitySet`] never contains blank entries.
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::BTreeSet;

/// Capability that gates every administrative screen.
pub const ADMIN_CAPABILITY: &str = "admin.create";

/// A single permission namespace granted to an identity.
///
/// # Example
/// ```rust
/// use lectern_authz::Capability;
///
/// let capability = Capability::new("books.write");
/// assert_eq!(capability.as_str(), "books.write");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capability(String);

impl Capability {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Capability {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Capability {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Ordered, de-duplicated capability set embedded in an identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    /// Build a set from raw claim strings.
    ///
    /// Entries are trimmed; blank entries are dropped and duplicates collapse.
    pub fn from_raw<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        values
            .into_iter()
            .filter_map(|value| {
                let value = value.as_ref().trim();
                (!value.is_empty()).then(|| Capability::new(value))
            })
            .collect()
    }

    pub fn contains(&self, capability: &str) -> bool {
        self.0.contains(capability)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.0.iter()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<T: IntoIterator<Item = Capability>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
