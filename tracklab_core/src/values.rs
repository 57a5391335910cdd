//! Sparse feature values.
//!
//! Every spot, edge and track carries a [`FeatureMap`]. A name that is absent
//! from the map has not been computed yet and reads back as
//! [`FeatureValue::Unknown`], which is distinct from any number including
//! `0.0` and `NaN`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Result of a feature lookup.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FeatureValue {
    /// Computed value (may be `NaN` if the analyzer produced one)
    Known(f64),
    /// Not computed, or never registered
    Unknown,
}

impl FeatureValue {
    /// Returns the number, or `None` for `Unknown`.
    #[inline]
    pub fn known(self) -> Option<f64> {
        match self {
            FeatureValue::Known(v) => Some(v),
            FeatureValue::Unknown => None,
        }
    }

    #[inline]
    pub fn is_known(self) -> bool {
        matches!(self, FeatureValue::Known(_))
    }

    #[inline]
    pub fn is_unknown(self) -> bool {
        !self.is_known()
    }
}

impl From<Option<f64>> for FeatureValue {
    fn from(value: Option<f64>) -> Self {
        value.map_or(FeatureValue::Unknown, FeatureValue::Known)
    }
}

impl fmt::Display for FeatureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureValue::Known(v) => write!(f, "{}", v),
            FeatureValue::Unknown => f.write_str("n/a"),
        }
    }
}

/// Sparse mapping feature name → value.
///
/// Ordered by name so that iteration (and serialization) is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureMap(BTreeMap<String, f64>);

impl FeatureMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a feature. Absent names yield `Unknown`.
    pub fn get(&self, name: &str) -> FeatureValue {
        self.0.get(name).copied().into()
    }

    /// Sets (or overwrites) a single value.
    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.0.insert(name.into(), value);
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.insert(name, value);
        self
    }

    /// Removes a value, returning what was there.
    pub fn remove(&mut self, name: &str) -> FeatureValue {
        self.0.remove(name).into()
    }

    /// Overwrites the names present in `other`, leaving every other entry untouched.
    pub fn merge(&mut self, other: FeatureMap) {
        self.0.extend(other.0);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl FromIterator<(String, f64)> for FeatureMap {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> FromIterator<(&'a str, f64)> for FeatureMap {
    fn from_iter<I: IntoIterator<Item = (&'a str, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }
}
