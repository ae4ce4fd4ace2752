//! Change detection for an experiment's traffic split.
use serde::{Deserialize, Serialize};

use crate::experiment::Groups;

/// Summary of a weight distribution. Two distributions share a fingerprint if and only if they
/// have the same group ids with the same weights.
///
/// Not a cryptographic hash, only a change detector.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint as stored.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Fingerprint {
    fn from(value: String) -> Self {
        Fingerprint(value)
    }
}

impl log::kv::ToValue for Fingerprint {
    fn to_value(&self) -> log::kv::Value {
        log::kv::Value::from_display(self)
    }
}

/// Compute fingerprint of `groups`: `id:weight` pairs in ascending id order, joined with `|`.
pub fn fingerprint(groups: &Groups) -> Fingerprint {
    // Groups is ordered by id, so no sorting here.
    let pairs: Vec<String> = groups
        .iter()
        .map(|(id, weight)| format!("{}:{}", id, weight))
        .collect();
    Fingerprint(pairs.join("|"))
}
