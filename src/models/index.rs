//! Secondary index definitions for audit collections

use serde::{Deserialize, Serialize};

/// An ordered list of `(field, direction)` keys, `1` ascending, `-1` descending
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub keys: Vec<(String, i32)>,
    #[serde(default)]
    pub unique: bool,
}

impl IndexSpec {
    /// Start an index on one ascending field
    pub fn ascending(field: impl Into<String>) -> Self {
        Self {
            keys: vec![(field.into(), 1)],
            unique: false,
        }
    }

    /// Start an index on one descending field
    pub fn descending(field: impl Into<String>) -> Self {
        Self {
            keys: vec![(field.into(), -1)],
            unique: false,
        }
    }

    /// Append another key
    pub fn then(mut self, field: impl Into<String>, direction: i32) -> Self {
        self.keys.push((field.into(), direction));
        self
    }

    /// Mark the index unique
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Conventional index name, e.g. `t_1_d._id_1`
    pub fn name(&self) -> String {
        self.keys
            .iter()
            .map(|(field, direction)| format!("{}_{}", field, direction))
            .collect::<Vec<_>>()
            .join("_")
    }
}
