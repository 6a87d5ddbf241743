//! The player snapshot.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// The complete progress state of one player.
///
/// A snapshot is a set of independently mergeable top-level sections
/// (`scores`, `achievements`, `ledger`, `stats`, ...). Restoring from a
/// backup replaces whole sections; it never merges inside one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    /// Owner of the snapshot.
    pub user_id: String,
    /// Last local modification (Unix millis).
    pub updated_at: u64,
    /// Top-level sections by name.
    pub sections: BTreeMap<String, Value>,
}

impl PlayerSnapshot {
    /// Creates an empty snapshot for a user.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            updated_at: 0,
            sections: BTreeMap::new(),
        }
    }

    /// Returns a section by name.
    #[must_use]
    pub fn section(&self, name: &str) -> Option<&Value> {
        self.sections.get(name)
    }

    /// Replaces a section, returning the previous value.
    pub fn set_section(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.sections.insert(name.into(), value)
    }

    /// Removes a section.
    pub fn remove_section(&mut self, name: &str) -> Option<Value> {
        self.sections.remove(name)
    }

    /// Overwrites every section present in `remote`; sections only present
    /// locally are left untouched.
    ///
    /// Returns the names of the replaced sections.
    pub fn merge_from(&mut self, remote: PlayerSnapshot) -> Vec<String> {
        let mut replaced = Vec::with_capacity(remote.sections.len());
        for (name, value) in remote.sections {
            replaced.push(name.clone());
            self.sections.insert(name, value);
        }
        self.updated_at = self.updated_at.max(remote.updated_at);
        replaced
    }

    /// Size of the sections serialized as JSON, in bytes.
    ///
    /// Used as the size estimate for backup scheduling.
    #[must_use]
    pub fn estimated_size(&self) -> u64 {
        serde_json::to_vec(&self.sections).map_or(0, |bytes| bytes.len() as u64)
    }
}
