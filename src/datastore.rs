// Copyright 2026 RedCell (https://github.com/redcell)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Per-instance module datastore
//!
//! Holds user-supplied configuration plus the reserved lineage and extension
//! bookkeeping keys. Every datastore belongs to exactly one module instance;
//! independent copies are obtained through [`DataStore::deep_copy`].

use crate::error::{ModuleError, ModuleResult};
use crate::options::OptionContainer;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A value stored in a module datastore.
///
/// Opaque values carry collaborator-defined JSON untouched so persisted
/// configuration round-trips verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataStoreValue {
    Bool(bool),
    Str(String),
    List(Vec<String>),
    Opaque(serde_json::Value),
}

impl DataStoreValue {
    /// Short name of the value's shape, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            DataStoreValue::Bool(_) => "bool",
            DataStoreValue::Str(_) => "string",
            DataStoreValue::List(_) => "list",
            DataStoreValue::Opaque(_) => "opaque",
        }
    }

    /// Borrow the value as a string, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            DataStoreValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow the value as a list, if it is one.
    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            DataStoreValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// The value's canonical string form, used by truthiness and ownership
    /// checks.
    pub fn string_form(&self) -> String {
        match self {
            DataStoreValue::Bool(b) => b.to_string(),
            DataStoreValue::Str(s) => s.clone(),
            DataStoreValue::List(items) => items.join(","),
            DataStoreValue::Opaque(v) => match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            },
        }
    }
}

impl From<bool> for DataStoreValue {
    fn from(v: bool) -> Self {
        DataStoreValue::Bool(v)
    }
}

impl From<&str> for DataStoreValue {
    fn from(v: &str) -> Self {
        DataStoreValue::Str(v.to_string())
    }
}

impl From<String> for DataStoreValue {
    fn from(v: String) -> Self {
        DataStoreValue::Str(v)
    }
}

impl From<Vec<String>> for DataStoreValue {
    fn from(v: Vec<String>) -> Self {
        DataStoreValue::List(v)
    }
}

impl From<serde_json::Value> for DataStoreValue {
    fn from(v: serde_json::Value) -> Self {
        DataStoreValue::Opaque(v)
    }
}

/// Mutable, string-keyed configuration for one module instance.
///
/// The read-only key set is policy supplied by the option system at default
/// import time; writes to those keys are rejected with `ConfigImmutable`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataStore {
    entries: BTreeMap<String, DataStoreValue>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    read_only: BTreeSet<String>,
}

impl DataStore {
    /// Create an empty datastore.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the value for a key.
    pub fn get(&self, key: &str) -> Option<&DataStoreValue> {
        self.entries.get(key)
    }

    /// Get a key's value in its canonical string form.
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(DataStoreValue::string_form)
    }

    /// Set a key, overwriting any prior value.
    ///
    /// Fails with `ConfigImmutable` if the option-system policy marked the
    /// key read-only.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<DataStoreValue>) -> ModuleResult<()> {
        let key = key.into();
        if self.read_only.contains(&key) {
            return Err(ModuleError::ConfigImmutable(key));
        }
        self.entries.insert(key, value.into());
        Ok(())
    }

    /// Remove a key, returning its prior value.
    pub fn unset(&mut self, key: &str) -> Option<DataStoreValue> {
        self.entries.remove(key)
    }

    /// Whether a key is present.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Whether the option-system policy marked a key read-only.
    pub fn is_read_only(&self, key: &str) -> bool {
        self.read_only.contains(key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &DataStoreValue)> {
        self.entries.iter()
    }

    /// Import option defaults and read-only policy.
    ///
    /// For every registered option with a declared default and no existing
    /// entry, sets the default. Explicitly set values are never overwritten.
    /// Runs once, after option registration and before first use.
    pub fn import_defaults(&mut self, options: &OptionContainer) {
        for registered in options.iter() {
            let spec = &registered.spec;
            if spec.read_only {
                self.read_only.insert(spec.name.clone());
            }
            if let Some(default) = &spec.default {
                // Policy writes bypass the read-only check; this is the one
                // writer that owns the policy.
                self.entries
                    .entry(spec.name.clone())
                    .or_insert_with(|| default.clone());
            }
        }
    }

    /// Produce a value-independent copy of this store.
    ///
    /// Every value is owned, so `Clone` already duplicates the full tree;
    /// mutating either store after the copy never affects the other.
    pub fn deep_copy(&self) -> DataStore {
        self.clone()
    }
}
