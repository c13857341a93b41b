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

//! Option specifications
//!
//! Narrow surface of the option-system collaborator. The substrate only
//! registers specs at construction and reads declared defaults and the
//! read-only policy; concrete type validation lives outside this crate.

use crate::datastore::DataStoreValue;
use serde::{Deserialize, Serialize};

/// Declaration of a single configurable option.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<DataStoreValue>,
}

impl OptionSpec {
    /// Create a spec with no default and no constraints.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            required: false,
            read_only: false,
            default: None,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the declared default.
    pub fn with_default(mut self, default: impl Into<DataStoreValue>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// Mark the option required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Mark the option read-only; writes through the datastore are rejected.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

/// Which registration group an option came in through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionGroup {
    #[default]
    Base,
    Advanced,
    Evasion,
}

/// An option spec together with its registration bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredOption {
    pub spec: OptionSpec,
    pub group: OptionGroup,
    /// Name of the module that registered the option
    pub owner: String,
}

/// All options registered for one module instance, insertion-ordered.
///
/// Re-registering an option name replaces the earlier entry, so a module can
/// narrow an inherited spec.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OptionContainer {
    options: Vec<RegisteredOption>,
}

impl OptionContainer {
    /// Create an empty container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register base options.
    pub fn add_options(&mut self, specs: Vec<OptionSpec>, owner: &str) {
        self.push(specs, OptionGroup::Base, owner);
    }

    /// Register advanced options.
    pub fn add_advanced_options(&mut self, specs: Vec<OptionSpec>, owner: &str) {
        self.push(specs, OptionGroup::Advanced, owner);
    }

    /// Register evasion options.
    pub fn add_evasion_options(&mut self, specs: Vec<OptionSpec>, owner: &str) {
        self.push(specs, OptionGroup::Evasion, owner);
    }

    fn push(&mut self, specs: Vec<OptionSpec>, group: OptionGroup, owner: &str) {
        for spec in specs {
            let registered = RegisteredOption {
                spec,
                group,
                owner: owner.to_string(),
            };
            if let Some(slot) = self
                .options
                .iter_mut()
                .find(|o| o.spec.name == registered.spec.name)
            {
                *slot = registered;
            } else {
                self.options.push(registered);
            }
        }
    }

    /// Look up a registered option by name.
    pub fn get(&self, name: &str) -> Option<&RegisteredOption> {
        self.options.iter().find(|o| o.spec.name == name)
    }

    /// Iterate registered options in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &RegisteredOption> {
        self.options.iter()
    }

    /// Number of registered options.
    pub fn len(&self) -> usize {
        self.options.len()
    }

    /// Whether no options are registered.
    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_groups_and_owner_recorded() {
        let mut container = OptionContainer::new();
        container.add_options(vec![OptionSpec::new("RHOST").required()], "smb_probe");
        container.add_advanced_options(vec![OptionSpec::new("ConnectTimeout")], "smb_probe");
        container.add_evasion_options(vec![OptionSpec::new("SMB::Pad")], "smb_probe");

        assert_eq!(container.len(), 3);
        assert_eq!(container.get("RHOST").unwrap().group, OptionGroup::Base);
        assert_eq!(
            container.get("ConnectTimeout").unwrap().group,
            OptionGroup::Advanced
        );
        assert_eq!(
            container.get("SMB::Pad").unwrap().group,
            OptionGroup::Evasion
        );
        assert_eq!(container.get("RHOST").unwrap().owner, "smb_probe");
    }

    #[test]
    fn test_reregistration_replaces() {
        let mut container = OptionContainer::new();
        container.add_options(vec![OptionSpec::new("RPORT").with_default("445")], "base");
        container.add_options(vec![OptionSpec::new("RPORT").with_default("139")], "child");

        assert_eq!(container.len(), 1);
        let reg = container.get("RPORT").unwrap();
        assert_eq!(reg.owner, "child");
        assert_eq!(reg.spec.default, Some(DataStoreValue::from("139")));
    }
}
