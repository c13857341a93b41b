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

//! Module metadata schema and descriptor defaulting
//!
//! Defines the untyped metadata mapping a module is declared with and the
//! typed `Descriptor` built from it at construction time.

use crate::error::{ModuleError, ModuleResult};
use crate::options::OptionSpec;
use crate::{
    DEFAULT_LICENSE, DEFAULT_MODULE_DESCRIPTION, DEFAULT_MODULE_NAME, DEFAULT_MODULE_VERSION,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

/// Metadata mapping a module author supplies at declaration time.
///
/// Every key is optional; absent keys fall back to the framework defaults when
/// the `Descriptor` is built. The flexible fields (`Author`, `Arch`,
/// `Platform`, `Ref`) accept a scalar or a sequence and are normalized by the
/// transform functions below. Unrecognized keys are retained verbatim in
/// `extra` so collaborators can round-trip them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleMetadata {
    #[serde(rename = "Name", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(
        rename = "Description",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub description: Option<String>,

    #[serde(rename = "Version", default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Scalar or sequence of `"Name <email>"` strings
    #[serde(rename = "Author", default, skip_serializing_if = "Option::is_none")]
    pub author: Option<Value>,

    /// Scalar or sequence of architecture names
    #[serde(rename = "Arch", default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<Value>,

    /// Scalar or sequence of platform names; `"all"` is the universal marker
    #[serde(rename = "Platform", default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Value>,

    /// Scalar URL or sequence of URLs / `[source, id]` pairs
    #[serde(
        rename = "Ref",
        alias = "References",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub references: Option<Value>,

    #[serde(
        rename = "Privileged",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub privileged: Option<bool>,

    #[serde(rename = "License", default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,

    #[serde(rename = "Options", default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<OptionSpec>,

    #[serde(
        rename = "AdvancedOptions",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub advanced_options: Vec<OptionSpec>,

    #[serde(
        rename = "EvasionOptions",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub evasion_options: Vec<OptionSpec>,

    /// Unrecognized keys, retained verbatim but otherwise ignored
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl ModuleMetadata {
    /// Create an empty metadata mapping (all defaults apply).
    pub fn new() -> Self {
        Self::default()
    }
}

/// A module author
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Author {
    /// Parse an author from its `"Name <email>"` string form.
    pub fn parse(raw: &str) -> Self {
        if let (Some(start), Some(end)) = (raw.find('<'), raw.rfind('>')) {
            if start < end {
                let name = raw[..start].trim().to_string();
                let email = raw[start + 1..end].trim().to_string();
                return Self {
                    name,
                    email: if email.is_empty() { None } else { Some(email) },
                };
            }
        }
        Self {
            name: raw.trim().to_string(),
            email: None,
        }
    }
}

impl std::fmt::Display for Author {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.email {
            Some(email) => write!(f, "{} <{}>", self.name, email),
            None => write!(f, "{}", self.name),
        }
    }
}

/// An external reference attached to a module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reference {
    /// Plain URL
    Url { url: String },
    /// Identifier in a known catalog, e.g. `["CVE", "2024-1234"]`
    Site { source: String, id: String },
}

impl Reference {
    fn from_element(value: &Value) -> ModuleResult<Self> {
        match value {
            Value::String(s) => Ok(Reference::Url { url: s.clone() }),
            Value::Array(pair) => match pair.as_slice() {
                [Value::String(source), Value::String(id)] => Ok(Reference::Site {
                    source: source.clone(),
                    id: id.clone(),
                }),
                _ => Err(ModuleError::malformed(
                    "Ref",
                    "expected a [source, id] pair of strings",
                )),
            },
            other => Err(ModuleError::malformed(
                "Ref",
                format!("expected a string or [source, id] pair, found {}", other),
            )),
        }
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reference::Url { url } => write!(f, "{}", url),
            Reference::Site { source, id } => write!(f, "{}-{}", source, id),
        }
    }
}

/// Set of platforms a module declares support for.
///
/// An empty set matches nothing; only the explicit `"all"` marker matches
/// every candidate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformSet {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    all: bool,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    names: BTreeSet<String>,
}

impl PlatformSet {
    /// Empty set, matches no candidate.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Universal set, matches every candidate.
    pub fn all() -> Self {
        Self {
            all: true,
            names: BTreeSet::new(),
        }
    }

    /// Build a set from platform names. Names are trimmed and lowercased;
    /// the name `"all"` switches the set to the universal marker.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::empty();
        for name in names {
            set.insert(name.as_ref());
        }
        set
    }

    /// Add one platform name.
    pub fn insert(&mut self, name: &str) {
        let name = name.trim().to_lowercase();
        if name == "all" {
            self.all = true;
        } else if !name.is_empty() {
            self.names.insert(name);
        }
    }

    /// Whether this is the universal marker.
    pub fn is_all(&self) -> bool {
        self.all
    }

    /// Whether the set matches no candidate at all.
    pub fn is_empty(&self) -> bool {
        !self.all && self.names.is_empty()
    }

    /// Whether a specific platform name is present.
    pub fn contains(&self, name: &str) -> bool {
        self.all || self.names.contains(&name.trim().to_lowercase())
    }

    /// Platform-match check: true iff this set names a platform the candidate
    /// also names. The universal marker matches everything; an empty set
    /// matches nothing.
    pub fn intersects(&self, candidate: &PlatformSet) -> bool {
        if self.all {
            return true;
        }
        if candidate.all {
            return !self.names.is_empty();
        }
        self.names.iter().any(|n| candidate.names.contains(n))
    }

    /// Iterate declared platform names (empty for the universal marker).
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

/// Static module descriptor, immutable after construction.
///
/// Built from a `ModuleMetadata` mapping: provided fields win, absent fields
/// take the framework defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub name: String,
    pub description: String,
    pub version: String,
    pub authors: Vec<Author>,
    pub architectures: BTreeSet<String>,
    pub platforms: PlatformSet,
    pub references: Vec<Reference>,
    pub license: String,
    pub privileged: bool,
}

impl Default for Descriptor {
    fn default() -> Self {
        Self {
            name: DEFAULT_MODULE_NAME.to_string(),
            description: DEFAULT_MODULE_DESCRIPTION.to_string(),
            version: DEFAULT_MODULE_VERSION.to_string(),
            authors: Vec::new(),
            architectures: BTreeSet::new(),
            platforms: PlatformSet::empty(),
            references: Vec::new(),
            license: DEFAULT_LICENSE.to_string(),
            privileged: false,
        }
    }
}

impl Descriptor {
    /// Merge a metadata mapping over the framework defaults.
    ///
    /// Side-effect free; errors only if a flexible field fails structural
    /// normalization.
    pub fn from_metadata(meta: &ModuleMetadata) -> ModuleResult<Self> {
        let defaults = Descriptor::default();

        let authors = match &meta.author {
            Some(value) => normalize_authors(value)?,
            None => defaults.authors,
        };
        let architectures = match &meta.arch {
            Some(value) => normalize_architectures(value)?,
            None => defaults.architectures,
        };
        let platforms = match &meta.platform {
            Some(value) => normalize_platforms(value)?,
            None => defaults.platforms,
        };
        let references = match &meta.references {
            Some(value) => normalize_references(value)?,
            None => defaults.references,
        };

        Ok(Self {
            name: meta.name.clone().unwrap_or(defaults.name),
            description: meta.description.clone().unwrap_or(defaults.description),
            version: meta.version.clone().unwrap_or(defaults.version),
            authors,
            architectures,
            platforms,
            references,
            license: meta.license.clone().unwrap_or(defaults.license),
            privileged: meta.privileged.unwrap_or(defaults.privileged),
        })
    }
}

/// Coerce a scalar-or-sequence JSON value into a vector of strings.
fn string_elements(field: &'static str, value: &Value) -> ModuleResult<Vec<String>> {
    match value {
        Value::String(s) => Ok(vec![s.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.clone()),
                other => Err(ModuleError::malformed(
                    field,
                    format!("expected a string element, found {}", other),
                )),
            })
            .collect(),
        other => Err(ModuleError::malformed(
            field,
            format!("expected a string or sequence of strings, found {}", other),
        )),
    }
}

/// Normalize the `Author` field into a canonical author sequence.
pub fn normalize_authors(value: &Value) -> ModuleResult<Vec<Author>> {
    Ok(string_elements("Author", value)?
        .iter()
        .map(|raw| Author::parse(raw))
        .collect())
}

/// Normalize the `Arch` field into a canonical architecture set.
pub fn normalize_architectures(value: &Value) -> ModuleResult<BTreeSet<String>> {
    Ok(string_elements("Arch", value)?
        .iter()
        .map(|a| a.trim().to_lowercase())
        .filter(|a| !a.is_empty())
        .collect())
}

/// Normalize the `Platform` field into a `PlatformSet`.
pub fn normalize_platforms(value: &Value) -> ModuleResult<PlatformSet> {
    Ok(PlatformSet::from_names(string_elements("Platform", value)?))
}

/// Normalize the `Ref`/`References` field into a reference sequence.
pub fn normalize_references(value: &Value) -> ModuleResult<Vec<Reference>> {
    match value {
        Value::Array(items) => items.iter().map(Reference::from_element).collect(),
        scalar => Ok(vec![Reference::from_element(scalar)?]),
    }
}
