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

//! RedCell Module Substrate
//!
//! The base execution unit every RedCell capability module is built on:
//! metadata, per-instance configuration, and safe replication.
//!
//! # Architecture
//!
//! - **Descriptor**: static metadata merged over framework defaults at
//!   construction; provided fields always win.
//! - **DataStore**: per-instance key-value configuration, including the
//!   reserved lineage and extension bookkeeping keys.
//! - **Extensions**: optional capabilities declared in the datastore and
//!   attached through a fixed id-to-implementation registry, so they survive
//!   replication.
//! - **Replication**: every invocation runs on an independent replica of the
//!   original instance. Replicas own a deep copy of the datastore and reapply
//!   the declared extensions, so concurrent runs never share mutable state.
//!
//! # Example
//!
//! ```rust
//! use redcell_modules::{ModuleMetadata, ModuleTemplate};
//! use std::sync::Arc;
//!
//! let metadata: ModuleMetadata = serde_json::from_value(serde_json::json!({
//!     "Name": "smb_probe",
//!     "Platform": ["linux", "windows"],
//!     "Author": "Alice <alice@example.com>",
//! })).unwrap();
//!
//! let template = Arc::new(ModuleTemplate::new(metadata));
//! let original = template.instantiate().unwrap();
//!
//! // One isolated copy per invocation
//! let replica = original.replicate().unwrap();
//! assert_eq!(replica.name(), "smb_probe");
//! ```

pub mod datastore;
pub mod error;
pub mod extensions;
pub mod metadata;
pub mod module;
pub mod options;

// Re-exports
pub use datastore::{DataStore, DataStoreValue};
pub use error::{FailureReason, ModuleError, ModuleResult};
pub use extensions::{ExtensionRegistry, ModuleExtension};
pub use metadata::{Author, Descriptor, ModuleMetadata, PlatformSet, Reference};
pub use module::{ModuleInstance, ModuleTemplate, ModuleUi};
pub use options::{OptionContainer, OptionGroup, OptionSpec, RegisteredOption};

/// Reserved datastore key: workspace the instance operates in
pub const WORKSPACE_KEY: &str = "WORKSPACE";

/// Reserved datastore key: professional/licensed user the run is billed to
pub const PROUSER_KEY: &str = "PROUSER";

/// Reserved datastore key: resolved owner of the instance
pub const MODULE_OWNER_KEY: &str = "MODULE_OWNER";

/// Reserved datastore key: UUID of the parent instance in a lineage chain
pub const PARENT_UUID_KEY: &str = "ParentUUID";

/// Reserved datastore key: debug-output toggle
pub const DEBUG_KEY: &str = "DEBUG";

/// Reserved datastore key: ordered list of declared extension ids
pub const REPLICANT_EXTENSIONS_KEY: &str = "ReplicantExtensions";

/// Default name for a module that declares none
pub const DEFAULT_MODULE_NAME: &str = "No module name";

/// Default description for a module that declares none
pub const DEFAULT_MODULE_DESCRIPTION: &str = "No module description";

/// Default version for a module that declares none
pub const DEFAULT_MODULE_VERSION: &str = "0";

/// Framework-wide default license
pub const DEFAULT_LICENSE: &str = "RedCell Framework License (BSD)";
