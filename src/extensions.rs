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

//! Capability extensions
//!
//! Extensions are optional capabilities a module instance declares at any
//! point in its life. Declarations are recorded in the datastore under the
//! `ReplicantExtensions` key so they survive replication; attachment happens
//! only through [`apply`], which every replica runs before use.

use crate::datastore::{DataStore, DataStoreValue};
use crate::error::{ModuleError, ModuleResult};
use crate::module::ModuleInstance;
use crate::REPLICANT_EXTENSIONS_KEY;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// A named capability that can be attached to a module instance.
///
/// Implementations expose their concrete surface through the [`as_any`]
/// downcast seam; attachment composes them into the instance's dispatch
/// table rather than injecting code at runtime.
///
/// [`as_any`]: ModuleExtension::as_any
pub trait ModuleExtension: Send + Sync {
    /// Identifier the extension is registered and declared under.
    fn id(&self) -> &str;

    /// Called when the extension is attached to an instance.
    fn on_attach(&self, instance: &mut ModuleInstance) -> ModuleResult<()> {
        let _ = instance;
        Ok(())
    }

    /// Downcast seam to the concrete capability type.
    fn as_any(&self) -> &dyn Any;
}

type ExtensionFactory = Arc<dyn Fn() -> Arc<dyn ModuleExtension> + Send + Sync>;

/// Registry mapping extension identifiers to capability factories.
///
/// Factories are registered once at framework load time; resolution is a
/// concurrent read thereafter.
pub struct ExtensionRegistry {
    factories: RwLock<HashMap<String, ExtensionFactory>>,
}

impl Default for ExtensionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtensionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// The process-wide registry modules resolve against by default.
    pub fn global() -> Arc<ExtensionRegistry> {
        static GLOBAL: OnceLock<Arc<ExtensionRegistry>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(ExtensionRegistry::new())))
    }

    /// Register a factory for an extension id, replacing any prior factory.
    pub fn register_factory<F>(&self, id: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn ModuleExtension> + Send + Sync + 'static,
    {
        let id = id.into();
        tracing::debug!(extension = %id, "registering extension factory");
        self.factories.write().insert(id, Arc::new(factory));
    }

    /// Whether a factory exists for an id.
    pub fn contains(&self, id: &str) -> bool {
        self.factories.read().contains_key(id)
    }

    /// Resolve an id to a fresh capability instance.
    pub fn resolve(&self, id: &str) -> ModuleResult<Arc<dyn ModuleExtension>> {
        let factories = self.factories.read();
        let factory = factories
            .get(id)
            .ok_or_else(|| ModuleError::UnknownExtension(id.to_string()))?;
        Ok(factory())
    }

    /// All registered ids.
    pub fn ids(&self) -> Vec<String> {
        self.factories.read().keys().cloned().collect()
    }
}

/// Record extension ids in a datastore so they survive replication.
///
/// Appends each id to the `ReplicantExtensions` list if not already present,
/// preserving insertion order, creating the list if absent. Declaration alone
/// attaches nothing; a live instance gains the capability only via [`apply`].
pub fn register(store: &mut DataStore, ids: &[&str]) -> ModuleResult<()> {
    let mut list = match store.get(REPLICANT_EXTENSIONS_KEY) {
        Some(DataStoreValue::List(existing)) => existing.clone(),
        Some(other) => {
            return Err(ModuleError::InvalidExtensionConfiguration(
                other.kind().to_string(),
            ))
        }
        None => Vec::new(),
    };

    for id in ids {
        if !list.iter().any(|existing| existing == id) {
            list.push((*id).to_string());
        }
    }

    store.set(REPLICANT_EXTENSIONS_KEY, list)
}

/// Attach every declared extension to a living instance.
///
/// Reads the `ReplicantExtensions` list from the instance's datastore and
/// resolves each id against the registry. A non-list value at the reserved
/// key is fatal: `InvalidExtensionConfiguration`, and no further extensions
/// are applied. Applying the same list twice is idempotent; a repeated id
/// replaces the earlier attachment rather than double-attaching.
pub fn apply(registry: &ExtensionRegistry, instance: &mut ModuleInstance) -> ModuleResult<()> {
    let ids = match instance.datastore().get(REPLICANT_EXTENSIONS_KEY) {
        None => return Ok(()),
        Some(DataStoreValue::List(ids)) => ids.clone(),
        Some(other) => {
            return Err(ModuleError::InvalidExtensionConfiguration(
                other.kind().to_string(),
            ))
        }
    };

    for id in &ids {
        let extension = registry.resolve(id)?;
        tracing::debug!(extension = %id, module = %instance.name(), "attaching extension");
        instance.attach_extension(extension)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::ModuleMetadata;
    use crate::module::ModuleTemplate;

    struct BannerGrab;

    impl ModuleExtension for BannerGrab {
        fn id(&self) -> &str {
            "banner-grab"
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct CredReport;

    impl ModuleExtension for CredReport {
        fn id(&self) -> &str {
            "cred-report"
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn test_registry() -> Arc<ExtensionRegistry> {
        let registry = Arc::new(ExtensionRegistry::new());
        registry.register_factory("banner-grab", || Arc::new(BannerGrab));
        registry.register_factory("cred-report", || Arc::new(CredReport));
        registry
    }

    fn test_instance(registry: Arc<ExtensionRegistry>) -> ModuleInstance {
        let template =
            Arc::new(ModuleTemplate::new(ModuleMetadata::new()).with_extension_registry(registry));
        template.instantiate().unwrap()
    }

    #[test]
    fn test_register_preserves_order_and_dedups() {
        let mut store = DataStore::new();
        register(&mut store, &["banner-grab"]).unwrap();
        register(&mut store, &["cred-report", "banner-grab"]).unwrap();

        let list = store
            .get(REPLICANT_EXTENSIONS_KEY)
            .unwrap()
            .as_list()
            .unwrap();
        assert_eq!(list, &["banner-grab".to_string(), "cred-report".to_string()]);
    }

    #[test]
    fn test_apply_attaches_declared_capabilities() {
        let registry = test_registry();
        let mut instance = test_instance(Arc::clone(&registry));
        register(instance.datastore_mut(), &["banner-grab", "cred-report"]).unwrap();

        apply(&registry, &mut instance).unwrap();

        assert!(instance.has_extension("banner-grab"));
        assert!(instance.has_extension("cred-report"));
        assert!(instance
            .extension("banner-grab")
            .unwrap()
            .as_any()
            .downcast_ref::<BannerGrab>()
            .is_some());
    }

    #[test]
    fn test_apply_is_idempotent() {
        let registry = test_registry();
        let mut instance = test_instance(Arc::clone(&registry));
        register(instance.datastore_mut(), &["banner-grab"]).unwrap();

        apply(&registry, &mut instance).unwrap();
        apply(&registry, &mut instance).unwrap();

        assert_eq!(instance.extension_ids(), vec!["banner-grab"]);
    }

    #[test]
    fn test_apply_rejects_non_list_value() {
        let registry = test_registry();
        let mut instance = test_instance(Arc::clone(&registry));
        instance
            .datastore_mut()
            .set(REPLICANT_EXTENSIONS_KEY, "banner-grab")
            .unwrap();

        let err = apply(&registry, &mut instance).unwrap_err();
        assert!(matches!(err, ModuleError::InvalidExtensionConfiguration(_)));
        assert!(!instance.has_extension("banner-grab"));
    }

    #[test]
    fn test_apply_unknown_extension() {
        let registry = test_registry();
        let mut instance = test_instance(Arc::clone(&registry));
        register(instance.datastore_mut(), &["no-such-capability"]).unwrap();

        let err = apply(&registry, &mut instance).unwrap_err();
        assert!(matches!(err, ModuleError::UnknownExtension(_)));
    }
}
