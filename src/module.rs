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

//! Module template, instance lifecycle, and replication
//!
//! A `ModuleTemplate` is the read-only class-level record a module is loaded
//! into; every run works on a `ModuleInstance` built from it. Replication is
//! the only sanctioned way to obtain a concurrently usable instance: each
//! replica owns an independent datastore and reapplies the declared
//! extensions, so concurrent invocations never share mutable state.

use crate::datastore::DataStore;
use crate::error::{FailureReason, ModuleError, ModuleResult};
use crate::extensions::{self, ExtensionRegistry, ModuleExtension};
use crate::metadata::{Descriptor, ModuleMetadata, PlatformSet};
use crate::options::OptionContainer;
use crate::{
    DEBUG_KEY, MODULE_OWNER_KEY, PARENT_UUID_KEY, PROUSER_KEY, WORKSPACE_KEY,
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Environment variables checked, in order, for the login-name fallback.
const LOGIN_ENV_VARS: &[&str] = &["LOGNAME", "USERNAME", "USER"];

/// Keys in a user-data mapping that mark it as match data.
const MATCH_DATA_KEYS: &[&str] = &["match", "match_set", "run"];

/// Narrow contract for the framework's UI/output abstraction.
pub trait ModuleUi: Send + Sync {
    fn print_line(&self, message: &str);
    fn print_error(&self, message: &str);
}

/// Read-only class-level record a module is instantiated from.
///
/// Built once at load time and shared behind `Arc`; safe for unsynchronized
/// concurrent reads.
pub struct ModuleTemplate {
    metadata: ModuleMetadata,
    load_path: Option<PathBuf>,
    extensions: Arc<ExtensionRegistry>,
}

impl ModuleTemplate {
    /// Create a template from a metadata mapping, resolving extensions
    /// against the process-wide registry.
    pub fn new(metadata: ModuleMetadata) -> Self {
        Self {
            metadata,
            load_path: None,
            extensions: ExtensionRegistry::global(),
        }
    }

    /// Record where the module was loaded from.
    pub fn with_load_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.load_path = Some(path.into());
        self
    }

    /// Resolve extensions against a specific registry instead of the
    /// process-wide one.
    pub fn with_extension_registry(mut self, registry: Arc<ExtensionRegistry>) -> Self {
        self.extensions = registry;
        self
    }

    /// The declared metadata mapping.
    pub fn metadata(&self) -> &ModuleMetadata {
        &self.metadata
    }

    /// Where the module was loaded from, if known.
    pub fn load_path(&self) -> Option<&Path> {
        self.load_path.as_deref()
    }

    /// The registry extension declarations resolve against.
    pub fn extension_registry(&self) -> &ExtensionRegistry {
        &self.extensions
    }

    /// Build a fresh working instance from this template.
    pub fn instantiate(self: &Arc<Self>) -> ModuleResult<ModuleInstance> {
        ModuleInstance::from_template(Arc::clone(self))
    }
}

/// One executable capability unit: descriptor, datastore, and identity.
pub struct ModuleInstance {
    template: Arc<ModuleTemplate>,
    descriptor: Descriptor,
    datastore: DataStore,
    options: OptionContainer,
    uuid: Uuid,
    created_at: DateTime<Utc>,
    job_id: Option<String>,
    last_error: Option<String>,
    ui: Option<Arc<dyn ModuleUi>>,
    /// Snapshot of sibling capability modules, shared by reference
    module_store: HashMap<String, Arc<ModuleTemplate>>,
    attached: Vec<Arc<dyn ModuleExtension>>,
}

impl ModuleInstance {
    /// Construct an instance from a template.
    ///
    /// Merges the metadata over the framework defaults, registers the three
    /// option groups with the option system, and imports declared defaults
    /// into a fresh datastore.
    pub fn from_template(template: Arc<ModuleTemplate>) -> ModuleResult<Self> {
        let meta = template.metadata();
        let descriptor = Descriptor::from_metadata(meta)?;

        let mut options = OptionContainer::new();
        options.add_options(meta.options.clone(), &descriptor.name);
        options.add_advanced_options(meta.advanced_options.clone(), &descriptor.name);
        options.add_evasion_options(meta.evasion_options.clone(), &descriptor.name);

        let mut datastore = DataStore::new();
        datastore.import_defaults(&options);

        Ok(Self {
            template,
            descriptor,
            datastore,
            options,
            uuid: Uuid::new_v4(),
            created_at: Utc::now(),
            job_id: None,
            last_error: None,
            ui: None,
            module_store: HashMap::new(),
            attached: Vec::new(),
        })
    }

    /// Produce a fully independent runnable copy for one invocation.
    ///
    /// The replica is constructed fresh from the template, carries copies of
    /// every instance-local field (including the UUID, so a running job stays
    /// attributable), owns a deep copy of the datastore, shares the UI
    /// channel and module-store snapshot by reference, and has every declared
    /// extension reapplied.
    pub fn replicate(&self) -> ModuleResult<ModuleInstance> {
        let mut replica = ModuleInstance::from_template(Arc::clone(&self.template))?;

        replica.uuid = self.uuid;
        replica.job_id = self.job_id.clone();
        replica.last_error = self.last_error.clone();
        replica.ui = self.ui.clone();
        replica.module_store = self.module_store.clone();
        replica.datastore = self.datastore.deep_copy();

        extensions::apply(self.template.extension_registry(), &mut replica)?;

        tracing::debug!(module = %replica.descriptor.name, uuid = %replica.uuid, "replicated module instance");
        Ok(replica)
    }

    /// Inherit lineage metadata from a parent instance.
    ///
    /// Copies `WORKSPACE` and `PROUSER` by value where present, records the
    /// parent's resolved owner under `MODULE_OWNER`, and the parent's UUID
    /// under `ParentUUID`. Once copied, no live link to the parent remains.
    /// Call before the child's configuration is otherwise finalized.
    pub fn register_parent(&mut self, parent: &ModuleInstance) -> ModuleResult<()> {
        if let Some(workspace) = parent.datastore.get(WORKSPACE_KEY) {
            self.datastore.set(WORKSPACE_KEY, workspace.clone())?;
        }
        if let Some(pro_user) = parent.datastore.get(PROUSER_KEY) {
            self.datastore.set(PROUSER_KEY, pro_user.clone())?;
        }
        self.datastore.set(MODULE_OWNER_KEY, parent.owner())?;
        self.datastore.set(PARENT_UUID_KEY, parent.uuid.to_string())?;
        Ok(())
    }

    /// Resolve the instance's owner.
    ///
    /// First non-empty, trimmed value among `MODULE_OWNER`, `PROUSER`, the
    /// login-name environment variables, then the literal `"unknown"`.
    pub fn owner(&self) -> String {
        for key in [MODULE_OWNER_KEY, PROUSER_KEY] {
            if let Some(value) = self.datastore.get_str(key) {
                let value = value.trim();
                if !value.is_empty() {
                    return value.to_string();
                }
            }
        }
        for var in LOGIN_ENV_VARS {
            if let Ok(value) = std::env::var(var) {
                let value = value.trim();
                if !value.is_empty() {
                    return value.to_string();
                }
            }
        }
        "unknown".to_string()
    }

    /// The workspace this instance operates in, if set.
    pub fn workspace(&self) -> Option<String> {
        self.datastore.get_str(WORKSPACE_KEY)
    }

    /// Whether the descriptor's platform set matches a candidate set.
    pub fn platform_matches(&self, candidate: &PlatformSet) -> bool {
        self.descriptor.platforms.intersects(candidate)
    }

    /// Whether the `DEBUG` datastore key is set to a truthy value.
    ///
    /// Truthy means the string form starts with `1`, `t`, or `y`,
    /// case-insensitive.
    pub fn is_debugging(&self) -> bool {
        match self.datastore.get_str(DEBUG_KEY) {
            Some(value) => {
                let value = value.trim().to_lowercase();
                value.starts_with('1') || value.starts_with('t') || value.starts_with('y')
            }
            None => false,
        }
    }

    /// Whether a user-data value is a match-data mapping, i.e. an object
    /// whose keys include `match`, `match_set`, and `run`.
    pub fn user_data_is_match(&self, user_data: &Value) -> bool {
        match user_data.as_object() {
            Some(map) => MATCH_DATA_KEYS.iter().all(|key| map.contains_key(*key)),
            None => false,
        }
    }

    /// Record a terminating failure and produce the error to raise.
    ///
    /// Usage: `return Err(self.fail_with(FailureReason::Unreachable, "..."))`.
    pub fn fail_with(&mut self, reason: FailureReason, message: impl Into<String>) -> ModuleError {
        let message = message.into();
        let rendered = format!("{}: {}", reason, message);
        if let Some(ui) = &self.ui {
            ui.print_error(&rendered);
        }
        self.last_error = Some(rendered);
        ModuleError::OperationFailure { reason, message }
    }

    /// Declare extensions on this instance's datastore.
    pub fn register_extensions(&mut self, ids: &[&str]) -> ModuleResult<()> {
        extensions::register(&mut self.datastore, ids)
    }

    /// Attach a resolved capability. Re-attaching an id replaces the earlier
    /// attachment.
    pub(crate) fn attach_extension(&mut self, extension: Arc<dyn ModuleExtension>) -> ModuleResult<()> {
        extension.on_attach(self)?;
        if let Some(slot) = self
            .attached
            .iter_mut()
            .find(|existing| existing.id() == extension.id())
        {
            *slot = extension;
        } else {
            self.attached.push(extension);
        }
        Ok(())
    }

    /// Whether a capability is attached.
    pub fn has_extension(&self, id: &str) -> bool {
        self.attached.iter().any(|e| e.id() == id)
    }

    /// Borrow an attached capability by id.
    pub fn extension(&self, id: &str) -> Option<&dyn ModuleExtension> {
        self.attached
            .iter()
            .find(|e| e.id() == id)
            .map(|e| e.as_ref())
    }

    /// Ids of attached capabilities, in attachment order.
    pub fn extension_ids(&self) -> Vec<&str> {
        self.attached.iter().map(|e| e.id()).collect()
    }

    // Accessors

    /// Descriptor name shorthand.
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// The static descriptor.
    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    /// The instance's datastore.
    pub fn datastore(&self) -> &DataStore {
        &self.datastore
    }

    /// Mutable access to the instance's datastore.
    pub fn datastore_mut(&mut self) -> &mut DataStore {
        &mut self.datastore
    }

    /// The registered option specs.
    pub fn options(&self) -> &OptionContainer {
        &self.options
    }

    /// The template this instance was built from.
    pub fn template(&self) -> &Arc<ModuleTemplate> {
        &self.template
    }

    /// Process-unique instance identifier.
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// When the instance was constructed.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// The job this instance runs under, if any.
    pub fn job_id(&self) -> Option<&str> {
        self.job_id.as_deref()
    }

    /// Associate the instance with a job.
    pub fn set_job_id(&mut self, job_id: impl Into<String>) {
        self.job_id = Some(job_id.into());
    }

    /// The last recorded failure, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Attach the UI/output channel.
    pub fn set_ui(&mut self, ui: Arc<dyn ModuleUi>) {
        self.ui = Some(ui);
    }

    /// The snapshot of sibling capability modules.
    pub fn module_store(&self) -> &HashMap<String, Arc<ModuleTemplate>> {
        &self.module_store
    }

    /// Replace the module-store snapshot.
    pub fn set_module_store(&mut self, store: HashMap<String, Arc<ModuleTemplate>>) {
        self.module_store = store;
    }

    /// Whether the module requires or grants privileged access.
    pub fn is_privileged(&self) -> bool {
        self.descriptor.privileged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::DataStoreValue;
    use crate::options::OptionSpec;
    use serde_json::json;
    use std::any::Any;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn template_from(metadata: ModuleMetadata) -> Arc<ModuleTemplate> {
        Arc::new(
            ModuleTemplate::new(metadata)
                .with_extension_registry(Arc::new(ExtensionRegistry::new())),
        )
    }

    fn basic_instance() -> ModuleInstance {
        template_from(ModuleMetadata::new()).instantiate().unwrap()
    }

    #[test]
    fn test_instantiate_imports_option_defaults() {
        let mut metadata = ModuleMetadata::new();
        metadata.name = Some("smb_probe".to_string());
        metadata.options = vec![OptionSpec::new("RPORT").with_default("445")];

        let instance = template_from(metadata).instantiate().unwrap();
        assert_eq!(instance.name(), "smb_probe");
        assert_eq!(instance.datastore().get_str("RPORT").as_deref(), Some("445"));
    }

    #[test]
    fn test_replica_datastore_is_independent() {
        let mut original = basic_instance();
        original.datastore_mut().set("RHOST", "10.0.0.5").unwrap();

        let mut replica = original.replicate().unwrap();

        original.datastore_mut().set("RHOST", "10.0.0.9").unwrap();
        replica.datastore_mut().set("THREADS", "8").unwrap();

        assert_eq!(
            replica.datastore().get_str("RHOST").as_deref(),
            Some("10.0.0.5")
        );
        assert!(original.datastore().get("THREADS").is_none());
    }

    #[test]
    fn test_replica_carries_instance_fields() {
        let mut original = basic_instance();
        original.set_job_id("job-42");

        let replica = original.replicate().unwrap();

        assert_eq!(replica.uuid(), original.uuid());
        assert_eq!(replica.job_id(), Some("job-42"));
    }

    struct CountingCap {
        attach_count: Arc<AtomicUsize>,
    }

    impl ModuleExtension for CountingCap {
        fn id(&self) -> &str {
            "counting-cap"
        }

        fn on_attach(&self, _instance: &mut ModuleInstance) -> ModuleResult<()> {
            self.attach_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn test_replica_reapplies_extensions() {
        let registry = Arc::new(ExtensionRegistry::new());
        let attach_count = Arc::new(AtomicUsize::new(0));
        let count_handle = Arc::clone(&attach_count);
        registry.register_factory("counting-cap", move || {
            Arc::new(CountingCap {
                attach_count: Arc::clone(&count_handle),
            })
        });

        let template = Arc::new(
            ModuleTemplate::new(ModuleMetadata::new()).with_extension_registry(registry),
        );
        let mut original = template.instantiate().unwrap();
        original.register_extensions(&["counting-cap"]).unwrap();

        // Declaration alone attaches nothing
        assert!(!original.has_extension("counting-cap"));

        let replica = original.replicate().unwrap();
        assert!(replica.has_extension("counting-cap"));
        assert_eq!(attach_count.load(Ordering::SeqCst), 1);

        // A second replica of the original gets its own attachment
        let second = original.replicate().unwrap();
        assert!(second.has_extension("counting-cap"));
        assert_eq!(attach_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_register_parent_propagates_lineage() {
        let mut parent = basic_instance();
        parent
            .datastore_mut()
            .set(WORKSPACE_KEY, "pentest-7")
            .unwrap();
        parent
            .datastore_mut()
            .set(MODULE_OWNER_KEY, "alice")
            .unwrap();

        let mut child = basic_instance();
        child.register_parent(&parent).unwrap();

        assert_eq!(child.workspace().as_deref(), Some("pentest-7"));
        assert_eq!(child.owner(), "alice");
        assert_eq!(
            child.datastore().get_str(PARENT_UUID_KEY).as_deref(),
            Some(parent.uuid().to_string().as_str())
        );
        assert_eq!(child.owner(), parent.owner());
    }

    #[test]
    fn test_owner_resolution_order() {
        let mut instance = basic_instance();

        // MODULE_OWNER wins and is trimmed
        instance
            .datastore_mut()
            .set(MODULE_OWNER_KEY, " alice ")
            .unwrap();
        assert_eq!(instance.owner(), "alice");

        // PROUSER is next
        instance.datastore_mut().unset(MODULE_OWNER_KEY);
        instance.datastore_mut().set(PROUSER_KEY, "mallory").unwrap();
        assert_eq!(instance.owner(), "mallory");
    }

    #[test]
    fn test_owner_env_fallback_and_unknown() {
        let instance = basic_instance();

        let saved: Vec<(&str, Option<String>)> = LOGIN_ENV_VARS
            .iter()
            .map(|var| (*var, std::env::var(var).ok()))
            .collect();

        for var in LOGIN_ENV_VARS {
            std::env::remove_var(var);
        }
        assert_eq!(instance.owner(), "unknown");

        std::env::set_var("USER", "bob");
        assert_eq!(instance.owner(), "bob");

        for (var, value) in saved {
            match value {
                Some(v) => std::env::set_var(var, v),
                None => std::env::remove_var(var),
            }
        }
    }

    #[test]
    fn test_platform_matches() {
        let metadata: ModuleMetadata =
            serde_json::from_value(json!({ "Platform": "linux" })).unwrap();
        let instance = template_from(metadata).instantiate().unwrap();

        assert!(instance.platform_matches(&PlatformSet::from_names(["linux", "windows"])));
        assert!(!instance.platform_matches(&PlatformSet::from_names(["windows"])));
    }

    #[test]
    fn test_is_debugging() {
        let mut instance = basic_instance();
        assert!(!instance.is_debugging());

        for truthy in ["1", "true", "yes", "YES", "y"] {
            instance.datastore_mut().set(DEBUG_KEY, truthy).unwrap();
            assert!(instance.is_debugging(), "expected {truthy:?} to be truthy");
        }
        for falsy in ["no", "0", "false", ""] {
            instance.datastore_mut().set(DEBUG_KEY, falsy).unwrap();
            assert!(!instance.is_debugging(), "expected {falsy:?} to be falsy");
        }

        instance.datastore_mut().set(DEBUG_KEY, true).unwrap();
        assert!(instance.is_debugging());
    }

    #[test]
    fn test_user_data_is_match() {
        let instance = basic_instance();

        assert!(instance.user_data_is_match(&json!({
            "match": 1, "match_set": 2, "run": 3, "extra": 4
        })));
        assert!(!instance.user_data_is_match(&json!({ "match": 1 })));
        assert!(!instance.user_data_is_match(&json!("not a mapping")));
    }

    #[test]
    fn test_fail_with_records_last_error() {
        let mut instance = basic_instance();
        let err = instance.fail_with(FailureReason::Unreachable, "connection refused");

        assert!(matches!(
            err,
            ModuleError::OperationFailure {
                reason: FailureReason::Unreachable,
                ..
            }
        ));
        assert_eq!(
            instance.last_error(),
            Some("unreachable: connection refused")
        );
    }

    #[test]
    fn test_replication_preserves_registered_extension_list() {
        let mut original = basic_instance();
        original
            .datastore_mut()
            .set(
                crate::REPLICANT_EXTENSIONS_KEY,
                DataStoreValue::List(Vec::new()),
            )
            .unwrap();

        let replica = original.replicate().unwrap();
        assert!(replica
            .datastore()
            .get(crate::REPLICANT_EXTENSIONS_KEY)
            .is_some());
    }
}
