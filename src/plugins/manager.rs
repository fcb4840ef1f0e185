//! Module manager - handles module lifecycle
//!
//! Loading happens in batches. Every module in a batch registers its exports
//! first, pending subcommands are resolved once for the whole batch, and only
//! then are permission nodes registered and init hooks run. A module whose
//! init fails is rolled back and stays unloaded.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::Mutex;

use super::trait_def::{InitContext, Module, ModuleCatalog, ModuleRegistrar, ModuleSetup};
use crate::application::errors::{BotError, ModuleError};
use crate::application::permissions::PermissionEvaluator;
use crate::domain::entities::{ModuleRecord, ModuleState};
use crate::domain::traits::SyncScope;
use crate::infrastructure::plugins::{ModuleLoader, ModuleManifest};
use crate::runtime::Runtime;

/// A module that made it through registration and waits for init
struct Staged {
    record: ModuleRecord,
    module: Arc<dyn Module>,
    nodes: Vec<(String, PermissionEvaluator)>,
}

/// Owns every module record
pub struct ModuleManager {
    catalog: ModuleCatalog,
    loader: ModuleLoader,
    discovered: RwLock<BTreeMap<String, ModuleManifest>>,
    records: RwLock<BTreeMap<String, ModuleRecord>>,
    instances: RwLock<HashMap<String, Arc<dyn Module>>>,
    states: RwLock<HashMap<String, ModuleState>>,
    /// Serializes load, unload and reload
    lifecycle: Mutex<()>,
}

impl ModuleManager {
    pub fn new(catalog: ModuleCatalog, loader: ModuleLoader) -> Self {
        Self {
            catalog,
            loader,
            discovered: RwLock::new(BTreeMap::new()),
            records: RwLock::new(BTreeMap::new()),
            instances: RwLock::new(HashMap::new()),
            states: RwLock::new(HashMap::new()),
            lifecycle: Mutex::new(()),
        }
    }

    pub fn catalog(&self) -> &ModuleCatalog {
        &self.catalog
    }

    fn set_state(&self, name: &str, state: ModuleState) {
        tracing::debug!(module = name, "Module state -> {}", state);
        self.states
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), state);
    }

    /// Scan the modules directory. Returns the manifests that can be loaded.
    pub fn discover(&self) -> Vec<ModuleManifest> {
        let mut found = Vec::new();

        for manifest in self.loader.discover() {
            if !self.catalog.contains(&manifest.name) {
                tracing::warn!(
                    "Skipping module '{}': not compiled into this build",
                    manifest.name
                );
                continue;
            }
            if manifest.disabled {
                tracing::info!("Module '{}' is disabled by its manifest", manifest.name);
            }
            if self.state(&manifest.name).is_none() {
                self.set_state(&manifest.name, ModuleState::Discovered);
            }
            found.push(manifest);
        }

        let mut discovered = self.discovered.write().unwrap_or_else(PoisonError::into_inner);
        for manifest in &found {
            discovered.insert(manifest.name.clone(), manifest.clone());
        }
        tracing::info!("Discovered {} module(s) in {}", found.len(), self.loader.directory().display());
        found
    }

    pub fn discovered(&self) -> Vec<ModuleManifest> {
        self.discovered
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Manifest on disk, or one synthesized from the module itself
    fn manifest_for(&self, name: &str) -> Result<ModuleManifest, ModuleError> {
        let known = self
            .discovered
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned();
        if let Some(manifest) = known {
            // pick up edits made since discovery
            let fresh = manifest
                .path
                .as_deref()
                .and_then(|folder| self.loader.read_manifest(folder))
                .unwrap_or(manifest);
            return Ok(fresh);
        }

        let module = self
            .catalog
            .instantiate(name)
            .ok_or_else(|| ModuleError::NotInCatalog(name.to_string()))?;
        Ok(ModuleManifest::synthesized(module.name(), module.version(), module.description()))
    }

    /// Load every enabled discovered module plus the core modules
    pub async fn load_all(&self, runtime: &Arc<Runtime>) -> Vec<(String, Result<(), BotError>)> {
        let _guard = self.lifecycle.lock().await;

        let mut names: BTreeSet<String> = self
            .discovered()
            .into_iter()
            .filter(|m| !m.disabled)
            .map(|m| m.name)
            .collect();
        for core in self.catalog.core_names() {
            let disabled = self
                .discovered
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&core)
                .is_some_and(|m| m.disabled);
            if !disabled {
                names.insert(core);
            }
        }
        names.retain(|name| !self.is_loaded(name));

        let mut manifests = Vec::new();
        let mut results = Vec::new();
        for name in names {
            match self.manifest_for(&name) {
                Ok(manifest) => manifests.push(manifest),
                Err(e) => results.push((name, Err(e.into()))),
            }
        }

        results.extend(self.load_batch(runtime, manifests).await);
        let loaded = results.iter().filter(|(_, r)| r.is_ok()).count();
        tracing::info!("Loaded {}/{} module(s)", loaded, results.len());
        results
    }

    /// Load a single module by name
    pub async fn load(&self, runtime: &Arc<Runtime>, name: &str) -> Result<(), BotError> {
        let _guard = self.lifecycle.lock().await;
        self.load_locked(runtime, name).await
    }

    async fn load_locked(&self, runtime: &Arc<Runtime>, name: &str) -> Result<(), BotError> {
        if self.is_loaded(name) {
            return Err(ModuleError::AlreadyLoaded(name.to_string()).into());
        }
        let manifest = self.manifest_for(name)?;
        if manifest.disabled {
            return Err(ModuleError::Disabled(name.to_string()).into());
        }

        let mut results = self.load_batch(runtime, vec![manifest]).await;
        match results.pop() {
            Some((_, result)) => result,
            None => Err(BotError::Internal(format!("Load of '{}' produced no result", name))),
        }
    }

    async fn load_batch(
        &self,
        runtime: &Arc<Runtime>,
        manifests: Vec<ModuleManifest>,
    ) -> Vec<(String, Result<(), BotError>)> {
        let mut results = Vec::new();
        let mut staged = Vec::new();

        for manifest in manifests {
            let name = manifest.name.clone();
            match self.stage(runtime, manifest) {
                Ok(s) => staged.push(s),
                Err(e) => {
                    tracing::error!("Failed to load module '{}': {}", name, e);
                    results.push((name, Err(e.into())));
                }
            }
        }

        let attached = runtime.router.resolve_pending_children();
        if attached > 0 {
            tracing::debug!("Attached {} pending subcommand(s)", attached);
        }
        let unresolved = runtime.router.pending_count();
        if unresolved > 0 {
            tracing::warn!("{} subcommand(s) still unresolved after load", unresolved);
        }

        let mut activated = false;
        for s in staged {
            let name = s.record.name.clone();
            let result = self.activate(runtime, s).await;
            activated |= result.is_ok();
            results.push((name, result));
        }

        if activated {
            runtime.profiles.invalidate_all().await;
        }
        results
    }

    /// Discovered -> Loading: enumerate and process exports
    fn stage(&self, runtime: &Arc<Runtime>, manifest: ModuleManifest) -> Result<Staged, ModuleError> {
        let module = self
            .catalog
            .instantiate(&manifest.name)
            .ok_or_else(|| ModuleError::NotInCatalog(manifest.name.clone()))?;

        let mut record = ModuleRecord::new(manifest);
        record.state = ModuleState::Loading;
        self.set_state(&record.name, ModuleState::Loading);

        let mut registrar = ModuleRegistrar::new();
        let registered = catch_unwind(AssertUnwindSafe(|| module.register(&mut registrar)));
        let failure = match registered {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some("register panicked".to_string()),
        };
        if let Some(reason) = failure {
            // nothing reached the router yet
            self.set_state(&record.name, ModuleState::Unloaded);
            return Err(ModuleError::Registration {
                module: record.name,
                reason,
            });
        }
        tracing::debug!(
            "Module '{}' exported {} definition(s)",
            record.name,
            registrar.exports.len()
        );

        for export in registrar.exports {
            runtime.router.process_export(export, &mut record);
        }

        Ok(Staged {
            record,
            module,
            nodes: registrar.permission_nodes,
        })
    }

    /// Loading -> Active: permission nodes, init hook, settings schema
    async fn activate(&self, runtime: &Arc<Runtime>, staged: Staged) -> Result<(), BotError> {
        let Staged {
            mut record,
            module,
            nodes,
        } = staged;
        let name = record.name.clone();

        for (path, evaluator) in nodes {
            if let Err(e) = runtime.permissions.register_owned(&path, &name, evaluator) {
                let reason = format!("permission node '{}': {}", path, e);
                self.rollback(runtime, &record);
                return Err(ModuleError::Registration { module: name, reason }.into());
            }
            record.permission_nodes.push(path);
        }

        let ctx = InitContext {
            runtime: Arc::clone(runtime),
            manifest: record.manifest.clone(),
        };
        let init_module = Arc::clone(&module);
        let outcome = tokio::spawn(async move { init_module.init(ctx).await }).await;

        let mut setup = match outcome {
            Ok(Ok(setup)) => setup,
            Ok(Err(e)) => return Err(self.reject(runtime, &record, e.to_string())),
            Err(join_error) if join_error.is_panic() => {
                return Err(self.reject(runtime, &record, "init panicked".to_string()))
            }
            Err(join_error) => return Err(self.reject(runtime, &record, join_error.to_string())),
        };

        if let Err(reason) = self.check_setup(runtime, &name, &setup) {
            return Err(self.reject(runtime, &record, reason));
        }

        for def in setup.settings.iter_mut().chain(setup.user_settings.iter_mut()) {
            def.module = name.clone();
        }
        runtime
            .schemas
            .set_module(&name, setup.settings.clone(), setup.user_settings.clone());
        record.settings = setup.settings;
        record.user_settings = setup.user_settings;
        record.interface = setup.interface;
        record.state = ModuleState::Active;

        tracing::info!(
            "Loaded module '{}' v{} ({} command(s))",
            name,
            record.version,
            record.commands().len()
        );
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), record);
        self.instances
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), module);
        self.set_state(&name, ModuleState::Active);
        Ok(())
    }

    fn check_setup(&self, runtime: &Arc<Runtime>, name: &str, setup: &ModuleSetup) -> Result<(), String> {
        setup.check_ids()?;

        for def in &setup.settings {
            if let Some(owner) = runtime.schemas.owner_of(&def.id) {
                if owner != name {
                    return Err(format!("setting '{}' is already owned by '{}'", def.id, owner));
                }
            }
        }
        for def in &setup.user_settings {
            if let Some(owner) = runtime.schemas.owner_of_member(&def.id) {
                if owner != name {
                    return Err(format!("user setting '{}' is already owned by '{}'", def.id, owner));
                }
            }
        }
        for def in setup.settings.iter().chain(&setup.user_settings) {
            def.kind
                .validate(&def.default)
                .map_err(|e| format!("default of '{}' is invalid: {}", def.id, e))?;
        }
        Ok(())
    }

    fn reject(&self, runtime: &Arc<Runtime>, record: &ModuleRecord, reason: String) -> BotError {
        tracing::error!("Init of module '{}' rejected: {}", record.name, reason);
        self.rollback(runtime, record);
        ModuleError::InitRejected {
            module: record.name.clone(),
            reason,
        }
        .into()
    }

    /// Undo everything a failed load registered
    fn rollback(&self, runtime: &Arc<Runtime>, record: &ModuleRecord) {
        runtime.router.unregister_module(record);
        for node in &record.permission_nodes {
            runtime.permissions.remove_owned(node, &record.name);
        }
        self.set_state(&record.name, ModuleState::Unloaded);
    }

    /// Unload a module, optionally re-publishing the command surface
    pub async fn unload(
        &self,
        runtime: &Arc<Runtime>,
        name: &str,
        sync: Option<SyncScope>,
    ) -> Result<(), BotError> {
        let _guard = self.lifecycle.lock().await;
        self.unload_locked(runtime, name).await?;

        if let Some(scope) = sync {
            runtime.sync_commands(&scope).await?;
        }
        Ok(())
    }

    async fn unload_locked(&self, runtime: &Arc<Runtime>, name: &str) -> Result<(), BotError> {
        let record = {
            let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
            match records.get_mut(name) {
                Some(record) => {
                    record.state = ModuleState::Unloading;
                    record.clone()
                }
                None => return Err(ModuleError::NotLoaded(name.to_string()).into()),
            }
        };
        self.set_state(name, ModuleState::Unloading);

        let instance = self
            .instances
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        if let Some(module) = instance {
            module.shutdown(runtime).await;
        }

        runtime.router.unregister_module(&record);
        for node in &record.permission_nodes {
            runtime.permissions.remove_owned(node, name);
        }
        runtime.schemas.remove_module(name);
        runtime.profiles.invalidate_all().await;

        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        self.set_state(name, ModuleState::Unloaded);
        tracing::info!("Unloaded module '{}'", name);
        Ok(())
    }

    /// Unload then load. A failed load leaves the module unloaded.
    pub async fn reload(&self, runtime: &Arc<Runtime>, name: &str) -> Result<(), BotError> {
        let _guard = self.lifecycle.lock().await;
        self.unload_locked(runtime, name).await?;

        if let Err(e) = self.load_locked(runtime, name).await {
            tracing::error!("Reload of module '{}' failed, it stays unloaded: {}", name, e);
            return Err(e);
        }
        tracing::info!("Reloaded module '{}'", name);
        Ok(())
    }

    pub fn state(&self, name: &str) -> Option<ModuleState> {
        self.states
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .copied()
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Snapshot of every live module
    pub fn list(&self) -> Vec<ModuleRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn record(&self, name: &str) -> Option<ModuleRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Typed interface a module returned from init
    pub fn interface<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        let interface = self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)?
            .interface
            .clone()?;
        interface.downcast::<T>().ok()
    }
}
