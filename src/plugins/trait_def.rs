//! Module trait definitions

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;

use crate::application::errors::BotError;
use crate::application::permissions::resolver::PermissionEvaluator;
use crate::domain::entities::{
    Actor, Bundle, Command, CommandGroup, CommandHelp, EventSubscription, Export, SettingDef,
    Subcommand, TenantContext,
};
use crate::infrastructure::plugins::ModuleManifest;
use crate::runtime::Runtime;

/// Core trait every compiled-in module implements
#[async_trait]
pub trait Module: Send + Sync {
    /// Unique identifier, matched against `manifest.json`
    fn name(&self) -> &str;

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn description(&self) -> &str {
        ""
    }

    /// Enumerate commands, events and permission nodes. Called once per load.
    /// An error or panic here rejects the load before anything is attached.
    fn register(&self, registrar: &mut ModuleRegistrar) -> Result<(), BotError>;

    /// Called after the module's exports are attached. The returned setup
    /// becomes the module's public interface and settings schema.
    async fn init(&self, _ctx: InitContext) -> Result<ModuleSetup, BotError> {
        Ok(ModuleSetup::default())
    }

    /// Optional: release resources when the module is unloaded
    async fn shutdown(&self, _runtime: &Arc<Runtime>) {}
}

/// Handed to `Module::init`
#[derive(Clone)]
pub struct InitContext {
    pub runtime: Arc<Runtime>,
    pub manifest: ModuleManifest,
}

/// What a module's init hook returns
#[derive(Default)]
pub struct ModuleSetup {
    pub interface: Option<Arc<dyn Any + Send + Sync>>,
    pub settings: Vec<SettingDef>,
    pub user_settings: Vec<SettingDef>,
}

impl ModuleSetup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interface<T: Any + Send + Sync>(mut self, interface: T) -> Self {
        self.interface = Some(Arc::new(interface));
        self
    }

    pub fn with_setting(mut self, def: SettingDef) -> Self {
        self.settings.push(def);
        self
    }

    pub fn with_user_setting(mut self, def: SettingDef) -> Self {
        self.user_settings.push(def);
        self
    }

    /// Reject empty, dotted or duplicate ids within each schema. Ids are
    /// stored as `settings.<id>`, so a `.` would split them into a path.
    pub fn check_ids(&self) -> Result<(), String> {
        for (label, defs) in [("setting", &self.settings), ("user setting", &self.user_settings)] {
            let mut seen = BTreeSet::new();
            for def in defs {
                if def.id.trim().is_empty() {
                    return Err(format!("{} with an empty id", label));
                }
                if def.id.contains('.') {
                    return Err(format!("{} id '{}' must not contain '.'", label, def.id));
                }
                if !seen.insert(def.id.as_str()) {
                    return Err(format!("duplicate {} id '{}'", label, def.id));
                }
            }
        }
        Ok(())
    }
}

/// Collects a module's exports during `Module::register`
#[derive(Default)]
pub struct ModuleRegistrar {
    pub(crate) exports: Vec<Export>,
    pub(crate) permission_nodes: Vec<(String, PermissionEvaluator)>,
}

impl ModuleRegistrar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn export(&mut self, export: Export) -> &mut Self {
        self.exports.push(export);
        self
    }

    pub fn command(&mut self, command: Command) -> &mut Self {
        self.export(Export::Leaf(command))
    }

    pub fn group(&mut self, group: CommandGroup) -> &mut Self {
        self.export(Export::Group(group))
    }

    /// Attach `command` to the group `parent`, whoever ends up owning it
    pub fn subcommand(&mut self, parent: impl Into<String>, command: Command) -> &mut Self {
        self.export(Export::PendingChild(Subcommand::new(parent, command)))
    }

    pub fn bundle(&mut self, bundle: Bundle) -> &mut Self {
        self.export(Export::BundledSet(bundle))
    }

    pub fn help(&mut self, help: CommandHelp) -> &mut Self {
        self.export(Export::HelpMetadata(help))
    }

    pub fn event(&mut self, subscription: EventSubscription) -> &mut Self {
        self.export(Export::Event(subscription))
    }

    pub fn permission_node(&mut self, path: impl Into<String>, evaluator: PermissionEvaluator) -> &mut Self {
        self.permission_nodes.push((path.into(), evaluator));
        self
    }

    pub fn permission_check<F>(&mut self, path: impl Into<String>, evaluator: F) -> &mut Self
    where
        F: Fn(&str, &Actor, &TenantContext) -> Result<bool, BotError> + Send + Sync + 'static,
    {
        self.permission_node(path, Arc::new(evaluator))
    }

    pub fn export_count(&self) -> usize {
        self.exports.len()
    }
}

/// Builds a fresh module instance
pub type ModuleFactory = Arc<dyn Fn() -> Arc<dyn Module> + Send + Sync>;

/// Modules compiled into this binary, by name
#[derive(Clone, Default)]
pub struct ModuleCatalog {
    factories: BTreeMap<String, ModuleFactory>,
    /// Loaded on start even without a manifest on disk
    core: BTreeSet<String>,
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// The modules shipped with guildhost
    pub fn builtin() -> Self {
        Self::new()
            .with_core(super::defaults::DEFAULTS, || super::defaults::DefaultsModule)
            .with_core(super::owner::OWNER, || super::owner::OwnerModule)
    }

    pub fn with<M, F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        M: Module + 'static,
        F: Fn() -> M + Send + Sync + 'static,
    {
        self.register(name, factory);
        self
    }

    pub fn with_core<M, F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        M: Module + 'static,
        F: Fn() -> M + Send + Sync + 'static,
    {
        let name = name.into();
        self.core.insert(name.clone());
        self.register(name, factory);
        self
    }

    pub fn register<M, F>(&mut self, name: impl Into<String>, factory: F)
    where
        M: Module + 'static,
        F: Fn() -> M + Send + Sync + 'static,
    {
        let factory: ModuleFactory = Arc::new(move || Arc::new(factory()) as Arc<dyn Module>);
        self.factories.insert(name.into(), factory);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn is_core(&self, name: &str) -> bool {
        self.core.contains(name)
    }

    pub fn instantiate(&self, name: &str) -> Option<Arc<dyn Module>> {
        self.factories.get(name).map(|factory| factory())
    }

    pub fn names(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    pub fn core_names(&self) -> Vec<String> {
        self.core.iter().cloned().collect()
    }
}
