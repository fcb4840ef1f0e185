//! Settings declared by active modules

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use crate::domain::entities::SettingDef;

#[derive(Debug, Clone, Default)]
struct ModuleSchema {
    settings: Vec<SettingDef>,
    user_settings: Vec<SettingDef>,
}

/// Tenant and member setting definitions, grouped by module
#[derive(Debug, Default)]
pub struct SettingsSchema {
    modules: RwLock<BTreeMap<String, ModuleSchema>>,
}

impl SettingsSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_module(&self, module: &str, settings: Vec<SettingDef>, user_settings: Vec<SettingDef>) {
        let mut modules = self.modules.write().unwrap_or_else(PoisonError::into_inner);
        modules.insert(module.to_string(), ModuleSchema { settings, user_settings });
    }

    pub fn remove_module(&self, module: &str) -> bool {
        let mut modules = self.modules.write().unwrap_or_else(PoisonError::into_inner);
        modules.remove(module).is_some()
    }

    /// Every tenant setting, in module order
    pub fn guild_settings(&self) -> Vec<SettingDef> {
        let modules = self.modules.read().unwrap_or_else(PoisonError::into_inner);
        modules.values().flat_map(|m| m.settings.iter().cloned()).collect()
    }

    pub fn member_settings(&self) -> Vec<SettingDef> {
        let modules = self.modules.read().unwrap_or_else(PoisonError::into_inner);
        modules.values().flat_map(|m| m.user_settings.iter().cloned()).collect()
    }

    pub fn find(&self, id: &str) -> Option<SettingDef> {
        self.guild_settings().into_iter().find(|d| d.id == id)
    }

    pub fn find_member(&self, id: &str) -> Option<SettingDef> {
        self.member_settings().into_iter().find(|d| d.id == id)
    }

    /// Module that declared tenant setting `id`
    pub fn owner_of(&self, id: &str) -> Option<String> {
        let modules = self.modules.read().unwrap_or_else(PoisonError::into_inner);
        modules
            .iter()
            .find(|(_, m)| m.settings.iter().any(|d| d.id == id))
            .map(|(name, _)| name.clone())
    }

    /// Module that declared member setting `id`
    pub fn owner_of_member(&self, id: &str) -> Option<String> {
        let modules = self.modules.read().unwrap_or_else(PoisonError::into_inner);
        modules
            .iter()
            .find(|(_, m)| m.user_settings.iter().any(|d| d.id == id))
            .map(|(name, _)| name.clone())
    }
}
