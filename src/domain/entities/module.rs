use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use super::SettingDef;
use crate::infrastructure::plugins::ModuleManifest;

/// Lifecycle state of a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleState {
    Discovered,
    Loading,
    Active,
    Unloading,
    Unloaded,
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModuleState::Discovered => "discovered",
            ModuleState::Loading => "loading",
            ModuleState::Active => "active",
            ModuleState::Unloading => "unloading",
            ModuleState::Unloaded => "unloaded",
        };
        write!(f, "{}", s)
    }
}

/// Something the router credited to a module, removed again on unload
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RegistrationKey {
    Command(String),
    Group(String),
    Subcommand { parent: String, name: String },
    Help(String),
    Event { event: String, id: String },
}

impl fmt::Display for RegistrationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationKey::Command(name) => write!(f, "command:{}", name),
            RegistrationKey::Group(name) => write!(f, "group:{}", name),
            RegistrationKey::Subcommand { parent, name } => {
                write!(f, "subcommand:{} {}", parent, name)
            }
            RegistrationKey::Help(name) => write!(f, "help:{}", name),
            RegistrationKey::Event { event, .. } => write!(f, "event:{}", event),
        }
    }
}

/// One live module and everything it owns
#[derive(Clone)]
pub struct ModuleRecord {
    pub name: String,
    pub version: String,
    pub manifest: ModuleManifest,
    pub state: ModuleState,
    pub registrations: BTreeSet<RegistrationKey>,
    pub permission_nodes: Vec<String>,
    pub settings: Vec<SettingDef>,
    pub user_settings: Vec<SettingDef>,
    pub interface: Option<Arc<dyn Any + Send + Sync>>,
}

impl ModuleRecord {
    pub fn new(manifest: ModuleManifest) -> Self {
        Self {
            name: manifest.name.clone(),
            version: manifest.version.clone(),
            manifest,
            state: ModuleState::Discovered,
            registrations: BTreeSet::new(),
            permission_nodes: Vec::new(),
            settings: Vec::new(),
            user_settings: Vec::new(),
            interface: None,
        }
    }

    pub fn commands(&self) -> Vec<String> {
        self.registrations
            .iter()
            .filter_map(|key| match key {
                RegistrationKey::Command(name) | RegistrationKey::Group(name) => Some(name.clone()),
                RegistrationKey::Subcommand { parent, name } => Some(format!("{} {}", parent, name)),
                _ => None,
            })
            .collect()
    }
}

impl fmt::Debug for ModuleRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRecord")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("state", &self.state)
            .field("registrations", &self.registrations)
            .field("permission_nodes", &self.permission_nodes)
            .field("has_interface", &self.interface.is_some())
            .finish()
    }
}
