use std::collections::BTreeMap;

use serde_json::Value;

use super::{OverrideTree, SettingInstance, SettingValue};
use crate::domain::traits::Document;

/// Merged view of a tenant: stored document plus every module's settings
#[derive(Debug, Clone)]
pub struct TenantProfile {
    pub id: String,
    /// Raw stored document, as last read
    pub document: Document,
    pub settings: BTreeMap<String, SettingInstance>,
    pub overrides: OverrideTree,
    /// Flag values stored for this tenant, without global defaults
    pub flags: BTreeMap<String, Value>,
}

impl TenantProfile {
    pub fn setting(&self, id: &str) -> Option<&SettingInstance> {
        self.settings.get(id)
    }

    pub fn value(&self, id: &str) -> Option<&SettingValue> {
        self.settings.get(id).map(|s| &s.value)
    }

    /// Locale from the `language` setting, if a module declares one
    pub fn language(&self) -> Option<&str> {
        self.value("language").and_then(SettingValue::as_str)
    }
}

/// Merged view of one member inside a tenant
#[derive(Debug, Clone)]
pub struct MemberProfile {
    pub member_id: String,
    pub tenant_id: String,
    pub document: Document,
    pub settings: BTreeMap<String, SettingInstance>,
}

impl MemberProfile {
    pub fn value(&self, id: &str) -> Option<&SettingValue> {
        self.settings.get(id).map(|s| &s.value)
    }
}
