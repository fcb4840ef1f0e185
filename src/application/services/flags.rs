//! Feature flags: global defaults with per-tenant values
//!
//! Modules register a flag with its default. A tenant document may store its
//! own value under `flags.<name>`; reads fall back to the registered default
//! when the tenant has none.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use serde_json::Value;

use crate::application::errors::SettingError;
use crate::domain::entities::TenantProfile;

#[derive(Debug, Default)]
pub struct FlagRegistry {
    defaults: RwLock<BTreeMap<String, Value>>,
}

impl FlagRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `flag` with its global default, replacing any earlier default
    pub fn register_flag(&self, flag: &str, default: Value) -> Result<(), SettingError> {
        if flag.is_empty() || flag.contains('.') {
            return Err(SettingError::InvalidId(flag.to_string()));
        }
        let mut defaults = self.defaults.write().unwrap_or_else(PoisonError::into_inner);
        if defaults.insert(flag.to_string(), default).is_some() {
            tracing::warn!(flag, "Flag already registered, overwriting its default");
        }
        Ok(())
    }

    pub fn delete_flag(&self, flag: &str) -> bool {
        let mut defaults = self.defaults.write().unwrap_or_else(PoisonError::into_inner);
        defaults.remove(flag).is_some()
    }

    pub fn is_registered(&self, flag: &str) -> bool {
        let defaults = self.defaults.read().unwrap_or_else(PoisonError::into_inner);
        defaults.contains_key(flag)
    }

    pub fn default_of(&self, flag: &str) -> Option<Value> {
        let defaults = self.defaults.read().unwrap_or_else(PoisonError::into_inner);
        defaults.get(flag).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let defaults = self.defaults.read().unwrap_or_else(PoisonError::into_inner);
        defaults.keys().cloned().collect()
    }

    /// Tenant value of `flag`, or the global default
    pub fn get(&self, profile: &TenantProfile, flag: &str) -> Option<Value> {
        match profile.flags.get(flag) {
            Some(value) => Some(value.clone()),
            None => self.default_of(flag),
        }
    }

    /// Set for the tenant or registered globally
    pub fn has(&self, profile: &TenantProfile, flag: &str) -> bool {
        profile.flags.contains_key(flag) || self.is_registered(flag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::OverrideTree;
    use serde_json::json;

    fn profile(flags: Value) -> TenantProfile {
        TenantProfile {
            id: "G".into(),
            document: Default::default(),
            settings: BTreeMap::new(),
            overrides: OverrideTree::new(),
            flags: serde_json::from_value(flags).unwrap(),
        }
    }

    #[test]
    fn tenant_values_shadow_defaults() {
        let flags = FlagRegistry::new();
        flags.register_flag("beta", json!(false)).unwrap();
        flags.register_flag("prefix", json!("!")).unwrap();

        let tenant = profile(json!({"beta": true}));
        assert_eq!(flags.get(&tenant, "beta"), Some(json!(true)));
        assert_eq!(flags.get(&tenant, "prefix"), Some(json!("!")));
        assert_eq!(flags.get(&tenant, "missing"), None);

        // a stored false is a value, not a miss
        let tenant = profile(json!({"prefix": false}));
        assert_eq!(flags.get(&tenant, "prefix"), Some(json!(false)));
    }

    #[test]
    fn has_checks_tenant_and_registry() {
        let flags = FlagRegistry::new();
        flags.register_flag("beta", json!(false)).unwrap();

        let tenant = profile(json!({"legacy": 1}));
        assert!(flags.has(&tenant, "beta"));
        assert!(flags.has(&tenant, "legacy"));
        assert!(!flags.has(&tenant, "other"));

        assert!(flags.delete_flag("beta"));
        assert!(!flags.has(&tenant, "beta"));
        assert!(!flags.delete_flag("beta"));
    }

    #[test]
    fn flag_names_are_single_segments() {
        let flags = FlagRegistry::new();
        assert!(matches!(
            flags.register_flag("a.b", json!(1)),
            Err(SettingError::InvalidId(_))
        ));
        assert!(flags.register_flag("", json!(1)).is_err());
        assert!(flags.names().is_empty());
    }
}
