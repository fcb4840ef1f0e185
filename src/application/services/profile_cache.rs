//! Tenant profile cache
//!
//! Each tenant gets its own async slot, so a load for one tenant never blocks
//! readers of another and two concurrent misses for the same tenant load the
//! document once. Invalidation empties the slot; eviction removes it.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use super::{FlagRegistry, SettingsSchema};
use crate::application::errors::{BotError, SettingError, StorageError};
use crate::domain::entities::{OverrideTree, SettingValue, TenantProfile};
use crate::domain::traits::store::{apply_set, doc};
use crate::domain::traits::{Document, DocumentStore};

pub const GUILDS: &str = "guilds";
pub const SETTINGS_FIELD: &str = "settings";
pub const OVERRIDES_FIELD: &str = "permissionsOverrides";
pub const FLAGS_FIELD: &str = "flags";

type Slot = Arc<Mutex<Option<Arc<TenantProfile>>>>;

pub struct TenantProfileCache {
    store: Arc<dyn DocumentStore>,
    schema: Arc<SettingsSchema>,
    flags: FlagRegistry,
    slots: DashMap<String, Slot>,
}

impl TenantProfileCache {
    pub fn new(store: Arc<dyn DocumentStore>, schema: Arc<SettingsSchema>) -> Self {
        Self {
            store,
            schema,
            flags: FlagRegistry::new(),
            slots: DashMap::new(),
        }
    }

    /// Global flag defaults
    pub fn flags(&self) -> &FlagRegistry {
        &self.flags
    }

    fn slot(&self, tenant: &str) -> Slot {
        self.slots.entry(tenant.to_string()).or_default().clone()
    }

    /// Cached profile, loading and merging it on a miss. Storage errors
    /// leave the cache as it was.
    pub async fn fetch_or_create(&self, tenant: &str) -> Result<Arc<TenantProfile>, StorageError> {
        let slot = self.slot(tenant);
        let mut cached = slot.lock().await;
        if let Some(profile) = cached.as_ref() {
            return Ok(Arc::clone(profile));
        }

        let profile = Arc::new(self.load(tenant).await?);
        *cached = Some(Arc::clone(&profile));
        Ok(profile)
    }

    async fn load(&self, tenant: &str) -> Result<TenantProfile, StorageError> {
        let filter = doc(json!({ "_id": tenant }));

        let mut document = match self.store.find_one(GUILDS, &filter).await? {
            Some(document) => document,
            None => self.create(tenant, &filter).await?,
        };

        let stored = document
            .get(SETTINGS_FIELD)
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let mut settings = BTreeMap::new();
        let mut defaults = Document::new();

        for def in self.schema.guild_settings() {
            let instance = match stored.get(&def.id) {
                Some(raw) => match def.from_stored(Some(raw)) {
                    Ok(instance) => instance,
                    Err(e) => {
                        tracing::error!(tenant, setting = %def.id, "Failed to parse stored setting: {}", e);
                        def.instantiate(def.default.clone())
                    }
                },
                None => {
                    match def.kind.to_database(&def.default) {
                        Ok(raw) => {
                            defaults.insert(format!("{}.{}", SETTINGS_FIELD, def.id), raw);
                        }
                        Err(e) => {
                            tracing::error!(tenant, setting = %def.id, "Invalid default value: {}", e);
                        }
                    }
                    def.instantiate(def.default.clone())
                }
            };
            settings.insert(def.id.clone(), instance);
        }

        if !defaults.is_empty() {
            self.store.update_set(GUILDS, &filter, &defaults, true).await?;
            apply_set(&mut document, &defaults);
            tracing::debug!(tenant, count = defaults.len(), "Persisted default settings");
        }

        let overrides = match document.get(OVERRIDES_FIELD) {
            Some(raw) => serde_json::from_value::<OverrideTree>(raw.clone()).unwrap_or_else(|e| {
                tracing::warn!(tenant, "Ignoring malformed permission overrides: {}", e);
                OverrideTree::new()
            }),
            None => OverrideTree::new(),
        };

        let flags = match document.get(FLAGS_FIELD) {
            Some(Value::Object(map)) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            Some(other) => {
                tracing::warn!(tenant, "Ignoring malformed flags: {}", other);
                BTreeMap::new()
            }
            None => BTreeMap::new(),
        };

        Ok(TenantProfile {
            id: tenant.to_string(),
            document,
            settings,
            overrides,
            flags,
        })
    }

    async fn create(&self, tenant: &str, filter: &Document) -> Result<Document, StorageError> {
        let minimal = doc(json!({
            "_id": tenant,
            "settings": {},
            "permissionsOverrides": {},
            "flags": {},
        }));

        match self.store.insert(GUILDS, minimal.clone()).await {
            Ok(()) => {
                tracing::info!(tenant, "Created tenant profile");
                Ok(minimal)
            }
            // somebody else created it in the meantime
            Err(StorageError::Conflict(_)) => Ok(self
                .store
                .find_one(GUILDS, filter)
                .await?
                .unwrap_or(minimal)),
            Err(e) => Err(e),
        }
    }

    /// Drop the merged view; the next fetch reloads it
    pub async fn invalidate(&self, tenant: &str) {
        let slot = self.slots.get(tenant).map(|s| Arc::clone(s.value()));
        if let Some(slot) = slot {
            *slot.lock().await = None;
            tracing::debug!(tenant, "Tenant profile invalidated");
        }
    }

    pub fn evict(&self, tenant: &str) -> bool {
        self.slots.remove(tenant).is_some()
    }

    /// Invalidate every tenant, used after module schemas change
    pub async fn invalidate_all(&self) {
        let slots: Vec<Slot> = self.slots.iter().map(|s| Arc::clone(s.value())).collect();
        for slot in slots {
            *slot.lock().await = None;
        }
        tracing::debug!("All tenant profiles invalidated");
    }

    pub async fn cached(&self, tenant: &str) -> Option<Arc<TenantProfile>> {
        let slot = self.slots.get(tenant).map(|s| Arc::clone(s.value()))?;
        let cached = slot.lock().await;
        cached.clone()
    }

    pub fn cached_tenants(&self) -> usize {
        self.slots.len()
    }

    /// Validate and persist one tenant setting, returning the fresh profile
    pub async fn save_setting(
        &self,
        tenant: &str,
        id: &str,
        value: SettingValue,
    ) -> Result<Arc<TenantProfile>, BotError> {
        let def = self
            .schema
            .find(id)
            .ok_or_else(|| SettingError::Unknown(id.to_string()))?;
        let raw = def.kind.to_database(&value)?;

        let filter = doc(json!({ "_id": tenant }));
        let mut set = Document::new();
        set.insert(format!("{}.{}", SETTINGS_FIELD, id), raw);
        self.store.update_set(GUILDS, &filter, &set, true).await?;
        tracing::info!(tenant, setting = id, "Setting updated to {}", value);

        self.invalidate(tenant).await;
        Ok(self.fetch_or_create(tenant).await?)
    }

    /// Parse operator text for a setting, then save it
    pub async fn save_setting_input(
        &self,
        tenant: &str,
        id: &str,
        input: &str,
    ) -> Result<Arc<TenantProfile>, BotError> {
        let def = self
            .schema
            .find(id)
            .ok_or_else(|| SettingError::Unknown(id.to_string()))?;
        let value = def.kind.parse_input(input)?;
        self.save_setting(tenant, id, value).await
    }

    pub async fn save_overrides(&self, tenant: &str, overrides: &OverrideTree) -> Result<(), BotError> {
        let raw = serde_json::to_value(overrides).map_err(StorageError::from)?;
        let filter = doc(json!({ "_id": tenant }));
        let mut set = Document::new();
        set.insert(OVERRIDES_FIELD.to_string(), raw);

        self.store.update_set(GUILDS, &filter, &set, true).await?;
        tracing::info!(tenant, "Permission overrides updated");
        self.invalidate(tenant).await;
        Ok(())
    }

    /// Store a tenant value for a registered flag. Unregistered flags are
    /// ignored and return `false`.
    pub async fn set_flag(&self, tenant: &str, flag: &str, value: Value) -> Result<bool, BotError> {
        if !self.flags.is_registered(flag) {
            tracing::warn!(tenant, flag, "Flag is not registered, ignoring");
            return Ok(false);
        }

        let filter = doc(json!({ "_id": tenant }));
        let mut set = Document::new();
        set.insert(format!("{}.{}", FLAGS_FIELD, flag), value);
        self.store.update_set(GUILDS, &filter, &set, true).await?;
        tracing::info!(tenant, flag, "Flag updated");

        self.invalidate(tenant).await;
        Ok(true)
    }

    /// Remove the tenant value of `flag` so reads fall back to the default
    pub async fn delete_flag(&self, tenant: &str, flag: &str) -> Result<bool, BotError> {
        let profile = self.fetch_or_create(tenant).await?;
        if !profile.flags.contains_key(flag) {
            return Ok(false);
        }

        let mut remaining: serde_json::Map<String, Value> =
            profile.flags.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        remaining.remove(flag);

        let filter = doc(json!({ "_id": tenant }));
        let mut set = Document::new();
        set.insert(FLAGS_FIELD.to_string(), Value::Object(remaining));
        self.store.update_set(GUILDS, &filter, &set, true).await?;
        tracing::info!(tenant, flag, "Flag cleared");

        self.invalidate(tenant).await;
        Ok(true)
    }

    /// Effective value of `flag` for a tenant
    pub async fn flag(&self, tenant: &str, flag: &str) -> Result<Option<Value>, StorageError> {
        let profile = self.fetch_or_create(tenant).await?;
        Ok(self.flags.get(&profile, flag))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{OverrideEntry, SettingDef, SettingKind};
    use crate::infrastructure::storage::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Memory store that counts `update_set` calls
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryStore,
        updates: AtomicUsize,
        fail: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl DocumentStore for CountingStore {
        async fn find_one(&self, collection: &str, filter: &Document) -> Result<Option<Document>, StorageError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(StorageError::Database("offline".into()));
            }
            self.inner.find_one(collection, filter).await
        }

        async fn insert(&self, collection: &str, document: Document) -> Result<(), StorageError> {
            self.inner.insert(collection, document).await
        }

        async fn update_set(&self, collection: &str, filter: &Document, set: &Document, upsert: bool) -> Result<bool, StorageError> {
            self.updates.fetch_add(1, Ordering::SeqCst);
            self.inner.update_set(collection, filter, set, upsert).await
        }

        async fn delete(&self, collection: &str, filter: &Document) -> Result<bool, StorageError> {
            self.inner.delete(collection, filter).await
        }

        async fn count(&self, collection: &str, filter: &Document) -> Result<usize, StorageError> {
            self.inner.count(collection, filter).await
        }
    }

    fn schema() -> Arc<SettingsSchema> {
        let schema = Arc::new(SettingsSchema::new());
        schema.set_module(
            "M",
            vec![
                SettingDef::new(
                    "lang",
                    SettingKind::Select { options: vec!["en".into(), "pt".into()] },
                    SettingValue::text("en"),
                ),
                SettingDef::new("xp_rate", SettingKind::Number { min: Some(0.0), max: Some(5.0) }, SettingValue::Number(1.0)),
            ],
            vec![],
        );
        schema
    }

    fn cache() -> (TenantProfileCache, Arc<CountingStore>) {
        let store = Arc::new(CountingStore::default());
        (TenantProfileCache::new(store.clone(), schema()), store)
    }

    #[tokio::test]
    async fn defaults_are_merged_and_persisted_once() {
        let (cache, store) = cache();

        let profile = cache.fetch_or_create("G").await.unwrap();
        assert_eq!(profile.value("lang"), Some(&SettingValue::text("en")));
        assert_eq!(store.updates.load(Ordering::SeqCst), 1);

        let stored = store.inner.find_one(GUILDS, &doc(json!({"_id": "G"}))).await.unwrap().unwrap();
        assert_eq!(stored["settings"], json!({"lang": "en", "xp_rate": 1}));
        assert_eq!(stored["permissionsOverrides"], json!({}));

        // cached: no further writes
        cache.fetch_or_create("G").await.unwrap();
        cache.invalidate("G").await;
        cache.fetch_or_create("G").await.unwrap();
        assert_eq!(store.updates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stored_values_win_and_bad_values_fall_back() {
        let (cache, store) = cache();
        store
            .inner
            .insert(GUILDS, doc(json!({"_id": "G", "settings": {"lang": "pt", "xp_rate": 99}})))
            .await
            .unwrap();

        let profile = cache.fetch_or_create("G").await.unwrap();
        assert_eq!(profile.value("lang"), Some(&SettingValue::text("pt")));
        assert_eq!(profile.value("xp_rate"), Some(&SettingValue::Number(1.0)));
        // the bad stored value is not overwritten
        assert_eq!(store.updates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn concurrent_fetch_after_invalidate_share_one_entry() {
        let (cache, _store) = cache();
        let cache = Arc::new(cache);
        cache.fetch_or_create("G").await.unwrap();
        cache.invalidate("G").await;

        let (a, b) = tokio::join!(
            {
                let cache = cache.clone();
                async move { cache.fetch_or_create("G").await.unwrap() }
            },
            {
                let cache = cache.clone();
                async move { cache.fetch_or_create("G").await.unwrap() }
            }
        );
        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&a, &cache.cached("G").await.unwrap()));
    }

    #[tokio::test]
    async fn storage_errors_leave_cache_empty() {
        let (cache, store) = cache();
        store.fail.store(true, Ordering::SeqCst);

        assert!(cache.fetch_or_create("G").await.is_err());
        assert!(cache.cached("G").await.is_none());

        store.fail.store(false, Ordering::SeqCst);
        assert!(cache.fetch_or_create("G").await.is_ok());
    }

    #[tokio::test]
    async fn save_setting_validates_and_refreshes() {
        let (cache, _store) = cache();
        cache.fetch_or_create("G").await.unwrap();

        let profile = cache.save_setting_input("G", "lang", "PT").await.unwrap();
        assert_eq!(profile.value("lang"), Some(&SettingValue::text("pt")));

        assert!(matches!(
            cache.save_setting("G", "lang", SettingValue::text("de")).await,
            Err(BotError::Setting(SettingError::InvalidOption(_)))
        ));
        assert!(matches!(
            cache.save_setting("G", "missing", SettingValue::Null).await,
            Err(BotError::Setting(SettingError::Unknown(_)))
        ));
    }

    #[tokio::test]
    async fn saved_overrides_are_loaded() {
        let (cache, _store) = cache();
        let tree = OverrideTree::from_entries(&[OverrideEntry {
            id: "Role.1".into(),
            allow: vec!["Commands.*".into()],
            deny: vec![],
        }])
        .unwrap();

        cache.save_overrides("G", &tree).await.unwrap();
        let profile = cache.fetch_or_create("G").await.unwrap();
        assert_eq!(profile.overrides, tree);
    }

    #[tokio::test]
    async fn malformed_overrides_become_empty() {
        let (cache, store) = cache();
        store
            .inner
            .insert(GUILDS, doc(json!({"_id": "G", "permissionsOverrides": {"Commands": 5}})))
            .await
            .unwrap();

        assert!(cache.fetch_or_create("G").await.unwrap().overrides.is_empty());
    }

    #[tokio::test]
    async fn flags_fall_back_to_registered_defaults() {
        let (cache, store) = cache();
        cache.flags().register_flag("beta", json!(false)).unwrap();

        assert_eq!(cache.flag("G", "beta").await.unwrap(), Some(json!(false)));
        assert!(!cache.set_flag("G", "unknown", json!(1)).await.unwrap());

        assert!(cache.set_flag("G", "beta", json!(true)).await.unwrap());
        assert_eq!(cache.flag("G", "beta").await.unwrap(), Some(json!(true)));
        let stored = store.inner.find_one(GUILDS, &doc(json!({"_id": "G"}))).await.unwrap().unwrap();
        assert_eq!(stored["flags"], json!({"beta": true}));

        assert!(cache.delete_flag("G", "beta").await.unwrap());
        assert!(!cache.delete_flag("G", "beta").await.unwrap());
        let profile = cache.fetch_or_create("G").await.unwrap();
        assert!(profile.flags.is_empty());
        assert_eq!(cache.flags().get(&profile, "beta"), Some(json!(false)));
    }

    #[tokio::test]
    async fn malformed_flags_become_empty() {
        let (cache, store) = cache();
        store
            .inner
            .insert(GUILDS, doc(json!({"_id": "G", "flags": [1, 2]})))
            .await
            .unwrap();

        assert!(cache.fetch_or_create("G").await.unwrap().flags.is_empty());
    }

    #[tokio::test]
    async fn evict_removes_slot() {
        let (cache, _store) = cache();
        cache.fetch_or_create("G").await.unwrap();
        assert_eq!(cache.cached_tenants(), 1);
        assert!(cache.evict("G"));
        assert!(cache.cached("G").await.is_none());
    }
}
