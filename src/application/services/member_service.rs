//! Member profiles
//!
//! Members are keyed by `(memberId, guildId)`. Profiles are computed on
//! each access and defaults stay in memory; only explicit saves write.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};

use super::SettingsSchema;
use crate::application::errors::{BotError, SettingError, StorageError};
use crate::domain::entities::{MemberProfile, SettingValue};
use crate::domain::traits::store::doc;
use crate::domain::traits::{Document, DocumentStore};

pub const MEMBERS: &str = "members";

pub struct MemberProfiles {
    store: Arc<dyn DocumentStore>,
    schema: Arc<SettingsSchema>,
}

fn member_filter(tenant: &str, member: &str) -> Document {
    doc(json!({ "memberId": member, "guildId": tenant }))
}

impl MemberProfiles {
    pub fn new(store: Arc<dyn DocumentStore>, schema: Arc<SettingsSchema>) -> Self {
        Self { store, schema }
    }

    pub async fn fetch_or_create_member(&self, tenant: &str, member: &str) -> Result<MemberProfile, StorageError> {
        let filter = member_filter(tenant, member);

        let document = match self.store.find_one(MEMBERS, &filter).await? {
            Some(document) => document,
            None => {
                let minimal = doc(json!({
                    "_id": format!("{}:{}", tenant, member),
                    "memberId": member,
                    "guildId": tenant,
                    "settings": {},
                }));
                match self.store.insert(MEMBERS, minimal.clone()).await {
                    Ok(()) | Err(StorageError::Conflict(_)) => {}
                    Err(e) => return Err(e),
                }
                tracing::debug!(tenant, member, "Created member profile");
                minimal
            }
        };

        let stored = document
            .get("settings")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let mut settings = BTreeMap::new();
        for def in self.schema.member_settings() {
            let instance = def.from_stored(stored.get(&def.id)).unwrap_or_else(|e| {
                tracing::warn!(tenant, member, setting = %def.id, "Failed to parse stored setting: {}", e);
                def.instantiate(def.default.clone())
            });
            settings.insert(def.id.clone(), instance);
        }

        Ok(MemberProfile {
            member_id: member.to_string(),
            tenant_id: tenant.to_string(),
            document,
            settings,
        })
    }

    pub async fn save_member_setting(
        &self,
        tenant: &str,
        member: &str,
        id: &str,
        value: SettingValue,
    ) -> Result<MemberProfile, BotError> {
        let def = self
            .schema
            .find_member(id)
            .ok_or_else(|| SettingError::Unknown(id.to_string()))?;
        let raw = def.kind.to_database(&value)?;

        // make sure the document exists with its composite id
        self.fetch_or_create_member(tenant, member).await?;

        let mut set = Document::new();
        set.insert(format!("settings.{}", id), raw);
        self.store
            .update_set(MEMBERS, &member_filter(tenant, member), &set, true)
            .await?;

        Ok(self.fetch_or_create_member(tenant, member).await?)
    }

    pub async fn delete_member(&self, tenant: &str, member: &str) -> Result<bool, StorageError> {
        self.store.delete(MEMBERS, &member_filter(tenant, member)).await
    }

    pub async fn count_members(&self, tenant: &str) -> Result<usize, StorageError> {
        self.store.count(MEMBERS, &doc(json!({ "guildId": tenant }))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{SettingDef, SettingKind};
    use crate::infrastructure::storage::MemoryStore;

    fn profiles() -> (MemberProfiles, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let schema = Arc::new(SettingsSchema::new());
        schema.set_module(
            "Defaults",
            vec![],
            vec![SettingDef::new("dm_notifications", SettingKind::Boolean, SettingValue::Bool(false))],
        );
        (MemberProfiles::new(store.clone(), schema), store)
    }

    #[tokio::test]
    async fn defaults_are_not_written_back() {
        let (profiles, store) = profiles();
        let profile = profiles.fetch_or_create_member("G", "U").await.unwrap();

        assert_eq!(profile.value("dm_notifications"), Some(&SettingValue::Bool(false)));
        let stored = store.find_one(MEMBERS, &member_filter("G", "U")).await.unwrap().unwrap();
        assert_eq!(stored["settings"], json!({}));
    }

    #[tokio::test]
    async fn members_are_scoped_per_tenant() {
        let (profiles, _store) = profiles();
        profiles
            .save_member_setting("G1", "U", "dm_notifications", SettingValue::Bool(true))
            .await
            .unwrap();

        let other = profiles.fetch_or_create_member("G2", "U").await.unwrap();
        assert_eq!(other.value("dm_notifications"), Some(&SettingValue::Bool(false)));
        let same = profiles.fetch_or_create_member("G1", "U").await.unwrap();
        assert_eq!(same.value("dm_notifications"), Some(&SettingValue::Bool(true)));

        assert_eq!(profiles.count_members("G1").await.unwrap(), 1);
        assert!(profiles.delete_member("G1", "U").await.unwrap());
        assert_eq!(profiles.count_members("G1").await.unwrap(), 0);
    }
}
