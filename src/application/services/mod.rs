//! Application services - profile caches, setting schemas and flags

pub mod flags;
pub mod member_service;
pub mod profile_cache;
pub mod settings_schema;

pub use flags::FlagRegistry;
pub use member_service::MemberProfiles;
pub use profile_cache::TenantProfileCache;
pub use settings_schema::SettingsSchema;
