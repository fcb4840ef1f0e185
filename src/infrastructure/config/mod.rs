//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::application::errors::ConfigError;

/// Bot configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    pub bot: BotConfig,
    pub modules: ModulesConfig,
    pub storage: StorageConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct BotConfig {
    pub name: String,
    pub prefix: String,
    /// Actor ids allowed to run owner-only commands
    pub owners: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ModulesConfig {
    pub directory: PathBuf,
    pub auto_load: bool,
    pub dispatch_timeout_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SecurityConfig {
    pub rate_limit: RateLimitConfig,
    pub audit: AuditConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub max_requests: u32,
    pub window_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AuditConfig {
    pub enabled: bool,
    pub path: Option<PathBuf>,
    /// Records buffered before the oldest are dropped
    pub capacity: usize,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: "guildhost".to_string(),
            prefix: "!".to_string(),
            owners: Vec::new(),
        }
    }
}

impl Default for ModulesConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./modules"),
            auto_load: true,
            dispatch_timeout_seconds: 30,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            path: PathBuf::from("guildhost.db"),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: 20,
            window_seconds: 60,
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: Some(PathBuf::from("logs/audit.log")),
            capacity: 1024,
        }
    }
}

impl Config {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| ConfigError::Parse(format!("Failed to read config: {}", e)))?;

        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults with environment overrides applied
    pub fn load_env() -> Self {
        Config::default().with_env_overrides()
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(prefix) = std::env::var("GUILDHOST_PREFIX") {
            self.bot.prefix = prefix;
        }

        if let Ok(owners) = std::env::var("GUILDHOST_OWNERS") {
            self.bot.owners = owners
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }

        if let Ok(db) = std::env::var("GUILDHOST_DB") {
            self.storage.backend = StorageBackend::Sqlite;
            self.storage.path = PathBuf::from(db);
        }

        self
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::Parse(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)
            .map_err(|e| ConfigError::Parse(format!("Failed to write config: {}", e)))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bot.name.trim().is_empty() {
            return Err(ConfigError::MissingField("bot.name".to_string()));
        }
        if self.modules.dispatch_timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "modules.dispatch-timeout-seconds must be positive".to_string(),
            ));
        }
        if self.security.rate_limit.enabled && self.security.rate_limit.max_requests == 0 {
            return Err(ConfigError::InvalidValue(
                "security.rate-limit.max-requests must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Check if a user ID is a bot owner
    pub fn is_owner(&self, user_id: &str) -> bool {
        self.bot.owners.iter().any(|o| o == user_id)
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.modules.dispatch_timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_uses_defaults() {
        let config: Config = serde_yaml::from_str(
            "bot:\n  prefix: \"?\"\n  owners: [\"42\"]\nstorage:\n  backend: sqlite\n",
        )
        .unwrap();

        assert_eq!(config.bot.prefix, "?");
        assert_eq!(config.bot.name, "guildhost");
        assert!(config.is_owner("42"));
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        assert_eq!(config.modules.dispatch_timeout_seconds, 30);
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let mut config = Config::default();
        config.bot.owners.push("1".into());
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.bot.owners, vec!["1"]);
        assert!(std::fs::read_to_string(&path).unwrap().contains("dispatch-timeout-seconds"));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let mut config = Config::default();
        config.modules.dispatch_timeout_seconds = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue(_))));
    }
}
