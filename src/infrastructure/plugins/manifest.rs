//! Module manifest definition

use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::application::errors::ModuleError;

static MODULE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_-]{0,63}$").expect("valid regex"));

fn default_description() -> String {
    "No description provided.".to_string()
}

fn default_version() -> String {
    "1.0.0".to_string()
}

fn default_color() -> String {
    "#FFFFFF".to_string()
}

fn default_init_file() -> String {
    "main.rs".to_string()
}

fn default_commands_folder() -> String {
    "commands".to_string()
}

fn default_events_folder() -> String {
    "events".to_string()
}

fn default_translations_folder() -> String {
    "translations".to_string()
}

/// Module metadata from `manifest.json`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleManifest {
    /// Module name; the folder name when omitted
    #[serde(default)]
    pub name: String,

    #[serde(default = "default_description")]
    pub description: String,

    #[serde(default = "default_version")]
    pub version: String,

    /// Embed color shown next to the module
    #[serde(default = "default_color")]
    pub color: String,

    #[serde(default = "default_init_file")]
    pub init_file: String,

    #[serde(default = "default_commands_folder")]
    pub commands_folder: String,

    #[serde(default = "default_events_folder")]
    pub events_folder: String,

    #[serde(default = "default_translations_folder")]
    pub translations_folder: String,

    #[serde(default)]
    pub disabled: bool,

    /// Folder the manifest was read from
    #[serde(skip)]
    pub path: Option<PathBuf>,
}

impl ModuleManifest {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ModuleError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ModuleError::Manifest(format!("Failed to read manifest: {}", e)))?;

        let mut manifest: ModuleManifest = serde_json::from_str(&content)
            .map_err(|e| ModuleError::Manifest(format!("Failed to parse manifest: {}", e)))?;
        manifest.path = path.parent().map(Path::to_path_buf);
        Ok(manifest)
    }

    /// Manifest for a compiled-in module with no folder on disk
    pub fn synthesized(name: &str, version: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: if description.is_empty() {
                default_description()
            } else {
                description.to_string()
            },
            version: version.to_string(),
            color: default_color(),
            init_file: default_init_file(),
            commands_folder: default_commands_folder(),
            events_folder: default_events_folder(),
            translations_folder: default_translations_folder(),
            disabled: false,
            path: None,
        }
    }

    pub fn validate(&self) -> Result<(), ModuleError> {
        if !MODULE_NAME.is_match(&self.name) {
            return Err(ModuleError::Manifest(format!("Invalid module name '{}'", self.name)));
        }
        if self.version.trim().is_empty() {
            return Err(ModuleError::Manifest(format!("Module '{}' has an empty version", self.name)));
        }
        Ok(())
    }

    /// Translations folder resolved against the module folder
    pub fn translations_path(&self) -> Option<PathBuf> {
        self.path.as_ref().map(|p| p.join(&self.translations_folder))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camel_case_fields_and_defaults() {
        let manifest: ModuleManifest = serde_json::from_str(
            r##"{"name": "Leveling", "initFile": "setup.rs", "disabled": true}"##,
        )
        .unwrap();

        assert_eq!(manifest.init_file, "setup.rs");
        assert_eq!(manifest.version, "1.0.0");
        assert_eq!(manifest.color, "#FFFFFF");
        assert_eq!(manifest.commands_folder, "commands");
        assert!(manifest.disabled);
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn invalid_names_are_rejected() {
        for name in ["", "9lives", "has space", "a.b"] {
            assert!(ModuleManifest::synthesized(name, "1.0.0", "").validate().is_err(), "{}", name);
        }
    }

    #[test]
    fn reads_file_and_records_folder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        std::fs::write(&path, r#"{"name": "Defaults", "version": "2.0.0"}"#).unwrap();

        let manifest = ModuleManifest::from_file(&path).unwrap();
        assert_eq!(manifest.version, "2.0.0");
        assert_eq!(manifest.path.as_deref(), Some(dir.path()));
        assert_eq!(manifest.translations_path(), Some(dir.path().join("translations")));
    }
}
