//! Module discovery - scans the modules directory for manifests

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use super::manifest::ModuleManifest;

/// Finds `<dir>/<module>/manifest.json` files
pub struct ModuleLoader {
    module_dir: PathBuf,
}

impl ModuleLoader {
    pub fn new(module_dir: impl Into<PathBuf>) -> Self {
        Self {
            module_dir: module_dir.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.module_dir
    }

    /// Read a single module folder
    pub fn read_manifest(&self, folder: &Path) -> Option<ModuleManifest> {
        let manifest_path = folder.join("manifest.json");
        if !manifest_path.exists() {
            tracing::warn!("Manifest not found for module: {}", folder.display());
            return None;
        }

        let mut manifest = match ModuleManifest::from_file(&manifest_path) {
            Ok(m) => m,
            Err(e) => {
                tracing::error!("Failed to load manifest for {}: {}", folder.display(), e);
                return None;
            }
        };

        if manifest.name.is_empty() {
            manifest.name = folder
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string();
        }

        if let Err(e) = manifest.validate() {
            tracing::error!("Skipping {}: {}", folder.display(), e);
            return None;
        }
        Some(manifest)
    }

    /// All readable manifests, sorted by name. Bad folders are skipped.
    pub fn discover(&self) -> Vec<ModuleManifest> {
        let mut manifests = Vec::new();

        if !self.module_dir.exists() {
            tracing::warn!("Module directory does not exist: {}", self.module_dir.display());
            return manifests;
        }

        let entries = match std::fs::read_dir(&self.module_dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Failed to read module directory: {}", e);
                return manifests;
            }
        };

        for entry in entries {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!("Failed to read directory entry: {}", e);
                    continue;
                }
            };

            let path = entry.path();
            if !path.is_dir() {
                continue;
            }

            // Skip hidden directories
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if name.starts_with('.') {
                    continue;
                }
            }

            if let Some(manifest) = self.read_manifest(&path) {
                manifests.push(manifest);
            }
        }

        manifests.sort_by(|a, b| a.name.cmp(&b.name));

        let mut seen = HashSet::new();
        manifests.retain(|m| {
            let fresh = seen.insert(m.name.clone());
            if !fresh {
                tracing::warn!("Duplicate module name '{}', keeping the first manifest", m.name);
            }
            fresh
        });

        manifests
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, folder: &str, manifest: &str) {
        let folder = dir.join(folder);
        std::fs::create_dir_all(&folder).unwrap();
        std::fs::write(folder.join("manifest.json"), manifest).unwrap();
    }

    #[test]
    fn discovers_sorted_and_skips_broken() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "xp", r#"{"name": "Leveling"}"#);
        write(dir.path(), "Defaults", r#"{}"#);
        write(dir.path(), "broken", "{ not json");
        write(dir.path(), ".hidden", r#"{"name": "Hidden"}"#);
        std::fs::create_dir_all(dir.path().join("empty")).unwrap();

        let names: Vec<_> = ModuleLoader::new(dir.path())
            .discover()
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(names, vec!["Defaults", "Leveling"]);
    }

    #[test]
    fn missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ModuleLoader::new(dir.path().join("nope")).discover().is_empty());
    }
}
