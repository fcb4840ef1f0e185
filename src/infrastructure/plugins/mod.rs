//! Module discovery
//!
//! Modules are compiled in; a module folder only carries its
//! `manifest.json`, which decides whether and how the module is loaded.

pub mod loader;
pub mod manifest;

pub use loader::ModuleLoader;
pub use manifest::ModuleManifest;
