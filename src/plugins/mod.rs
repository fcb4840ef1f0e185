//! Module system for guildhost
//!
//! Modules are compiled in and listed in a [`ModuleCatalog`]. The
//! [`ModuleManager`] drives them through discovery, load and unload.

pub mod defaults;
pub mod manager;
pub mod owner;
pub mod trait_def;

pub use defaults::{DefaultsInterface, DefaultsModule};
pub use manager::ModuleManager;
pub use owner::OwnerModule;
pub use trait_def::{InitContext, Module, ModuleCatalog, ModuleFactory, ModuleRegistrar, ModuleSetup};
