//! Domain layer - Core types shared by every other layer
//! 
//! This layer contains:
//! - Entities: Actors, requests, commands, settings, profiles, modules
//! - Traits: Abstractions for infrastructure (Platform, DocumentStore)
//! - Namespace: the dotted-path tree behind permission nodes and overrides

pub mod entities;
pub mod namespace;
pub mod traits;

pub use namespace::{NamespaceTree, WILDCARD};
