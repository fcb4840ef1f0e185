//! Infrastructure layer - External concerns
//! 
//! This layer contains:
//! - Config: Configuration loading
//! - Storage: in-memory document store
//! - Database: SQLite document store
//! - Adapters: Platform integrations (console)
//! - Plugins: module manifest discovery

pub mod config;
pub mod storage;
pub mod database;
pub mod adapters;
pub mod plugins;
