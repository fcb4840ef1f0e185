//! guildhost - extension runtime for a multi-tenant chat bot
//!
//! Modules register commands, events and permission nodes at load time.
//! Inbound requests are routed through middleware and resolved against
//! per-tenant permission overrides before reaching module code.

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod plugins;
pub mod runtime;

pub use runtime::{Runtime, RuntimeBuilder};
