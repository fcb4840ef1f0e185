//! Permission resolution - named checks plus per-tenant overrides

pub mod resolver;

pub use resolver::{OverrideDecision, PermissionEvaluator, PermissionResolver};
