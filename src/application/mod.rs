//! Application layer - Use cases and business logic
//! 
//! This layer contains:
//! - Permissions: node registry and override resolution
//! - Messaging: request parsing, middleware, routing, audit
//! - Services: tenant and member profile caches, settings schemas
//! - Errors: Domain-specific errors

pub mod errors;
pub mod permissions;
pub mod services;
pub mod messaging;
