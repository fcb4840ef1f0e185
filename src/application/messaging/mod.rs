//! Request handling - parsing, middleware, routing and audit

pub mod audit;
pub mod middleware;
pub mod parser;
pub mod router;

pub use audit::{AuditRecord, AuditSink};
pub use middleware::{
    DispatchContext, LoggingMiddleware, Middleware, MiddlewareError, OwnerMiddleware,
    PermissionMiddleware, RateLimitMiddleware,
};
pub use parser::RequestParser;
pub use router::{CommandRouter, DispatchOutcome};
