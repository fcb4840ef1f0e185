//! Middleware run between command resolution and the handler
//!
//! Middleware runs in registration order. The first rejection stops the
//! dispatch before the handler or the audit trail see the request.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::domain::entities::{InboundRequest, OverrideTree, Reply, ResolvedCommand};
use crate::runtime::Runtime;

pub const OWNER_ONLY_NOTICE: &str = "This command is restricted to the bot owner.";
pub const PERMISSION_NOTICE: &str = "You don't have permission to use this command.";

/// What middleware gets to look at
pub struct DispatchContext<'a> {
    pub request: &'a InboundRequest,
    pub command: &'a ResolvedCommand,
    pub runtime: &'a Arc<Runtime>,
}

impl DispatchContext<'_> {
    /// Key identifying the actor within its tenant
    pub fn actor_key(&self) -> String {
        format!(
            "{}:{}",
            self.request.tenant_id().unwrap_or("dm"),
            self.request.actor.id
        )
    }
}

/// Middleware trait - checks that can veto a dispatch
#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &'static str;

    async fn process(&self, ctx: &DispatchContext<'_>) -> MiddlewareResult;
}

/// Result of middleware processing
pub type MiddlewareResult = Result<(), MiddlewareError>;

/// Middleware errors
#[derive(Debug, Clone)]
pub enum MiddlewareError {
    /// Stop processing and return error
    Blocked(String),
    /// Rate limited
    RateLimited { retry_after: Duration },
    /// Permission denied
    PermissionDenied(String),
    /// Internal error
    Internal(String),
}

impl MiddlewareError {
    /// Notice shown to the actor
    pub fn to_reply(&self) -> Reply {
        match self {
            MiddlewareError::Blocked(msg) | MiddlewareError::PermissionDenied(msg) => {
                Reply::ephemeral(msg.clone())
            }
            MiddlewareError::RateLimited { retry_after } => Reply::ephemeral(format!(
                "You are being rate limited. Try again in {}s.",
                retry_after.as_secs().max(1)
            )),
            MiddlewareError::Internal(_) => {
                Reply::ephemeral(super::router::ERROR_NOTICE)
            }
        }
    }
}

impl std::fmt::Display for MiddlewareError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MiddlewareError::Blocked(msg) => write!(f, "Blocked: {}", msg),
            MiddlewareError::RateLimited { retry_after } => {
                write!(f, "Rate limited, retry after {:?}", retry_after)
            }
            MiddlewareError::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),
            MiddlewareError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for MiddlewareError {}

/// Rate limit middleware, sliding window per actor and tenant
pub struct RateLimitMiddleware {
    requests: std::sync::Mutex<HashMap<String, Vec<Instant>>>,
    max_requests: u32,
    window: Duration,
}

impl RateLimitMiddleware {
    pub fn new(max_requests: u32, window_secs: u64) -> Self {
        Self {
            requests: std::sync::Mutex::new(HashMap::new()),
            max_requests,
            window: Duration::from_secs(window_secs),
        }
    }

    fn check_rate_limit(&self, key: &str) -> Result<(), MiddlewareError> {
        let mut requests = self.requests.lock()
            .map_err(|_| MiddlewareError::Internal("Lock poisoned".to_string()))?;

        let now = Instant::now();

        // Remove old requests outside the window, and actors with none left
        requests.retain(|_, times| {
            times.retain(|&t| now.duration_since(t) < self.window);
            !times.is_empty()
        });

        if self.max_requests == 0 {
            return Err(MiddlewareError::RateLimited { retry_after: self.window });
        }

        let times = requests.entry(key.to_string()).or_default();
        if times.len() >= self.max_requests as usize {
            let retry_after = times.first()
                .map(|t| self.window.saturating_sub(now.duration_since(*t)))
                .unwrap_or(self.window);

            return Err(MiddlewareError::RateLimited { retry_after });
        }

        times.push(now);
        Ok(())
    }
}

#[async_trait]
impl Middleware for RateLimitMiddleware {
    fn name(&self) -> &'static str {
        "rate-limit"
    }

    async fn process(&self, ctx: &DispatchContext<'_>) -> MiddlewareResult {
        self.check_rate_limit(&ctx.actor_key())
    }
}

/// Logging middleware for debugging
pub struct LoggingMiddleware;

#[async_trait]
impl Middleware for LoggingMiddleware {
    fn name(&self) -> &'static str {
        "logging"
    }

    async fn process(&self, ctx: &DispatchContext<'_>) -> MiddlewareResult {
        tracing::debug!(
            "[{}] {} -> /{} {}",
            ctx.request.tenant_id().unwrap_or("dm"),
            ctx.request.actor,
            ctx.command.path,
            ctx.command.args.join(" ")
        );
        Ok(())
    }
}

/// Rejects owner-only commands for everyone else
pub struct OwnerMiddleware;

#[async_trait]
impl Middleware for OwnerMiddleware {
    fn name(&self) -> &'static str {
        "owner"
    }

    async fn process(&self, ctx: &DispatchContext<'_>) -> MiddlewareResult {
        if ctx.command.command.owner_only && !ctx.runtime.is_owner(&ctx.request.actor.id) {
            tracing::info!(
                actor = %ctx.request.actor.id,
                command = %ctx.command.path,
                "Owner-only command refused"
            );
            return Err(MiddlewareError::Blocked(OWNER_ONLY_NOTICE.to_string()));
        }
        Ok(())
    }
}

/// Checks the command's permission node against the tenant's overrides
pub struct PermissionMiddleware;

#[async_trait]
impl Middleware for PermissionMiddleware {
    fn name(&self) -> &'static str {
        "permission"
    }

    async fn process(&self, ctx: &DispatchContext<'_>) -> MiddlewareResult {
        let Some(node) = ctx.command.command.permission.as_deref() else {
            return Ok(());
        };

        let allowed = match ctx.request.tenant_id() {
            Some(tenant) => {
                let profile = ctx.runtime.profiles.fetch_or_create(tenant).await.map_err(|e| {
                    tracing::error!(tenant, "Failed to load tenant profile: {}", e);
                    MiddlewareError::Internal(e.to_string())
                })?;
                ctx.runtime.permissions.has_permission(
                    node,
                    &ctx.request.actor,
                    &ctx.request.tenant,
                    &profile.overrides,
                )
            }
            None => ctx.runtime.permissions.has_permission(
                node,
                &ctx.request.actor,
                &ctx.request.tenant,
                &OverrideTree::new(),
            ),
        };

        if allowed {
            Ok(())
        } else {
            tracing::debug!(node, actor = %ctx.request.actor.id, "Permission denied");
            Err(MiddlewareError::PermissionDenied(PERMISSION_NOTICE.to_string()))
        }
    }
}
