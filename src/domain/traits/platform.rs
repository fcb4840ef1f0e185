use async_trait::async_trait;

use crate::application::errors::BotError;
use crate::domain::entities::{CommandDescriptor, InboundRequest, Reply};

/// Platform trait - abstraction for the chat platform client
#[async_trait]
pub trait Platform: Send + Sync {
    /// Deliver a reply to the request it answers
    async fn send_reply(&self, request: &InboundRequest, reply: &Reply) -> Result<(), BotError>;

    /// Publish the command surface, replacing whatever the scope had before
    async fn publish_commands(
        &self,
        scope: &SyncScope,
        commands: &[CommandDescriptor],
    ) -> Result<(), BotError>;

    /// Get platform info
    fn platform_info(&self) -> PlatformInfo;
}

/// Where a command sync applies
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncScope {
    Global,
    Tenant(String),
}

impl std::fmt::Display for SyncScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncScope::Global => write!(f, "global"),
            SyncScope::Tenant(id) => write!(f, "guild {}", id),
        }
    }
}

/// Platform information
#[derive(Debug, Clone)]
pub struct PlatformInfo {
    pub id: String,
    pub name: String,
    pub username: String,
}
