use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Actor;

/// Where a request was issued
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantContext {
    /// Guild id; `None` for direct messages
    pub tenant_id: Option<String>,
    pub channel_id: Option<String>,
    pub locale: Option<String>,
}

impl TenantContext {
    pub fn guild(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: Some(tenant_id.into()),
            ..Self::default()
        }
    }

    pub fn direct() -> Self {
        Self::default()
    }

    pub fn with_channel(mut self, channel_id: impl Into<String>) -> Self {
        self.channel_id = Some(channel_id.into());
        self
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }
}

/// A command invocation as delivered by the platform
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub id: String,
    pub name: String,
    pub args: Vec<String>,
    pub actor: Actor,
    pub tenant: TenantContext,
    pub received_at: DateTime<Utc>,
    pub raw: Option<serde_json::Value>,
}

impl InboundRequest {
    pub fn new(name: impl Into<String>, actor: Actor, tenant: TenantContext) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            args: Vec::new(),
            actor,
            tenant,
            received_at: Utc::now(),
            raw: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_raw(mut self, raw: serde_json::Value) -> Self {
        self.raw = Some(raw);
        self
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant.tenant_id.as_deref()
    }
}

/// Response delivered back through the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub content: String,
    pub ephemeral: bool,
}

impl Reply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ephemeral: false,
        }
    }

    /// Reply only visible to the invoking actor
    pub fn ephemeral(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ephemeral: true,
        }
    }
}

/// Platform event fanned out to module handlers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventPayload {
    pub event: String,
    pub tenant: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl EventPayload {
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            tenant: None,
            data: serde_json::Value::Null,
        }
    }

    pub fn for_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}
