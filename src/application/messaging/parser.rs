//! Request parser - turns raw text into inbound requests

use crate::domain::entities::{Actor, InboundRequest, TenantContext};

/// Parses prefixed text into `InboundRequest`s
pub struct RequestParser {
    command_prefix: String,
}

impl RequestParser {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            command_prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.command_prefix
    }

    /// Parse a text message; `None` when it is not a command
    pub fn parse(&self, text: &str, actor: Actor, tenant: TenantContext) -> Option<InboundRequest> {
        let text = text.trim();

        // Remove the command prefix (either / or custom prefix)
        let cmd_text = if let Some(rest) = text.strip_prefix('/') {
            rest
        } else if !self.command_prefix.is_empty() {
            text.strip_prefix(self.command_prefix.as_str())?
        } else {
            return None;
        };

        // Split command and arguments
        let mut parts = cmd_text.split_whitespace();
        let name = parts.next()?.to_lowercase();

        Some(
            InboundRequest::new(name, actor, tenant)
                .with_args(parts)
                .with_raw(serde_json::Value::String(text.to_string())),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_slash_and_custom_prefix() {
        let parser = RequestParser::new("!");
        let actor = Actor::new("1");

        let req = parser.parse("/settings set language pt", actor.clone(), TenantContext::guild("g")).unwrap();
        assert_eq!(req.name, "settings");
        assert_eq!(req.args, vec!["set", "language", "pt"]);

        let req = parser.parse("!Help", actor.clone(), TenantContext::direct()).unwrap();
        assert_eq!(req.name, "help");
        assert!(req.args.is_empty());
    }

    #[test]
    fn ignores_plain_text() {
        let parser = RequestParser::new("!");
        assert!(parser.parse("hello there", Actor::new("1"), TenantContext::direct()).is_none());
        assert!(parser.parse("!", Actor::new("1"), TenantContext::direct()).is_none());
    }
}
