use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Native capability bits granted by the chat platform
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Capabilities: u64 {
        const KICK_MEMBERS     = 1 << 1;
        const BAN_MEMBERS      = 1 << 2;
        const ADMINISTRATOR    = 1 << 3;
        const MANAGE_CHANNELS  = 1 << 4;
        const MANAGE_GUILD     = 1 << 5;
        const MANAGE_MESSAGES  = 1 << 13;
        const MANAGE_ROLES     = 1 << 28;
        const MODERATE_MEMBERS = 1 << 40;
    }
}

impl Capabilities {
    const NAMED: &'static [(&'static str, Capabilities)] = &[
        ("kick_members", Self::KICK_MEMBERS),
        ("ban_members", Self::BAN_MEMBERS),
        ("administrator", Self::ADMINISTRATOR),
        ("manage_channels", Self::MANAGE_CHANNELS),
        ("manage_guild", Self::MANAGE_GUILD),
        ("manage_messages", Self::MANAGE_MESSAGES),
        ("manage_roles", Self::MANAGE_ROLES),
        ("moderate_members", Self::MODERATE_MEMBERS),
    ];

    /// Capability for a snake_case name such as `ban_members`
    pub fn from_snake_name(name: &str) -> Option<Capabilities> {
        Self::NAMED
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, cap)| *cap)
    }

    /// Whether `name` is a known capability these bits satisfy.
    /// `ADMINISTRATOR` satisfies every known capability.
    pub fn grants(&self, name: &str) -> bool {
        match Self::from_snake_name(name) {
            Some(cap) => self.contains(cap) || self.contains(Self::ADMINISTRATOR),
            None => false,
        }
    }

    pub fn names(&self) -> Vec<&'static str> {
        Self::NAMED
            .iter()
            .filter(|(_, cap)| self.contains(*cap))
            .map(|(n, _)| *n)
            .collect()
    }
}

/// The principal issuing a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub username: Option<String>,
    pub roles: Vec<String>,
    pub capabilities: Capabilities,
    pub is_bot: bool,
}

impl Actor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: None,
            roles: Vec::new(),
            capabilities: Capabilities::empty(),
            is_bot: false,
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_role(mut self, role_id: impl Into<String>) -> Self {
        self.roles.push(role_id.into());
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn has_role(&self, role_id: &str) -> bool {
        self.roles.iter().any(|r| r == role_id)
    }

    pub fn display_name(&self) -> String {
        self.username.clone().unwrap_or_else(|| self.id.clone())
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn administrator_grants_every_named_capability() {
        let caps = Capabilities::ADMINISTRATOR;
        assert!(caps.grants("ban_members"));
        assert!(caps.grants("manage_roles"));
        assert!(!caps.grants("not_a_capability"));
    }

    #[test]
    fn single_bit_grants_only_itself() {
        let caps = Capabilities::BAN_MEMBERS | Capabilities::KICK_MEMBERS;
        assert!(caps.grants("ban_members"));
        assert!(caps.grants("kick_members"));
        assert!(!caps.grants("manage_guild"));
        assert_eq!(caps.names(), vec!["kick_members", "ban_members"]);
    }

    #[test]
    fn unknown_bits_are_dropped() {
        let caps = Capabilities::from_bits_truncate((1 << 2) | (1 << 60));
        assert_eq!(caps, Capabilities::BAN_MEMBERS);
        assert!(Capabilities::default().is_empty());
    }

    #[test]
    fn actor_roles() {
        let actor = Actor::new("1").with_role("10").with_username("alice");
        assert!(actor.has_role("10"));
        assert!(!actor.has_role("11"));
        assert_eq!(actor.to_string(), "alice");
    }
}
