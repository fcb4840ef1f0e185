//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use guildhost::application::errors::BotError;
use guildhost::domain::entities::{
    Actor, Capabilities, CommandDescriptor, InboundRequest, Reply, TenantContext,
};
use guildhost::domain::traits::{Platform, PlatformInfo, SyncScope};
use guildhost::infrastructure::config::Config;
use guildhost::plugins::ModuleCatalog;
use guildhost::Runtime;

pub const OWNER_ID: &str = "owner";
pub const GUILD: &str = "G";

/// Platform that remembers everything it was asked to deliver
#[derive(Default)]
pub struct RecordingPlatform {
    pub replies: Mutex<Vec<(String, Reply)>>,
    pub syncs: Mutex<Vec<(SyncScope, Vec<String>)>>,
}

impl RecordingPlatform {
    pub fn last_reply(&self) -> Option<Reply> {
        self.replies.lock().unwrap().last().map(|(_, r)| r.clone())
    }

    pub fn sync_count(&self) -> usize {
        self.syncs.lock().unwrap().len()
    }
}

#[async_trait]
impl Platform for RecordingPlatform {
    async fn send_reply(&self, request: &InboundRequest, reply: &Reply) -> Result<(), BotError> {
        self.replies
            .lock()
            .unwrap()
            .push((request.name.clone(), reply.clone()));
        Ok(())
    }

    async fn publish_commands(
        &self,
        scope: &SyncScope,
        commands: &[CommandDescriptor],
    ) -> Result<(), BotError> {
        let names = commands.iter().map(|c| c.name.clone()).collect();
        self.syncs.lock().unwrap().push((scope.clone(), names));
        Ok(())
    }

    fn platform_info(&self) -> PlatformInfo {
        PlatformInfo {
            id: "test".to_string(),
            name: "test".to_string(),
            username: "test".to_string(),
        }
    }
}

/// Config with no audit file, no rate limit and the given modules directory
pub fn test_config(modules_dir: &Path) -> Config {
    let mut config = Config::default();
    config.bot.owners = vec![OWNER_ID.to_string()];
    config.modules.directory = modules_dir.to_path_buf();
    config.modules.dispatch_timeout_seconds = 1;
    config.security.audit.path = None;
    config.security.rate_limit.enabled = false;
    config
}

pub async fn start_with(config: Config, catalog: ModuleCatalog) -> (Arc<Runtime>, Arc<RecordingPlatform>) {
    let platform = Arc::new(RecordingPlatform::default());
    let runtime = Runtime::builder()
        .config(config)
        .platform(platform.clone())
        .catalog(catalog)
        .build()
        .unwrap();
    runtime.start().await;
    (runtime, platform)
}

/// Runtime with the built-in modules and an empty modules directory
pub async fn start(catalog: ModuleCatalog) -> (Arc<Runtime>, Arc<RecordingPlatform>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let (runtime, platform) = start_with(test_config(dir.path()), catalog).await;
    (runtime, platform, dir)
}

pub fn owner() -> Actor {
    Actor::new(OWNER_ID).with_capabilities(Capabilities::ADMINISTRATOR)
}

pub fn member(id: &str) -> Actor {
    Actor::new(id)
}

/// Request in the test guild, split like typed text
pub fn request(actor: Actor, line: &str) -> InboundRequest {
    let mut parts = line.split_whitespace();
    let name = parts.next().unwrap_or_default();
    InboundRequest::new(name, actor, TenantContext::guild(GUILD).with_channel("C1")).with_args(parts)
}
