//! Console adapter for development/testing

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;

use crate::application::errors::BotError;
use crate::domain::entities::{CommandDescriptor, InboundRequest, Reply};
use crate::domain::traits::{Platform, PlatformInfo, SyncScope};

/// Console platform adapter for local development
pub struct ConsoleAdapter {
    info: PlatformInfo,
    input: Mutex<Lines<BufReader<Stdin>>>,
}

impl ConsoleAdapter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            info: PlatformInfo {
                id: "console".to_string(),
                name: name.into(),
                username: "console".to_string(),
            },
            input: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }

    /// Next line from stdin; `None` on EOF
    pub async fn read_line(&self, prompt: &str) -> Option<String> {
        use std::io::Write;
        print!("{}", prompt);
        let _ = std::io::stdout().flush();

        let mut input = self.input.lock().await;
        match input.next_line().await {
            Ok(Some(line)) => Some(line.trim().to_string()),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Failed to read from stdin: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl Platform for ConsoleAdapter {
    async fn send_reply(&self, _request: &InboundRequest, reply: &Reply) -> Result<(), BotError> {
        if reply.ephemeral {
            println!("[BOT] (only you) {}", reply.content);
        } else {
            println!("[BOT] {}", reply.content);
        }
        Ok(())
    }

    async fn publish_commands(
        &self,
        scope: &SyncScope,
        commands: &[CommandDescriptor],
    ) -> Result<(), BotError> {
        println!("[SYNC] {} command(s) published ({})", commands.len(), scope);
        for cmd in commands {
            println!("  /{} - {}", cmd.name, cmd.description);
            for sub in &cmd.subcommands {
                println!("    {} - {}", sub.name, sub.description);
            }
        }
        Ok(())
    }

    fn platform_info(&self) -> PlatformInfo {
        self.info.clone()
    }
}
