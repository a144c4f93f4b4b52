//! Console adapter for development/testing

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;

use crate::application::errors::BotError;
use crate::domain::traits::{Bot, BotInfo, CommandTree, PublishedCommand};

/// Console bot adapter; stands in for the remote chat service
pub struct ConsoleAdapter {
    info: BotInfo,
    lines: Mutex<Lines<BufReader<Stdin>>>,
}

impl ConsoleAdapter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            info: BotInfo {
                id: "console".to_string(),
                name: name.into(),
                username: "console".to_string(),
            },
            lines: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }

    /// Next input line, trimmed; `None` at end of input
    pub async fn read_line(&self, prompt: &str) -> Option<String> {
        print!("{}", prompt);
        use std::io::Write;
        let _ = std::io::stdout().flush();
        match self.lines.lock().await.next_line().await {
            Ok(Some(line)) => Some(line.trim().to_string()),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read console input");
                None
            }
        }
    }
}

#[async_trait]
impl Bot for ConsoleAdapter {
    async fn start(&self) -> Result<(), BotError> {
        tracing::info!("Starting console bot (dev mode)");
        Ok(())
    }

    async fn send_message(&self, _chat_id: &str, text: &str) -> Result<String, BotError> {
        println!("[BOT] {}", text);
        Ok("console_msg".to_string())
    }

    fn bot_info(&self) -> BotInfo {
        self.info.clone()
    }
}

/// In-process command tree; remembers what was published per scope
#[derive(Default)]
pub struct ConsoleCommandTree {
    published: RwLock<HashMap<String, Vec<PublishedCommand>>>,
}

impl ConsoleCommandTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self, scope: Option<&str>) -> Vec<PublishedCommand> {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(scope_key(scope))
            .cloned()
            .unwrap_or_default()
    }
}

fn scope_key(scope: Option<&str>) -> &str {
    scope.unwrap_or("global")
}

#[async_trait]
impl CommandTree for ConsoleCommandTree {
    async fn sync(&self, scope: Option<&str>, commands: &[PublishedCommand]) -> Result<usize, BotError> {
        let mut published = self.published.write().unwrap_or_else(|e| e.into_inner());
        published.insert(scope_key(scope).to_string(), commands.to_vec());
        tracing::info!(scope = scope_key(scope), count = commands.len(), "Command tree synced");
        Ok(commands.len())
    }

    async fn reset(&self, scope: Option<&str>) -> Result<(), BotError> {
        self.published
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(scope_key(scope));
        tracing::info!(scope = scope_key(scope), "Command tree reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sync_and_reset_per_scope() {
        let tree = ConsoleCommandTree::new();
        let commands = vec![PublishedCommand {
            name: "ping".to_string(),
            description: None,
            cog: Some("General".to_string()),
        }];

        assert_eq!(tree.sync(None, &commands).await.unwrap(), 1);
        assert_eq!(tree.sync(Some("guild-1"), &[]).await.unwrap(), 0);
        assert_eq!(tree.published(None), commands);

        tree.reset(None).await.unwrap();
        assert!(tree.published(None).is_empty());
    }
}
