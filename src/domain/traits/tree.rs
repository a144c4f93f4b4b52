use async_trait::async_trait;
use crate::application::errors::BotError;

/// Summary of a command as published to the remote command tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedCommand {
    pub name: String,
    pub description: Option<String>,
    /// Template name of the owning cog, if any
    pub cog: Option<String>,
}

/// Remote command registration (slash-command style trees)
///
/// `scope` is a guild/chat identifier; `None` means global.
#[async_trait]
pub trait CommandTree: Send + Sync {
    /// Publish `commands` to the given scope, returning how many were accepted
    async fn sync(&self, scope: Option<&str>, commands: &[PublishedCommand]) -> Result<usize, BotError>;

    /// Clear everything published to the scope
    async fn reset(&self, scope: Option<&str>) -> Result<(), BotError>;
}
