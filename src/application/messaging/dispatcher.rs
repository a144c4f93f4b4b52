//! Message dispatcher - Routes messages to handlers

use std::sync::Arc;

use super::middleware::{Context, Middleware, MiddlewareError, Next};
use super::parser::MessageParser;
use crate::application::errors::{BotError, CommandError};
use crate::application::services::management::MANAGEMENT_COMMANDS;
use crate::application::services::{CommandService, ManagementService};
use crate::domain::entities::{Command, Content, Message, User};
use crate::plugins::host::CogHost;

/// Handler result; `None` means nothing to send back
pub type HandlerResult = Result<Option<String>, BotError>;

/// Message dispatcher - routes messages through middleware to handlers
pub struct MessageDispatcher {
    parser: MessageParser,
    middleware: Vec<Arc<dyn Middleware>>,
    commands: CommandService,
    management: ManagementService,
    host: Arc<CogHost>,
}

impl MessageDispatcher {
    /// Build a dispatcher and reserve the host-owned command names
    pub fn new(host: Arc<CogHost>, prefix: impl Into<String>, management: ManagementService) -> Result<Self, BotError> {
        let prefix = prefix.into();
        let commands = CommandService::new(Arc::clone(&host), prefix.clone());
        commands.register_defaults()?;

        let [name, alias] = MANAGEMENT_COMMANDS;
        host.register_builtin(
            Command::new(name)
                .with_aliases(vec![alias.to_string()])
                .with_description("Manage cogs and the command tree")
                .with_usage(format!("{}m cog <list|load|unload|reload> [name]", prefix)),
        )?;

        Ok(Self {
            parser: MessageParser::new(prefix),
            middleware: Vec::new(),
            commands,
            management,
            host,
        })
    }

    /// Add middleware to the chain
    pub fn with_middleware<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Process a raw text message
    pub async fn process_text(&self, chat_id: impl Into<String>, text: impl Into<String>, sender: Option<User>) -> HandlerResult {
        let message = self.parser.parse(chat_id, text, sender);
        self.process(message).await
    }

    /// Process a message through the dispatcher
    pub async fn process(&self, message: Message) -> HandlerResult {
        let ctx = match Next::new(self.middleware.clone()).run(Context::new(message)) {
            Ok(ctx) => ctx,
            Err(MiddlewareError::Blocked(msg)) => return Ok(Some(msg)),
            Err(MiddlewareError::PermissionDenied(msg)) => return Ok(Some(format!("Permission denied: {}", msg))),
            Err(MiddlewareError::Internal(msg)) => return Err(BotError::Internal(msg)),
        };

        match &ctx.message.content {
            Content::Command { name, args } if ManagementService::is_management(name) => {
                Ok(Some(self.management.handle(args).await))
            }
            Content::Command { name, .. } => match self.commands.handle(&ctx.message) {
                Ok(reply) => Ok(reply),
                Err(CommandError::NotFound(_)) => Ok(Some(format!(
                    "Unknown command: {}{}. Try {}help",
                    self.commands.prefix(),
                    name,
                    self.commands.prefix()
                ))),
                Err(e) => Ok(Some(format!("Error: {}", e))),
            },
            Content::Text(text) => {
                self.host.emit("message", text);
                Ok(None)
            }
            Content::Empty => Ok(None),
        }
    }
}
