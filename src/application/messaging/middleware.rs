//! Middleware system for message processing pipeline

use std::collections::HashSet;
use std::sync::Arc;

use crate::domain::entities::{Content, Message};

/// Context passed through middleware chain
#[derive(Debug, Clone)]
pub struct Context {
    pub message: Message,
    pub chat_id: String,
    pub user_id: Option<String>,
}

impl Context {
    pub fn new(message: Message) -> Self {
        let chat_id = message.chat_id.clone();
        let user_id = message.sender.as_ref().map(|u| u.id.clone());

        Self {
            message,
            chat_id,
            user_id,
        }
    }

    /// Command name, if the message is a command
    pub fn command(&self) -> Option<&str> {
        match &self.message.content {
            Content::Command { name, .. } => Some(name),
            _ => None,
        }
    }
}

/// Middleware trait - processors that can intercept and modify message handling
pub trait Middleware: Send + Sync {
    /// Process a message and optionally modify the context
    fn process(&self, ctx: Context, next: Next) -> MiddlewareResult;
}

/// Result of middleware processing
pub type MiddlewareResult = Result<Context, MiddlewareError>;

/// Middleware errors
#[derive(Debug, Clone)]
pub enum MiddlewareError {
    /// Stop processing and return error
    Blocked(String),
    /// Permission denied
    PermissionDenied(String),
    /// Internal error
    Internal(String),
}

impl std::fmt::Display for MiddlewareError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MiddlewareError::Blocked(msg) => write!(f, "Blocked: {}", msg),
            MiddlewareError::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),
            MiddlewareError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for MiddlewareError {}

/// Next middleware in chain
#[derive(Clone)]
pub struct Next {
    remaining: Arc<Vec<Arc<dyn Middleware>>>,
}

impl Next {
    pub fn new(middlewares: Vec<Arc<dyn Middleware>>) -> Self {
        Self {
            remaining: Arc::new(middlewares),
        }
    }

    /// Process remaining middleware
    pub fn run(self, ctx: Context) -> MiddlewareResult {
        if let Some(first) = self.remaining.first() {
            let next = Next::new(self.remaining[1..].to_vec());
            first.process(ctx, next)
        } else {
            Ok(ctx)
        }
    }
}

/// Restricts the given commands to configured owners
pub struct OwnerOnlyMiddleware {
    owners: HashSet<String>,
    guarded: HashSet<String>,
}

impl OwnerOnlyMiddleware {
    pub fn new<I, G>(owners: I, guarded: G) -> Self
    where
        I: IntoIterator<Item = String>,
        G: IntoIterator<Item = String>,
    {
        Self {
            owners: owners.into_iter().collect(),
            guarded: guarded.into_iter().map(|c| c.to_lowercase()).collect(),
        }
    }
}

impl Middleware for OwnerOnlyMiddleware {
    fn process(&self, ctx: Context, next: Next) -> MiddlewareResult {
        let Some(command) = ctx.command() else {
            return next.run(ctx);
        };
        if !self.guarded.contains(&command.to_lowercase()) {
            return next.run(ctx);
        }

        let allowed = ctx
            .user_id
            .as_ref()
            .map(|id| self.owners.contains(id))
            .unwrap_or(false);
        if !allowed {
            tracing::warn!(user = ?ctx.user_id, command, "Rejected owner-only command");
            return Err(MiddlewareError::PermissionDenied(format!(
                "`{}` is restricted to bot owners",
                command
            )));
        }
        next.run(ctx)
    }
}

/// Logging middleware for debugging
pub struct LoggingMiddleware;

impl Middleware for LoggingMiddleware {
    fn process(&self, ctx: Context, next: Next) -> MiddlewareResult {
        let msg_preview = ctx
            .message
            .content
            .text()
            .map(|s| s.chars().take(50).collect::<String>())
            .or_else(|| ctx.command().map(|c| format!("[command {}]", c)))
            .unwrap_or_else(|| "[empty]".to_string());

        tracing::debug!("[{}] {}", ctx.chat_id, msg_preview);

        let chat_id = ctx.chat_id.clone();
        let result = next.run(ctx);

        match &result {
            Ok(_) => {
                tracing::debug!("[{}] Processed OK", chat_id);
            }
            Err(e) => {
                tracing::warn!("[{}] Error: {}", chat_id, e);
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::User;

    fn command_from(user: &str, name: &str) -> Context {
        Context::new(Message::from_command("c", name, vec![]).with_sender(User::new(user)))
    }

    fn chain() -> Next {
        let middlewares: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(LoggingMiddleware),
            Arc::new(OwnerOnlyMiddleware::new(
                vec!["owner".to_string()],
                vec!["m".to_string(), "management".to_string()],
            )),
        ];
        Next::new(middlewares)
    }

    #[test]
    fn test_owner_passes_guarded_command() {
        assert!(chain().run(command_from("owner", "m")).is_ok());
    }

    #[test]
    fn test_stranger_is_denied_guarded_command() {
        let result = chain().run(command_from("stranger", "Management"));
        assert!(matches!(result, Err(MiddlewareError::PermissionDenied(_))));
    }

    #[test]
    fn test_unguarded_commands_pass() {
        assert!(chain().run(command_from("stranger", "ping")).is_ok());
    }
}
