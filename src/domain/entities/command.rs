use std::collections::HashMap;
use std::sync::Arc;

use super::CogId;

/// Represents a bot command
#[derive(Clone)]
pub struct Command {
    pub name: String,
    pub description: Option<String>,
    pub aliases: Vec<String>,
    pub usage: Option<String>,
    pub handler: Option<CommandHandler>,
    /// Cog that registered this command; `None` for host built-ins
    pub owner: Option<CogId>,
}

/// Command handler function type
pub type CommandHandler = Arc<dyn Fn(crate::domain::entities::Message) -> Result<String, crate::application::errors::CommandError> + Send + Sync>;

impl Command {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            aliases: Vec::new(),
            usage: None,
            handler: None,
            owner: None,
        }
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn with_aliases(mut self, aliases: Vec<String>) -> Self {
        self.aliases = aliases;
        self
    }

    pub fn with_usage(mut self, usage: impl Into<String>) -> Self {
        self.usage = Some(usage.into());
        self
    }

    pub fn with_owner(mut self, owner: CogId) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn with_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(crate::domain::entities::Message) -> Result<String, crate::application::errors::CommandError> + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn matches(&self, input: &str) -> bool {
        let input_lower = input.to_lowercase();
        self.name.to_lowercase() == input_lower ||
            self.aliases.iter().any(|a| a.to_lowercase() == input_lower)
    }

    fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("aliases", &self.aliases)
            .field("owner", &self.owner)
            .finish()
    }
}

/// Command registry for managing available commands
#[derive(Default)]
pub struct CommandRegistry {
    commands: HashMap<String, Command>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a command; names and aliases must not collide with existing ones
    pub fn register(&mut self, command: Command) -> Result<(), crate::application::errors::CommandError> {
        for name in command.names() {
            if let Some(existing) = self.find(name) {
                return Err(crate::application::errors::CommandError::Conflict {
                    name: name.to_string(),
                    owner: existing
                        .owner
                        .as_ref()
                        .map(|o| format!("cog `{}`", o))
                        .unwrap_or_else(|| "the host".to_string()),
                });
            }
        }
        self.commands.insert(command.name.to_lowercase(), command);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Command> {
        self.commands.get(&name.to_lowercase())
    }

    pub fn find(&self, input: &str) -> Option<&Command> {
        self.get(input)
            .or_else(|| self.commands.values().find(|c| c.matches(input)))
    }

    pub fn all(&self) -> impl Iterator<Item = &Command> {
        self.commands.values()
    }

    /// Remove every command registered by `owner`, returning how many went away
    pub fn remove_owned_by(&mut self, owner: &CogId) -> usize {
        let before = self.commands.len();
        self.commands.retain(|_, c| c.owner.as_ref() != Some(owner));
        before - self.commands.len()
    }

    pub fn count_owned_by(&self, owner: &CogId) -> usize {
        self.commands.values().filter(|c| c.owner.as_ref() == Some(owner)).count()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_rejects_alias_collision() {
        let mut registry = CommandRegistry::new();
        let owner = CogId::new("cogs.echo", "Echo");
        registry
            .register(Command::new("echo").with_aliases(vec!["say".into()]).with_owner(owner))
            .unwrap();

        let err = registry.register(Command::new("say")).unwrap_err();
        assert!(err.to_string().contains("cog `cogs.echo.Echo`"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_owned_by_leaves_others() {
        let mut registry = CommandRegistry::new();
        let echo = CogId::new("cogs.echo", "Echo");
        registry.register(Command::new("echo").with_owner(echo.clone())).unwrap();
        registry.register(Command::new("help")).unwrap();

        assert_eq!(registry.remove_owned_by(&echo), 1);
        assert!(registry.find("echo").is_none());
        assert!(registry.find("HELP").is_some());
    }
}
