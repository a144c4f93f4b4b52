use std::sync::{Arc, Weak};

use crate::application::errors::CommandError;
use crate::domain::entities::{Command, Content, Message};
use crate::plugins::host::CogHost;

/// Service for executing commands registered in the cog host
pub struct CommandService {
    host: Arc<CogHost>,
    prefix: String,
}

impl CommandService {
    pub fn new(host: Arc<CogHost>, prefix: impl Into<String>) -> Self {
        Self {
            host,
            prefix: prefix.into(),
        }
    }

    /// Host-owned commands that stay available whatever cogs are loaded
    pub fn register_defaults(&self) -> Result<(), CommandError> {
        let host: Weak<CogHost> = Arc::downgrade(&self.host);
        let prefix = self.prefix.clone();
        self.host.register_builtin(
            Command::new("help")
                .with_description("Show help message")
                .with_usage(format!("{}help [command]", self.prefix))
                .with_handler(move |msg| {
                    let host = host
                        .upgrade()
                        .ok_or_else(|| CommandError::ExecutionFailed("bot is shutting down".to_string()))?;
                    Ok(help_text(&host, &prefix, msg.args().first().map(String::as_str)))
                }),
        )?;

        self.host.register_builtin(
            Command::new("version")
                .with_description("Show bot version")
                .with_handler(|_| Ok(format!("cogbot v{}", env!("CARGO_PKG_VERSION")))),
        )
    }

    pub fn handle(&self, message: &Message) -> Result<Option<String>, CommandError> {
        let Content::Command { name, .. } = &message.content else {
            return Ok(None);
        };

        let cmd = self
            .host
            .find_command(name)
            .ok_or_else(|| CommandError::NotFound(name.clone()))?;

        if let Some(handler) = &cmd.handler {
            Ok(Some(handler(message.clone())?))
        } else {
            Ok(Some(format!("Command {} not implemented", cmd.name)))
        }
    }

    pub fn get_help(&self, command: Option<&str>) -> String {
        help_text(&self.host, &self.prefix, command)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

fn help_text(host: &CogHost, prefix: &str, command: Option<&str>) -> String {
    if let Some(name) = command {
        if let Some(cmd) = host.find_command(name) {
            let mut help = format!(
                "{}{} - {}",
                prefix,
                cmd.name,
                cmd.description.as_deref().unwrap_or("No description")
            );
            if !cmd.aliases.is_empty() {
                help.push_str(&format!("\nAliases: {}", cmd.aliases.join(", ")));
            }
            if let Some(usage) = &cmd.usage {
                help.push_str(&format!("\nUsage: {}", usage));
            }
            if let Some(owner) = &cmd.owner {
                help.push_str(&format!("\nProvided by: {}", owner.class()));
            }
            return help;
        }
        return format!("Command {}{} not found", prefix, name);
    }

    let mut commands = host.commands();
    commands.sort_by(|a, b| a.name.cmp(&b.name));
    let mut help = "Available commands:\n".to_string();
    for cmd in commands {
        help.push_str(&format!(
            "  {}{} - {}\n",
            prefix,
            cmd.name,
            cmd.description.as_deref().unwrap_or("")
        ));
    }
    help
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::CogId;

    #[test]
    fn test_runs_cog_command_and_reports_unknown() {
        let host = Arc::new(CogHost::new());
        let service = CommandService::new(Arc::clone(&host), "!");
        service.register_defaults().unwrap();

        let mut registrar = host.registrar(CogId::new("cogs.general", "General"));
        registrar
            .add_command(Command::new("ping").with_handler(|_| Ok("Pong!".to_string())))
            .unwrap();

        let ping = Message::from_command("c", "ping", vec![]);
        assert_eq!(service.handle(&ping).unwrap().as_deref(), Some("Pong!"));

        let missing = Message::from_command("c", "nope", vec![]);
        assert!(matches!(service.handle(&missing), Err(CommandError::NotFound(_))));

        let help = Message::from_command("c", "help", vec!["ping".to_string()]);
        let text = service.handle(&help).unwrap().unwrap();
        assert!(text.contains("Provided by: General"));
    }

    #[test]
    fn test_help_lists_all_commands() {
        let host = Arc::new(CogHost::new());
        let service = CommandService::new(host, "!");
        service.register_defaults().unwrap();

        let help = service.get_help(None);
        assert!(help.contains("!help"));
        assert!(help.contains("!version"));
    }
}
