//! YAML script cogs
//!
//! A script cog is a manifest file declaring commands with templated replies
//! and event listeners that log. The file is read again on every compile, so
//! editing it and running a reload picks up the change.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::entities::{CogTemplate, Command, Content, Message};
use crate::plugins::host::Registrar;
use crate::plugins::trait_def::{Cog, CogModule, CogSource};

/// Script cog manifest
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ScriptManifest {
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub version: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,

    /// Commands that must already be registered before this cog attaches
    #[serde(default)]
    pub dependencies: Vec<String>,

    #[serde(default)]
    pub commands: Vec<ScriptCommand>,

    #[serde(default)]
    pub listeners: Vec<ScriptListener>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ScriptCommand {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub description: Option<String>,
    pub usage: Option<String>,
    /// Reply text; `{args}` and `{user}` are substituted
    pub reply: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ScriptListener {
    pub event: String,
    /// Logged when the event fires; `{payload}` is substituted
    pub log: String,
}

impl ScriptManifest {
    pub fn parse(content: &str) -> Result<Self, String> {
        let manifest: ScriptManifest =
            serde_yaml::from_str(content).map_err(|e| format!("invalid script: {}", e))?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, String> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
        Self::parse(&content)
    }

    pub fn template(&self) -> CogTemplate {
        let mut template = CogTemplate::new(self.name.clone());
        if let Some(description) = &self.description {
            template = template.with_description(description.clone());
        }
        if let Some(category) = &self.category {
            template = template.with_category(category.clone());
        }
        if let Some(version) = &self.version {
            template = template.with_version(version.clone());
        }
        for author in &self.authors {
            template = template.with_author(author.clone());
        }
        template
    }

    fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("script name must not be empty".to_string());
        }
        let mut seen = HashSet::new();
        for command in &self.commands {
            for name in std::iter::once(&command.name).chain(&command.aliases) {
                if name.is_empty() || name.chars().any(char::is_whitespace) {
                    return Err(format!("invalid command name `{}`", name));
                }
                if !seen.insert(name.to_lowercase()) {
                    return Err(format!("command name `{}` is declared twice", name));
                }
            }
        }
        for listener in &self.listeners {
            if listener.event.trim().is_empty() {
                return Err("listener event must not be empty".to_string());
            }
        }
        Ok(())
    }
}

/// Script file on disk
pub struct ScriptSource {
    path: PathBuf,
}

impl ScriptSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CogSource for ScriptSource {
    fn origin(&self) -> String {
        self.path.display().to_string()
    }

    fn compile(&self) -> Result<Arc<dyn CogModule>, String> {
        let manifest = ScriptManifest::from_file(&self.path)?;
        tracing::debug!(path = %self.path.display(), name = %manifest.name, "Compiled script cog");
        Ok(Arc::new(ScriptModule {
            template: manifest.template(),
            manifest,
        }))
    }
}

/// One compiled version of a script
pub struct ScriptModule {
    template: CogTemplate,
    manifest: ScriptManifest,
}

impl CogModule for ScriptModule {
    fn template(&self) -> CogTemplate {
        self.template.clone()
    }

    fn construct(&self) -> Result<Box<dyn Cog>, String> {
        Ok(Box::new(ScriptCog {
            template: self.template.clone(),
            manifest: self.manifest.clone(),
        }))
    }
}

pub struct ScriptCog {
    template: CogTemplate,
    manifest: ScriptManifest,
}

#[async_trait]
impl Cog for ScriptCog {
    fn template(&self) -> &CogTemplate {
        &self.template
    }

    async fn setup(&mut self, registrar: &mut Registrar) -> Result<(), String> {
        let missing: Vec<&str> = self
            .manifest
            .dependencies
            .iter()
            .filter(|d| !registrar.has_command(d))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(format!("missing required commands: {}", missing.join(", ")));
        }

        for declared in &self.manifest.commands {
            let reply = declared.reply.clone();
            let mut command = Command::new(declared.name.clone())
                .with_aliases(declared.aliases.clone())
                .with_handler(move |msg| Ok(render_reply(&reply, &msg)));
            if let Some(description) = &declared.description {
                command = command.with_description(description.clone());
            }
            if let Some(usage) = &declared.usage {
                command = command.with_usage(usage.clone());
            }
            registrar.add_command(command).map_err(|e| e.to_string())?;
        }

        let name = self.template.name.clone();
        for listener in &self.manifest.listeners {
            let line = listener.log.clone();
            let cog = name.clone();
            registrar.add_listener(listener.event.clone(), move |payload| {
                tracing::info!(cog = %cog, "{}", line.replace("{payload}", payload));
            });
        }
        Ok(())
    }
}

fn render_reply(template: &str, msg: &Message) -> String {
    let args = match &msg.content {
        Content::Command { args, .. } => args.join(" "),
        _ => String::new(),
    };
    let user = msg
        .sender
        .as_ref()
        .map(|u| u.display_name())
        .unwrap_or_else(|| msg.chat_id.clone());
    template.replace("{args}", &args).replace("{user}", &user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{CogId, User};
    use crate::plugins::host::CogHost;

    const GREETINGS: &str = r#"
name: greetings
description: Friendly replies
version: 2.1.0
commands:
  - name: hello
    aliases: [hi]
    reply: "Hello {user}, you said: {args}"
listeners:
  - event: ready
    log: "greetings ready for {payload}"
"#;

    #[test]
    fn test_parse_manifest() {
        let manifest = ScriptManifest::parse(GREETINGS).unwrap();
        let template = manifest.template();
        assert_eq!(template.name, "greetings");
        assert_eq!(template.version, "2.1.0");
        assert_eq!(template.category, "Miscellaneous");
        assert_eq!(manifest.commands[0].aliases, vec!["hi"]);
    }

    #[test]
    fn test_syntax_error_is_reported() {
        let err = ScriptManifest::parse("name: [unclosed").unwrap_err();
        assert!(err.starts_with("invalid script"));
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        assert!(ScriptManifest::parse("name: x\nreplies: []").is_err());
    }

    #[test]
    fn test_duplicate_command_names_are_rejected() {
        let yaml = "name: x\ncommands:\n  - { name: a, reply: r }\n  - { name: b, aliases: [A], reply: r }";
        let err = ScriptManifest::parse(yaml).unwrap_err();
        assert!(err.contains("declared twice"));
    }

    #[tokio::test]
    async fn test_script_cog_registers_commands() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("greetings.yaml");
        std::fs::write(&path, GREETINGS).unwrap();

        let module = ScriptSource::new(&path).compile().unwrap();
        let mut cog = module.construct().unwrap();
        let host = Arc::new(CogHost::new());
        let mut registrar = host.registrar(CogId::new("cogs.greetings", "Greetings"));
        cog.setup(&mut registrar).await.unwrap();

        let handler = host.find_command("hi").unwrap().handler.unwrap();
        let msg = Message::from_command("c", "hello", vec!["good".to_string(), "day".to_string()])
            .with_sender(User::new("7").with_username("ana"));
        assert_eq!(handler(msg).unwrap(), "Hello ana, you said: good day");
        assert_eq!(host.emit("ready", "cogbot"), 1);
    }

    #[tokio::test]
    async fn test_missing_dependency_fails_setup() {
        let manifest = ScriptManifest::parse("name: x\ndependencies: [ping]").unwrap();
        let module = ScriptModule {
            template: manifest.template(),
            manifest,
        };
        let mut cog = module.construct().unwrap();
        let host = Arc::new(CogHost::new());
        let mut registrar = host.registrar(CogId::new("cogs.x", "X"));

        let err = cog.setup(&mut registrar).await.unwrap_err();
        assert!(err.contains("ping"));
    }

    #[test]
    fn test_missing_file_fails_compile() {
        let err = ScriptSource::new("/nonexistent/cog.yaml").compile().err().unwrap();
        assert!(err.contains("cannot read"));
    }
}
