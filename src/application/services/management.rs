//! Management commands: cog lifecycle and command tree
//!
//! `m cog list|load|unload|reload <name>`, `m tree sync|reset|list [scope]`
//! and `m config reload`.
//! Responses are plain text for whatever adapter sends them on.

use std::sync::Arc;

use crate::application::errors::CogError;
use crate::domain::entities::{CogState, CogStatus};
use crate::domain::traits::{CommandTree, PublishedCommand};
use crate::plugins::manager::{CogDefinition, CogManager, ConfigChange, ReloadAttempt, ReloadOutcome};

/// Names the management command answers to
pub const MANAGEMENT_COMMANDS: [&str; 2] = ["management", "m"];

/// Re-reads the configured cog list
pub type DefinitionSource = Arc<dyn Fn() -> Result<Vec<CogDefinition>, String> + Send + Sync>;

pub struct ManagementService {
    manager: Arc<CogManager>,
    tree: Option<Arc<dyn CommandTree>>,
    config: Option<DefinitionSource>,
}

impl ManagementService {
    pub fn new(manager: Arc<CogManager>) -> Self {
        Self {
            manager,
            tree: None,
            config: None,
        }
    }

    pub fn with_tree(mut self, tree: Arc<dyn CommandTree>) -> Self {
        self.tree = Some(tree);
        self
    }

    pub fn with_config(mut self, source: DefinitionSource) -> Self {
        self.config = Some(source);
        self
    }

    pub fn is_management(name: &str) -> bool {
        MANAGEMENT_COMMANDS.iter().any(|c| c.eq_ignore_ascii_case(name))
    }

    /// Run `m <args>` and render the reply
    pub async fn handle(&self, args: &[String]) -> String {
        let words: Vec<String> = args.iter().map(|s| s.to_lowercase()).collect();
        let group = words.first().and_then(|w| group_name(w));
        let action = match (group, words.get(1)) {
            (Some(group), Some(word)) => action_name(group, word),
            _ => None,
        };
        let rest = args.get(2..).map(|r| r.join(" ")).unwrap_or_default();

        match (group, action) {
            (Some("help"), _) => help_for(&words[1..]),
            (Some("cog"), Some("list")) => self.list().await,
            (Some("cog"), Some(op @ ("load" | "unload" | "reload"))) if rest.is_empty() => {
                format!("Usage: m cog {} <name>", op)
            }
            (Some("cog"), Some("load")) => self.load(&rest).await,
            (Some("cog"), Some("unload")) => self.unload(&rest).await,
            (Some("cog"), Some("reload")) => self.reload(&rest).await,
            (Some("tree"), Some("list")) => self.tree_list(),
            (Some("tree"), Some("sync")) => self.tree_sync(non_empty(&rest)).await,
            (Some("tree"), Some("reset")) => self.tree_reset(non_empty(&rest)).await,
            (Some("config"), Some("reload")) => self.config_reload().await,
            (Some(group), _) => help_for(&[group.to_string()]),
            _ => help(),
        }
    }

    async fn list(&self) -> String {
        let statuses = self.manager.list().await;
        if statuses.is_empty() {
            return "No cogs configured.".to_string();
        }

        let mut out = String::from("Cogs:\n");
        let groups: [(&str, fn(&CogStatus) -> bool); 4] = [
            ("Loaded", |s| s.state == CogState::Loaded),
            ("Failed", |s| s.state == CogState::Failed),
            ("Not loaded", |s| s.state == CogState::Unloaded && s.enabled),
            ("Disabled", |s| s.state == CogState::Unloaded && !s.enabled),
        ];
        for (title, belongs) in groups {
            let rows: Vec<&CogStatus> = statuses.iter().filter(|s| belongs(s)).collect();
            if rows.is_empty() {
                continue;
            }
            out.push_str(&format!("\n{}:\n", title));
            for status in rows {
                let lock = if status.protected { " (protected)" } else { "" };
                out.push_str(&format!("  {} [{}]{}\n", status.display_name(), status.id, lock));
            }
        }
        out
    }

    async fn load(&self, input: &str) -> String {
        let id = match self.manager.lookup(input) {
            Ok(id) => id,
            Err(e) => return render_error(&e),
        };
        match self.manager.load(&id).await {
            Ok(status) => format!("Loaded `{}`.", status.display_name()),
            Err(e) => render_error(&e),
        }
    }

    async fn unload(&self, input: &str) -> String {
        let id = match self.manager.lookup(input) {
            Ok(id) => id,
            Err(e) => return render_error(&e),
        };
        match self.manager.unload(&id).await {
            Ok(released) => format!(
                "Unloaded `{}` ({} commands, {} listeners, {} tasks released).",
                id.class(),
                released.commands,
                released.listeners,
                released.tasks
            ),
            Err(CogError::Unload(e)) => format!(
                "Unloaded `{}`, but its teardown failed: {}. A report was written.",
                id.class(),
                e.cause
            ),
            Err(e) => render_error(&e),
        }
    }

    async fn reload(&self, input: &str) -> String {
        let id = match self.manager.lookup(input) {
            Ok(id) => id,
            Err(e) => return render_error(&e),
        };
        match self.manager.reload(&id).await {
            Ok(attempt) => render_attempt(&attempt),
            Err(e) => render_error(&e),
        }
    }

    fn published(&self) -> Vec<PublishedCommand> {
        let mut commands: Vec<PublishedCommand> = self
            .manager
            .host()
            .commands()
            .into_iter()
            .map(|c| PublishedCommand {
                name: c.name,
                description: c.description,
                cog: c.owner.map(|o| o.class().to_string()),
            })
            .collect();
        commands.sort_by(|a, b| a.name.cmp(&b.name));
        commands
    }

    fn tree_list(&self) -> String {
        let commands = self.published();
        let mut out = format!("{} commands:\n", commands.len());
        for command in commands {
            out.push_str(&format!(
                "  {} ({})\n",
                command.name,
                command.cog.as_deref().unwrap_or("host")
            ));
        }
        out
    }

    async fn tree_sync(&self, scope: Option<&str>) -> String {
        let Some(tree) = &self.tree else {
            return "No command tree is attached to this bot.".to_string();
        };
        match tree.sync(scope, &self.published()).await {
            Ok(count) => format!("Synced {} commands to {}.", count, scope.unwrap_or("global scope")),
            Err(e) => format!("Failed to sync command tree: {}", e),
        }
    }

    async fn config_reload(&self) -> String {
        let Some(source) = &self.config else {
            return "No configuration file is attached to this bot.".to_string();
        };
        match source() {
            Ok(definitions) => render_change(&self.manager.apply_config(definitions).await),
            Err(e) => format!("Configuration not applied: {}", e),
        }
    }

    async fn tree_reset(&self, scope: Option<&str>) -> String {
        let Some(tree) = &self.tree else {
            return "No command tree is attached to this bot.".to_string();
        };
        match tree.reset(scope).await {
            Ok(()) => format!("Reset command tree for {}.", scope.unwrap_or("global scope")),
            Err(e) => format!("Failed to reset command tree: {}", e),
        }
    }
}

fn non_empty(s: &str) -> Option<&str> {
    Some(s).filter(|s| !s.is_empty())
}

/// Group, action and help line of every management command
const HELP: [(&str, &str, &str); 8] = [
    ("cog", "list", "m cog list (c ls)              - list cogs by state"),
    ("cog", "load", "m cog load <name> (c l)        - load a cog"),
    ("cog", "unload", "m cog unload <name> (c u)      - unload a cog"),
    ("cog", "reload", "m cog reload <name> (c r)      - reload a cog, rolling back on failure"),
    ("tree", "list", "m tree list (t l)              - show commands that would be published"),
    ("tree", "sync", "m tree sync [scope] (t s)      - publish commands"),
    ("tree", "reset", "m tree reset [scope] (t r)     - clear published commands"),
    ("config", "reload", "m config reload                - re-read the cog list from the config file"),
];

fn group_name(word: &str) -> Option<&'static str> {
    match word {
        "cog" | "c" => Some("cog"),
        "tree" | "t" => Some("tree"),
        "config" => Some("config"),
        "help" | "h" => Some("help"),
        _ => None,
    }
}

fn action_name(group: &str, word: &str) -> Option<&'static str> {
    match (group, word) {
        ("cog", "list" | "ls") => Some("list"),
        ("cog", "load" | "l") => Some("load"),
        ("cog", "unload" | "u") => Some("unload"),
        ("cog", "reload" | "r") => Some("reload"),
        ("tree", "list" | "l") => Some("list"),
        ("tree", "sync" | "s") => Some("sync"),
        ("tree", "reset" | "r") => Some("reset"),
        ("config", "reload") => Some("reload"),
        _ => None,
    }
}

fn help() -> String {
    let mut lines = vec!["Management commands (m, management):"];
    lines.extend(HELP.iter().map(|(_, _, line)| *line));
    lines.push("m help [command] (h)            - show this help");
    lines.join("\n")
}

/// Help for `m help <group> [action]`; anything unknown gets the full help
fn help_for(topic: &[String]) -> String {
    let Some(group) = topic.first().and_then(|w| group_name(w)) else {
        return help();
    };
    let action = topic.get(1).and_then(|w| action_name(group, w));
    let lines: Vec<&str> = HELP
        .iter()
        .filter(|(g, a, _)| *g == group && action.map_or(true, |action| *a == action))
        .map(|(_, _, line)| *line)
        .collect();
    if lines.is_empty() {
        return help();
    }
    lines.join("\n")
}

fn render_change(change: &ConfigChange) -> String {
    let groups = [
        ("Added", &change.added),
        ("Removed", &change.removed),
        ("Updated", &change.updated),
        ("Busy, left as is", &change.busy),
    ];
    let lines: Vec<String> = groups
        .iter()
        .filter(|(_, ids)| !ids.is_empty())
        .map(|(title, ids)| {
            let names: Vec<&str> = ids.iter().map(|id| id.as_str()).collect();
            format!("{}: {}", title, names.join(", "))
        })
        .collect();
    if lines.is_empty() {
        "Configuration reloaded, no cog changes.".to_string()
    } else {
        format!("Configuration reloaded.\n{}", lines.join("\n"))
    }
}

fn render_attempt(attempt: &ReloadAttempt) -> String {
    let name = &attempt.started_from.name;
    let mut out = match &attempt.outcome {
        ReloadOutcome::Success => format!("Reloaded `{}`.", name),
        ReloadOutcome::RolledBack { reason } => format!(
            "Reload of `{}` failed ({} error: {}). Rolled back to v{}; the cog keeps running as before.",
            name, reason.phase, reason.cause, attempt.started_from.version
        ),
        ReloadOutcome::Failed { reason, rollback } => format!(
            "Reload of `{}` failed ({} error: {}) and so did the rollback ({}). The cog is now unavailable; fix it and run `m cog load {}`.",
            name, reason.phase, reason.cause, rollback.cause, name
        ),
    };
    if let Some(teardown) = &attempt.teardown_error {
        out.push_str(&format!("\nNote: the old instance failed to tear down: {}", teardown.cause));
    }
    out
}

fn render_error(error: &CogError) -> String {
    match error {
        CogError::NotFound { input, suggestions } if !suggestions.is_empty() => {
            format!("Cog `{}` not found. Did you mean: {}?", input, suggestions.join(", "))
        }
        CogError::Load(e) => format!("Failed to load `{}` ({} error): {}", e.id.class(), e.phase, e.cause),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::domain::entities::{CogId, CogTemplate};
    use crate::infrastructure::adapters::ConsoleCommandTree;
    use crate::infrastructure::cogs::builtin_source;
    use crate::infrastructure::reports::MemoryReportSink;
    use crate::plugins::host::CogHost;
    use crate::plugins::loader::CogLoader;
    use crate::plugins::resolver::ResolverConfig;
    use crate::plugins::source::MissingSource;

    fn args(line: &str) -> Vec<String> {
        line.split_whitespace().map(str::to_string).collect()
    }

    async fn service() -> (ManagementService, Arc<ConsoleCommandTree>) {
        let host = Arc::new(CogHost::new());
        let manager = Arc::new(CogManager::new(
            CogLoader::new(host, Duration::from_secs(2)),
            ResolverConfig::default(),
            Arc::new(MemoryReportSink::new()),
        ));
        let echo = CogId::new("cogs.echo", "Echo");
        manager
            .add_cog(CogDefinition::new(echo.clone(), builtin_source("cogs.echo", "Echo").unwrap()))
            .await;
        manager
            .add_cog(
                CogDefinition::new(CogId::new("cogs.general", "General"), builtin_source("cogs.general", "General").unwrap())
                    .protected(true),
            )
            .await;
        manager
            .add_cog(
                CogDefinition::new(CogId::new("cogs.ghost", "Ghost"), Arc::new(MissingSource::new("cogs.ghost")))
                    .enabled(false),
            )
            .await;
        manager.load_enabled().await;

        let tree = Arc::new(ConsoleCommandTree::new());
        let service = ManagementService::new(manager).with_tree(Arc::clone(&tree) as Arc<dyn CommandTree>);
        (service, tree)
    }

    #[tokio::test]
    async fn test_list_groups_by_state() {
        let (service, _) = service().await;
        let out = service.handle(&args("cog list")).await;
        assert!(out.contains("Loaded:\n  Echo [cogs.echo.Echo]"));
        assert!(out.contains("General [cogs.general.General] (protected)"));
        assert!(out.contains("Disabled:\n  Ghost"));
    }

    #[tokio::test]
    async fn test_load_unload_cycle_with_typo() {
        let (service, _) = service().await;
        assert_eq!(service.handle(&args("cog load Echo")).await, "Cog `cogs.echo.Echo` is already loaded");
        assert!(service.handle(&args("cog unload echoo")).await.starts_with("Unloaded `Echo`"));
        assert_eq!(service.handle(&args("cog load echo")).await, "Loaded `Echo`.");
    }

    #[tokio::test]
    async fn test_protected_and_unknown() {
        let (service, _) = service().await;
        assert!(service.handle(&args("cog unload general")).await.contains("protected"));
        assert_eq!(service.handle(&args("cog reload zzzz")).await, "Cog `zzzz` not found");
        assert!(service.handle(&args("cog load ghost")).await.contains("import error"));
        assert_eq!(service.handle(&args("cog reload")).await, "Usage: m cog reload <name>");
    }

    #[tokio::test]
    async fn test_short_aliases() {
        let (service, tree) = service().await;
        assert_eq!(service.handle(&args("c r echo")).await, "Reloaded `Echo`.");
        assert!(service.handle(&args("c u echo")).await.starts_with("Unloaded `Echo`"));
        assert_eq!(service.handle(&args("c l echo")).await, "Loaded `Echo`.");
        assert!(service.handle(&args("c ls")).await.starts_with("Cogs:"));

        assert!(service.handle(&args("t s")).await.starts_with("Synced 3 commands"));
        assert!(!tree.published(None).is_empty());
        service.handle(&args("t r")).await;
        assert!(tree.published(None).is_empty());
    }

    #[tokio::test]
    async fn test_help_topics() {
        let (service, _) = service().await;
        assert!(service.handle(&args("h")).await.starts_with("Management commands"));
        assert_eq!(
            service.handle(&args("help cog reload")).await,
            "m cog reload <name> (c r)      - reload a cog, rolling back on failure"
        );
        let unknown = service.handle(&args("bogus")).await;
        assert!(unknown.starts_with("Management commands"));
        let cog_only = service.handle(&args("c")).await;
        assert_eq!(cog_only.lines().count(), 4);
        assert!(cog_only.lines().all(|l| l.starts_with("m cog")));
    }

    #[tokio::test]
    async fn test_reload_success_message() {
        let (service, _) = service().await;
        assert_eq!(service.handle(&args("cog reload echo")).await, "Reloaded `Echo`.");
    }

    #[tokio::test]
    async fn test_tree_sync_publishes_host_commands() {
        let (service, tree) = service().await;
        let out = service.handle(&args("tree sync")).await;
        assert!(out.starts_with("Synced 3 commands"));
        assert!(tree.published(None).iter().any(|c| c.name == "ping" && c.cog.as_deref() == Some("General")));

        service.handle(&args("tree reset")).await;
        assert!(tree.published(None).is_empty());
    }

    #[tokio::test]
    async fn test_config_reload_applies_new_cog_list() {
        let (service, _) = service().await;
        assert!(service.handle(&args("config reload")).await.starts_with("No configuration file"));

        let service = service.with_config(Arc::new(|| -> Result<Vec<CogDefinition>, String> {
            Ok(vec![CogDefinition::new(
                CogId::new("cogs.echo", "Echo"),
                builtin_source("cogs.echo", "Echo").ok_or("missing echo")?,
            )])
        }));
        let out = service.handle(&args("config reload")).await;
        assert!(out.contains("Removed: cogs.general.General, cogs.ghost.Ghost"));

        let list = service.handle(&args("cog list")).await;
        assert!(!list.contains("General"));
        assert!(list.contains("Echo"));
    }

    #[test]
    fn test_rollback_message_names_previous_version() {
        let attempt = ReloadAttempt {
            id: CogId::new("cogs.echo", "Echo"),
            started_from: CogTemplate::new("Echo").with_version("1.2.0"),
            outcome: ReloadOutcome::RolledBack {
                reason: crate::application::errors::LoadError::new(
                    CogId::new("cogs.echo", "Echo"),
                    crate::application::errors::LoadPhase::Import,
                    "bad indent",
                ),
            },
            teardown_error: None,
            started_at: chrono::Utc::now(),
            finished_at: chrono::Utc::now(),
        };
        let out = render_attempt(&attempt);
        assert!(out.contains("import error: bad indent"));
        assert!(out.contains("Rolled back to v1.2.0"));
    }
}
