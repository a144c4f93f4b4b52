//! Configuration management

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::application::errors::ConfigError;
use crate::domain::entities::CogId;
use crate::plugins::resolver::ResolverConfig;

/// Bot configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub bot: BotConfig,
    /// User ids allowed to run management commands
    #[serde(default)]
    pub owners: Vec<String>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    /// Ordered cog list; each item maps one module path to its settings
    #[serde(default)]
    pub cogs: Vec<BTreeMap<String, CogSettings>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BotConfig {
    pub name: String,
    pub prefix: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub console_level: String,
    pub output_level: String,
    /// Folder for run logs and failure reports; no file output when unset
    pub output_folder: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            console_level: "info".to_string(),
            output_level: "info".to_string(),
            output_folder: Some(PathBuf::from("logs")),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Upper bound for a single setup or teardown hook
    pub hook_timeout_secs: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self { hook_timeout_secs: 10 }
    }
}

impl LifecycleConfig {
    pub fn hook_timeout(&self) -> Duration {
        Duration::from_secs(self.hook_timeout_secs)
    }
}

/// Settings of one configured cog
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CogSettings {
    pub class: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// Script file for cogs not compiled into the bot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub protected: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl CogSettings {
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            enabled: true,
            path: None,
            protected: false,
        }
    }
}

/// A validated cog list item
#[derive(Debug, Clone, PartialEq)]
pub struct CogEntry {
    pub id: CogId,
    pub module: String,
    pub class: String,
    pub enabled: bool,
    pub protected: bool,
    pub path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let mut greetings = CogSettings::new("Greetings");
        greetings.enabled = false;
        greetings.path = Some(PathBuf::from("cogs/greetings.yaml"));
        let mut general = CogSettings::new("General");
        general.protected = true;

        Self {
            bot: BotConfig {
                name: "cogbot".to_string(),
                prefix: "!".to_string(),
            },
            owners: vec!["console".to_string()],
            logging: LoggingConfig::default(),
            lifecycle: LifecycleConfig::default(),
            resolver: ResolverConfig::default(),
            cogs: vec![
                BTreeMap::from([("cogs.general".to_string(), general)]),
                BTreeMap::from([("cogs.echo".to_string(), CogSettings::new("Echo"))]),
                BTreeMap::from([("cogs.greetings".to_string(), greetings)]),
            ],
        }
    }
}

impl Config {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| ConfigError::Parse(format!("Failed to read config {}: {}", path.display(), e)))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(content)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bot.name.trim().is_empty() {
            return Err(ConfigError::MissingField("bot.name".to_string()));
        }
        if self.bot.prefix.is_empty() {
            return Err(ConfigError::MissingField("bot.prefix".to_string()));
        }
        if self.lifecycle.hook_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "lifecycle.hook_timeout_secs must be at least 1".to_string(),
            ));
        }
        let resolver = &self.resolver;
        if !(0.0..=1.0).contains(&resolver.cutoff) || !(0.0..=1.0).contains(&resolver.auto_accept) {
            return Err(ConfigError::InvalidValue(
                "resolver thresholds must be between 0.0 and 1.0".to_string(),
            ));
        }
        if resolver.auto_accept < resolver.cutoff {
            return Err(ConfigError::InvalidValue(
                "resolver.auto_accept must not be below resolver.cutoff".to_string(),
            ));
        }
        self.cog_entries().map(|_| ())
    }

    /// The cog list flattened into entries, in configuration order
    pub fn cog_entries(&self) -> Result<Vec<CogEntry>, ConfigError> {
        let mut seen = HashSet::new();
        let mut entries = Vec::with_capacity(self.cogs.len());

        for (index, item) in self.cogs.iter().enumerate() {
            let mut pairs = item.iter();
            let (Some((module, settings)), None) = (pairs.next(), pairs.next()) else {
                return Err(ConfigError::InvalidValue(format!(
                    "cogs[{}] must map exactly one module to its settings",
                    index
                )));
            };
            if module.trim().is_empty() {
                return Err(ConfigError::MissingField(format!("cogs[{}] module", index)));
            }
            if settings.class.trim().is_empty() {
                return Err(ConfigError::MissingField(format!("cogs[{}].{}.class", index, module)));
            }

            let id = CogId::new(module, &settings.class);
            if !seen.insert(id.clone()) {
                return Err(ConfigError::InvalidValue(format!("cog `{}` is configured twice", id)));
            }
            entries.push(CogEntry {
                id,
                module: module.clone(),
                class: settings.class.clone(),
                enabled: settings.enabled,
                protected: settings.protected,
                path: settings.path.clone(),
            });
        }
        Ok(entries)
    }

    /// Check if a user may run management commands
    pub fn is_owner(&self, user_id: &str) -> bool {
        self.owners.iter().any(|o| o == user_id)
    }
}
