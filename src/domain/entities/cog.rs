use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies a loadable cog: module path plus class name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CogId(String);

impl CogId {
    pub fn new(module: impl AsRef<str>, class: impl AsRef<str>) -> Self {
        Self(format!("{}.{}", module.as_ref(), class.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Module path part (everything before the last dot)
    pub fn module(&self) -> &str {
        self.0.rsplit_once('.').map(|(m, _)| m).unwrap_or("")
    }

    /// Class name part
    pub fn class(&self) -> &str {
        self.0.rsplit_once('.').map(|(_, c)| c).unwrap_or(&self.0)
    }
}

impl fmt::Display for CogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a cog record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CogState {
    Unloaded,
    Loaded,
    /// Both the new code and the last good code failed to come up
    Failed,
}

impl CogState {
    pub fn as_str(&self) -> &str {
        match self {
            CogState::Unloaded => "unloaded",
            CogState::Loaded => "loaded",
            CogState::Failed => "failed",
        }
    }
}

impl fmt::Display for CogState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata every cog must provide
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CogTemplate {
    /// Display name, also used as the primary lookup key
    pub name: String,
    #[serde(default = "default_description")]
    pub description: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub authors: Vec<String>,
}

fn default_description() -> String {
    "No description provided.".to_string()
}

fn default_category() -> String {
    "Miscellaneous".to_string()
}

fn default_version() -> String {
    "1.0.0".to_string()
}

impl CogTemplate {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: default_description(),
            category: default_category(),
            version: default_version(),
            authors: Vec::new(),
        }
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.authors.push(author.into());
        self
    }
}

/// Read-only row describing a cog, used for listings
#[derive(Debug, Clone, Serialize)]
pub struct CogStatus {
    pub id: CogId,
    /// Template name once known (after the source has been compiled once)
    pub name: Option<String>,
    pub state: CogState,
    pub enabled: bool,
    pub protected: bool,
    pub origin: String,
}

impl CogStatus {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or_else(|| self.id.class())
    }
}
