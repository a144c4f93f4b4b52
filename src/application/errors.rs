//! Application layer errors

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::domain::entities::CogId;

/// General bot errors
#[derive(Error, Debug)]
pub enum BotError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    #[error("Cog error: {0}")]
    Cog(#[from] CogError),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Command execution errors
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Command not found: {0}")]
    NotFound(String),

    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Command `{name}` is already registered by {owner}")]
    Conflict { name: String, owner: String },

    #[error("Permission denied")]
    PermissionDenied,
}

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Step of a load at which a cog failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadPhase {
    /// Reading or compiling the cog's source
    Import,
    /// Building the cog instance from its compiled module
    Construction,
    /// The cog's own setup hook
    SetupHook,
}

impl LoadPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadPhase::Import => "import",
            LoadPhase::Construction => "construction",
            LoadPhase::SetupHook => "setup hook",
        }
    }
}

impl fmt::Display for LoadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cog could not be brought up
#[derive(Error, Debug, Clone)]
#[error("{phase} error in cog `{id}`: {cause}")]
pub struct LoadError {
    pub id: CogId,
    pub phase: LoadPhase,
    pub cause: String,
    /// Outermost-first description of what the loader was doing
    pub context: Vec<String>,
}

impl LoadError {
    pub fn new(id: CogId, phase: LoadPhase, cause: impl Into<String>) -> Self {
        Self {
            id,
            phase,
            cause: cause.into(),
            context: Vec::new(),
        }
    }

    pub fn with_context(mut self, line: impl Into<String>) -> Self {
        self.context.push(line.into());
        self
    }

    /// Multi-line diagnostic used for reports
    pub fn details(&self) -> String {
        let mut out = format!("{}\n", self);
        for line in &self.context {
            out.push_str(&format!("  while {}\n", line));
        }
        out
    }
}

/// A cog's teardown hook failed; the instance is discarded regardless
#[derive(Error, Debug, Clone)]
#[error("teardown of cog `{id}` failed: {cause}")]
pub struct UnloadError {
    pub id: CogId,
    pub cause: String,
}

/// A cog's code could not be re-read from its origin
#[derive(Error, Debug, Clone)]
#[error("could not refresh cog `{id}` from {origin}: {cause}")]
pub struct ReloadSourceError {
    pub id: CogId,
    pub origin: String,
    pub cause: String,
}

impl From<ReloadSourceError> for LoadError {
    fn from(e: ReloadSourceError) -> Self {
        LoadError::new(e.id, LoadPhase::Import, e.cause)
            .with_context(format!("re-reading source from {}", e.origin))
    }
}

/// Cog lifecycle errors surfaced to the command layer
#[derive(Error, Debug)]
pub enum CogError {
    #[error("Cog `{input}` not found")]
    NotFound {
        input: String,
        suggestions: Vec<String>,
    },

    #[error("Cog `{0}` is already loaded")]
    AlreadyLoaded(CogId),

    #[error("Cog `{0}` is not loaded")]
    NotLoaded(CogId),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Unload(#[from] UnloadError),

    #[error(transparent)]
    ReloadSource(#[from] ReloadSourceError),

    #[error("Another operation on cog `{0}` is already in progress")]
    ConcurrentReload(CogId),

    #[error("Cog `{id}` is broken: reload failed ({reload}) and rollback failed ({rollback})")]
    RollbackFailure {
        id: CogId,
        reload: LoadError,
        rollback: LoadError,
    },

    #[error("Cog `{0}` is protected and cannot be unloaded")]
    Protected(CogId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_error_details_include_context() {
        let err = LoadError::new(CogId::new("cogs.echo", "Echo"), LoadPhase::Import, "bad indent")
            .with_context("compiling cogs/echo.yaml");

        let details = err.details();
        assert!(details.starts_with("import error in cog `cogs.echo.Echo`: bad indent"));
        assert!(details.contains("while compiling cogs/echo.yaml"));
    }

    #[test]
    fn test_reload_source_error_maps_to_import_phase() {
        let err = ReloadSourceError {
            id: CogId::new("cogs.echo", "Echo"),
            origin: "cogs/echo.yaml".to_string(),
            cause: "file vanished".to_string(),
        };
        let load: LoadError = err.into();
        assert_eq!(load.phase, LoadPhase::Import);
        assert_eq!(load.cause, "file vanished");
    }
}
