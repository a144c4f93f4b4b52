//! Cog sources available to the bot: builtins and YAML scripts

pub mod builtin;
pub mod script;

use std::path::PathBuf;
use std::sync::Arc;

use crate::infrastructure::config::CogEntry;
use crate::plugins::manager::CogDefinition;
use crate::plugins::source::MissingSource;
use crate::plugins::trait_def::CogSource;

pub use builtin::{builtin_source, Echo, General};
pub use script::{ScriptManifest, ScriptSource};

/// Maps configured entries to the sources their code comes from
pub struct CogCatalog {
    /// Relative script paths are resolved against this folder
    base_dir: PathBuf,
}

impl CogCatalog {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn source_for(&self, entry: &CogEntry) -> Arc<dyn CogSource> {
        if let Some(path) = &entry.path {
            return Arc::new(ScriptSource::new(self.base_dir.join(path)));
        }
        builtin_source(&entry.module, &entry.class).unwrap_or_else(|| {
            tracing::warn!(cog = %entry.id, "No builtin cog matches this entry");
            Arc::new(MissingSource::new(entry.module.clone()))
        })
    }

    pub fn definitions(&self, entries: &[CogEntry]) -> Vec<CogDefinition> {
        entries
            .iter()
            .map(|entry| {
                CogDefinition::new(entry.id.clone(), self.source_for(entry))
                    .enabled(entry.enabled)
                    .protected(entry.protected)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::CogId;

    fn entry(module: &str, class: &str, path: Option<&str>) -> CogEntry {
        CogEntry {
            id: CogId::new(module, class),
            module: module.to_string(),
            class: class.to_string(),
            enabled: true,
            protected: false,
            path: path.map(PathBuf::from),
        }
    }

    #[test]
    fn test_sources_by_kind() {
        let catalog = CogCatalog::new("/srv/bot");

        let script = catalog.source_for(&entry("cogs.greetings", "Greetings", Some("cogs/greetings.yaml")));
        assert_eq!(script.origin(), "/srv/bot/cogs/greetings.yaml");

        let builtin = catalog.source_for(&entry("cogs.echo", "Echo", None));
        assert_eq!(builtin.origin(), "builtin:cogs.echo");

        let missing = catalog.source_for(&entry("cogs.nope", "Nope", None));
        assert_eq!(missing.origin(), "missing:cogs.nope");
        assert!(missing.compile().is_err());
    }
}
