//! Cog trait definitions

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::entities::CogTemplate;
use crate::plugins::host::Registrar;

/// Core trait that every cog implements
///
/// A cog contributes commands, event listeners and background tasks to the
/// host. Everything it registers through the [`Registrar`] is owned by the
/// cog and released by the loader when the cog is unloaded, so `teardown`
/// only has to clean up state the cog keeps for itself.
#[async_trait]
pub trait Cog: Send + Sync {
    /// Metadata for listings and name lookup
    fn template(&self) -> &CogTemplate;

    /// Called once per attach; register commands and listeners here
    async fn setup(&mut self, registrar: &mut Registrar) -> Result<(), String>;

    /// Optional: release cog-private resources before the cog is dropped
    async fn teardown(&mut self) -> Result<(), String> {
        Ok(())
    }
}

/// Compiled form of a cog's code; builds fresh instances
pub trait CogModule: Send + Sync {
    fn template(&self) -> CogTemplate;

    /// Build a new, not yet attached instance
    fn construct(&self) -> Result<Box<dyn Cog>, String>;
}

/// Where a cog's code comes from
pub trait CogSource: Send + Sync {
    /// Human-readable origin (file path, builtin module name)
    fn origin(&self) -> String;

    /// Read the code from its origin and compile it, ignoring any earlier result
    fn compile(&self) -> Result<Arc<dyn CogModule>, String>;
}
