//! Cog system for cogbot
//!
//! Cogs are units of bot behaviour that can be loaded, unloaded and reloaded
//! while the bot keeps running.

pub mod host;
pub mod loader;
pub mod manager;
pub mod registry;
pub mod resolver;
pub mod source;
pub mod trait_def;

pub use host::{CogHost, Registrar, Released};
pub use loader::{CogLoader, LiveCog};
pub use manager::{CogDefinition, CogEvent, CogManager, ConfigChange, ReloadAttempt, ReloadOutcome, StartupSummary};
pub use registry::{CogRecord, CogRegistry, CogSnapshot};
pub use resolver::{FuzzyResolver, Resolution, ResolverConfig};
pub use source::{BuiltinSource, FnModule, MissingSource};
pub use trait_def::{Cog, CogModule, CogSource};
