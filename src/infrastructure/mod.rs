//! Infrastructure layer - External concerns
//!
//! This layer contains:
//! - Config: Configuration loading
//! - Logging: Subscriber setup
//! - Reports: Failure report persistence
//! - Cogs: Builtin and script cog sources
//! - Adapters: Platform integrations (console)

pub mod adapters;
pub mod cogs;
pub mod config;
pub mod logging;
pub mod reports;
