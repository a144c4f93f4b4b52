//! Domain layer - Core business objects and abstractions
//!
//! This layer contains:
//! - Entities: Core business objects (Cog identifiers, Message, Command, reports)
//! - Traits: Abstractions for infrastructure (Bot, ReportSink, CommandTree)

pub mod entities;
pub mod traits;
