//! Domain traits - Abstractions for infrastructure implementations

pub mod bot;
pub mod report;
pub mod tree;

pub use bot::{Bot, BotInfo};
pub use report::ReportSink;
pub use tree::{CommandTree, PublishedCommand};
