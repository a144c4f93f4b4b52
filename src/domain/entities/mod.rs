//! Domain entities - Core business objects with no external dependencies

pub mod cog;
pub mod command;
pub mod message;
pub mod report;
pub mod user;

pub use cog::{CogId, CogState, CogStatus, CogTemplate};
pub use command::{Command, CommandHandler, CommandRegistry};
pub use message::{Content, Message, MessageType};
pub use report::{FailureReport, Operation};
pub use user::User;
