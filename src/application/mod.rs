//! Application layer - Use cases and business logic
//!
//! This layer contains:
//! - Services: Command execution and cog management
//! - Errors: Domain-specific errors
//! - Messaging: Message parsing, middleware, dispatching

pub mod errors;
pub mod messaging;
pub mod services;
