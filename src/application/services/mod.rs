//! Application services - Business logic orchestration

pub mod command_service;
pub mod management;

pub use command_service::CommandService;
pub use management::ManagementService;
