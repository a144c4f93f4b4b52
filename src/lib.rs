//! cogbot - a chat bot whose behaviour lives in hot-reloadable cogs

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod plugins;
