//! chanbot - chat command engine for live stream bots
//!
//! Layers follow the usual split:
//! - domain: commands, actions, users and the registry that merges them
//! - application: services, dispatching, notifications, errors
//! - infrastructure: config, SQLite storage, chat adapters

pub mod domain;
pub mod application;
pub mod infrastructure;
