//! Application services - Business logic orchestration

pub mod builtins;
pub mod command_service;
pub mod docs;

pub use command_service::{CommandService, Dispatch, Registration};
pub use docs::CommandDoc;
