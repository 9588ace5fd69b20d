//! Application layer - Use cases and business logic
//!
//! This layer contains:
//! - Services: Command service, built-in commands, documentation projection
//! - Errors: Domain-specific errors
//! - Messaging: Message parsing, dispatching, change notifications, authoring

pub mod errors;
pub mod services;
pub mod messaging;
