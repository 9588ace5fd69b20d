//! Domain traits - Abstractions for infrastructure implementations

pub mod chat;
pub mod store;

pub use chat::{ChatSink, Outbound};
pub use store::{CommandStore, EconomyStore, StoredCommand};
