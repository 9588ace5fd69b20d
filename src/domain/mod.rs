//! Domain layer - Core business logic
//! 
//! This layer contains:
//! - Entities: Core business objects (Command, Action, User, registry)
//! - Traits: Abstractions for infrastructure (ChatSink, CommandStore, EconomyStore)
//! - Rules: Admission control and tier merging invariants

pub mod entities;
pub mod traits;

#[cfg(test)]
pub(crate) mod testing;
