//! Infrastructure layer - External concerns
//!
//! This layer contains:
//! - Config: Configuration loading
//! - Database: SQLite command and token persistence
//! - Storage: In-memory token ledger backend
//! - Adapters: Chat transports (console) and test sinks

pub mod config;
pub mod database;
pub mod storage;
pub mod adapters;
