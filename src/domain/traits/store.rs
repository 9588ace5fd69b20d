use std::collections::HashMap;

use async_trait::async_trait;

use crate::application::errors::StorageError;
use crate::domain::entities::{CommandData, CommandExample, CommandRecord};

/// A persisted command row together with its usage statistics
#[derive(Debug, Clone)]
pub struct StoredCommand {
    pub record: CommandRecord,
    pub data: Option<CommandData>,
}

/// CommandStore trait - keyed record store for persisted commands
///
/// Works on plain records so callers never hold a command lock across I/O.
#[async_trait]
pub trait CommandStore: Send + Sync {
    // Command rows
    async fn load_all(&self, enabled_only: bool) -> Result<Vec<StoredCommand>, StorageError>;
    async fn load_by_id(&self, id: i64, enabled_only: bool) -> Result<Option<StoredCommand>, StorageError>;
    async fn insert_command(&self, record: &CommandRecord) -> Result<i64, StorageError>;
    async fn update_command(&self, record: &CommandRecord) -> Result<(), StorageError>;
    async fn delete_command(&self, id: i64) -> Result<(), StorageError>;

    // Usage statistics
    async fn insert_data(&self, data: &CommandData) -> Result<(), StorageError>;
    async fn update_data(&self, data: &CommandData) -> Result<(), StorageError>;
    async fn delete_data(&self, command_id: i64) -> Result<(), StorageError>;

    // Documentation examples
    async fn load_examples(&self, command_id: i64) -> Result<Vec<CommandExample>, StorageError>;
    async fn insert_example(&self, example: &CommandExample) -> Result<i64, StorageError>;
}

/// EconomyStore trait - hash-per-key value store backing token ledgers
///
/// Synchronous on purpose: it is consulted from inside the admission pipeline.
pub trait EconomyStore: Send + Sync {
    fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StorageError>;
    fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StorageError>;
    /// Set `field` only if it does not exist yet; returns whether it was written
    fn hsetnx(&self, key: &str, field: &str, value: &str) -> Result<bool, StorageError>;
}
