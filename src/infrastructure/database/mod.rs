//! SQLite persistence for commands, usage statistics, examples and token ledgers

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use crate::application::errors::StorageError;
use crate::domain::entities::{CommandData, CommandExample, CommandRecord};
use crate::domain::traits::{CommandStore, EconomyStore, StoredCommand};

const COMMAND_COLUMNS: &str = "c.id, c.level, c.action, c.extra_args, c.command, c.description, \
     c.delay_all, c.delay_user, c.enabled, c.cost, c.tokens_cost, \
     c.can_execute_with_whisper, c.sub_only, c.mod_only, \
     d.command_id, d.num_uses, d.added_by, d.edited_by, d.last_date_used";

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let db = Self { conn: Mutex::new(conn) };
        db.init_tables()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn: Mutex::new(conn) };
        db.init_tables()?;
        Ok(db)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Poisoned("database connection".to_string()))
    }

    fn init_tables(&self) -> Result<(), StorageError> {
        let conn = self.conn()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS tb_command (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                level INTEGER NOT NULL DEFAULT 100,
                action TEXT,
                extra_args TEXT,
                command TEXT NOT NULL,
                description TEXT,
                delay_all INTEGER NOT NULL DEFAULT 5,
                delay_user INTEGER NOT NULL DEFAULT 15,
                enabled INTEGER NOT NULL DEFAULT 1,
                cost INTEGER NOT NULL DEFAULT 0,
                tokens_cost INTEGER NOT NULL DEFAULT 0,
                can_execute_with_whisper INTEGER NOT NULL DEFAULT 0,
                sub_only INTEGER NOT NULL DEFAULT 0,
                mod_only INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS tb_command_data (
                command_id INTEGER PRIMARY KEY,
                num_uses INTEGER NOT NULL DEFAULT 0,
                added_by INTEGER,
                edited_by INTEGER,
                last_date_used TEXT,
                FOREIGN KEY (command_id) REFERENCES tb_command(id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS tb_command_example (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                command_id INTEGER NOT NULL,
                title TEXT NOT NULL,
                chat TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                FOREIGN KEY (command_id) REFERENCES tb_command(id)
            )",
            [],
        )?;

        // Token ledgers: one row per (key, session)
        conn.execute(
            "CREATE TABLE IF NOT EXISTS tb_user_tokens (
                key TEXT NOT NULL,
                field TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (key, field)
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_command_example_command ON tb_command_example(command_id)",
            [],
        )?;

        Ok(())
    }

    fn select(conn: &Connection, filter: &str, id: Option<i64>) -> Result<Vec<StoredCommand>, StorageError> {
        let sql = format!(
            "SELECT {} FROM tb_command c LEFT JOIN tb_command_data d ON d.command_id = c.id {} ORDER BY c.id",
            COMMAND_COLUMNS, filter
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = match id {
            Some(id) => stmt.query_map([id], stored_from_row)?.collect::<Result<Vec<_>, _>>()?,
            None => stmt.query_map([], stored_from_row)?.collect::<Result<Vec<_>, _>>()?,
        };
        Ok(rows)
    }
}

fn stored_from_row(row: &Row<'_>) -> rusqlite::Result<StoredCommand> {
    let record = CommandRecord {
        id: row.get(0)?,
        level: row.get(1)?,
        action: row.get(2)?,
        extra_args: row.get(3)?,
        command: row.get(4)?,
        description: row.get(5)?,
        delay_all: row.get(6)?,
        delay_user: row.get(7)?,
        enabled: row.get(8)?,
        cost: row.get(9)?,
        tokens_cost: row.get(10)?,
        can_execute_with_whisper: row.get(11)?,
        sub_only: row.get(12)?,
        mod_only: row.get(13)?,
    };

    let data = match row.get::<_, Option<i64>>(14)? {
        Some(command_id) => {
            let last_date_used: Option<String> = row.get(18)?;
            Some(CommandData {
                command_id: Some(command_id),
                num_uses: row.get(15)?,
                added_by: row.get(16)?,
                edited_by: row.get(17)?,
                last_date_used: last_date_used.as_deref().and_then(parse_timestamp),
            })
        }
        None => None,
    };

    Ok(StoredCommand { record, data })
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    match DateTime::parse_from_rfc3339(value) {
        Ok(ts) => Some(ts.with_timezone(&Utc)),
        Err(e) => {
            tracing::warn!("Ignoring invalid timestamp {:?}: {}", value, e);
            None
        }
    }
}

fn require_id(data: &CommandData) -> Result<i64, StorageError> {
    data.command_id
        .ok_or_else(|| StorageError::NotFound("command data without command id".to_string()))
}

#[async_trait]
impl CommandStore for Database {
    async fn load_all(&self, enabled_only: bool) -> Result<Vec<StoredCommand>, StorageError> {
        let conn = self.conn()?;
        let filter = if enabled_only { "WHERE c.enabled = 1" } else { "" };
        Self::select(&conn, filter, None)
    }

    async fn load_by_id(&self, id: i64, enabled_only: bool) -> Result<Option<StoredCommand>, StorageError> {
        let conn = self.conn()?;
        let filter = if enabled_only {
            "WHERE c.id = ?1 AND c.enabled = 1"
        } else {
            "WHERE c.id = ?1"
        };
        Ok(Self::select(&conn, filter, Some(id))?.into_iter().next())
    }

    async fn insert_command(&self, record: &CommandRecord) -> Result<i64, StorageError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO tb_command (level, action, extra_args, command, description, delay_all, delay_user,
                enabled, cost, tokens_cost, can_execute_with_whisper, sub_only, mod_only)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                record.level,
                record.action,
                record.extra_args,
                record.command,
                record.description,
                record.delay_all,
                record.delay_user,
                record.enabled,
                record.cost,
                record.tokens_cost,
                record.can_execute_with_whisper,
                record.sub_only,
                record.mod_only,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    async fn update_command(&self, record: &CommandRecord) -> Result<(), StorageError> {
        let id = record.id
            .ok_or_else(|| StorageError::NotFound(format!("command {} has no id", record.command)))?;
        let conn = self.conn()?;
        let rows = conn.execute(
            "UPDATE tb_command SET level = ?1, action = ?2, extra_args = ?3, command = ?4, description = ?5,
                delay_all = ?6, delay_user = ?7, enabled = ?8, cost = ?9, tokens_cost = ?10,
                can_execute_with_whisper = ?11, sub_only = ?12, mod_only = ?13
             WHERE id = ?14",
            params![
                record.level,
                record.action,
                record.extra_args,
                record.command,
                record.description,
                record.delay_all,
                record.delay_user,
                record.enabled,
                record.cost,
                record.tokens_cost,
                record.can_execute_with_whisper,
                record.sub_only,
                record.mod_only,
                id,
            ],
        )?;
        if rows == 0 {
            return Err(StorageError::NotFound(format!("command {}", id)));
        }
        Ok(())
    }

    async fn delete_command(&self, id: i64) -> Result<(), StorageError> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM tb_command_example WHERE command_id = ?1", [id])?;
        conn.execute("DELETE FROM tb_command WHERE id = ?1", [id])?;
        Ok(())
    }

    async fn insert_data(&self, data: &CommandData) -> Result<(), StorageError> {
        let command_id = require_id(data)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO tb_command_data (command_id, num_uses, added_by, edited_by, last_date_used)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                command_id,
                data.num_uses,
                data.added_by,
                data.edited_by,
                data.last_date_used.map(|ts| ts.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    async fn update_data(&self, data: &CommandData) -> Result<(), StorageError> {
        let command_id = require_id(data)?;
        let conn = self.conn()?;
        conn.execute(
            "UPDATE tb_command_data SET num_uses = ?1, added_by = ?2, edited_by = ?3, last_date_used = ?4
             WHERE command_id = ?5",
            params![
                data.num_uses,
                data.added_by,
                data.edited_by,
                data.last_date_used.map(|ts| ts.to_rfc3339()),
                command_id,
            ],
        )?;
        Ok(())
    }

    async fn delete_data(&self, command_id: i64) -> Result<(), StorageError> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM tb_command_data WHERE command_id = ?1", [command_id])?;
        Ok(())
    }

    async fn load_examples(&self, command_id: i64) -> Result<Vec<CommandExample>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, title, chat, description FROM tb_command_example WHERE command_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map([command_id], |row| {
            let id: i64 = row.get(0)?;
            let title: String = row.get(1)?;
            let chat: String = row.get(2)?;
            let description: String = row.get(3)?;
            let mut example = CommandExample::from_chat(command_id, title, chat, description);
            example.id = Some(id);
            Ok(example)
        })?;

        let mut examples = Vec::new();
        for example in rows {
            examples.push(example?);
        }
        Ok(examples)
    }

    async fn insert_example(&self, example: &CommandExample) -> Result<i64, StorageError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO tb_command_example (command_id, title, chat, description) VALUES (?1, ?2, ?3, ?4)",
            params![example.command_id, example.title, example.chat, example.description],
        )?;
        Ok(conn.last_insert_rowid())
    }
}

impl EconomyStore for Database {
    fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT field, value FROM tb_user_tokens WHERE key = ?1")?;
        let rows = stmt.query_map([key], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;

        let mut hash = HashMap::new();
        for row in rows {
            let (field, value) = row?;
            hash.insert(field, value);
        }
        Ok(hash)
    }

    fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StorageError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO tb_user_tokens (key, field, value) VALUES (?1, ?2, ?3)",
            params![key, field, value],
        )?;
        Ok(())
    }

    fn hsetnx(&self, key: &str, field: &str, value: &str) -> Result<bool, StorageError> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "INSERT OR IGNORE INTO tb_user_tokens (key, field, value) VALUES (?1, ?2, ?3)",
            params![key, field, value],
        )?;
        Ok(rows > 0)
    }
}

impl Database {
    /// Number of persisted commands, enabled or not
    pub fn count_commands(&self) -> Result<i64, StorageError> {
        let conn = self.conn()?;
        let count = conn.query_row("SELECT COUNT(*) FROM tb_command", [], |row| row.get(0))?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(command: &str) -> CommandRecord {
        CommandRecord {
            id: None,
            level: 100,
            action: Some(r#"{"type":"say","message":"hi"}"#.to_string()),
            extra_args: None,
            command: command.to_string(),
            description: None,
            delay_all: 5,
            delay_user: 15,
            enabled: true,
            cost: 0,
            tokens_cost: 0,
            can_execute_with_whisper: false,
            sub_only: false,
            mod_only: false,
        }
    }

    #[tokio::test]
    async fn test_insert_and_load_command() {
        let db = Database::open_in_memory().unwrap();
        let id = db.insert_command(&record("hello|hi")).await.unwrap();

        let mut data = CommandData::new(Some(id));
        data.num_uses = 3;
        data.last_date_used = Some(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap());
        db.insert_data(&data).await.unwrap();

        let stored = db.load_by_id(id, true).await.unwrap().unwrap();
        assert_eq!(stored.record.id, Some(id));
        assert_eq!(stored.record.command, "hello|hi");
        assert_eq!(stored.data, Some(data));
        assert_eq!(db.count_commands().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_enabled_filter_and_missing_data() {
        let db = Database::open_in_memory().unwrap();
        let mut disabled = record("off");
        disabled.enabled = false;
        let off_id = db.insert_command(&disabled).await.unwrap();
        db.insert_command(&record("on")).await.unwrap();

        let enabled = db.load_all(true).await.unwrap();
        assert_eq!(enabled.len(), 1);
        assert!(enabled[0].data.is_none());

        assert!(db.load_by_id(off_id, true).await.unwrap().is_none());
        assert!(db.load_by_id(off_id, false).await.unwrap().is_some());
        assert_eq!(db.load_all(false).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let db = Database::open_in_memory().unwrap();
        let id = db.insert_command(&record("hello")).await.unwrap();
        db.insert_data(&CommandData::new(Some(id))).await.unwrap();

        let mut updated = record("hello|hey");
        updated.id = Some(id);
        updated.level = 500;
        db.update_command(&updated).await.unwrap();

        let stored = db.load_by_id(id, false).await.unwrap().unwrap();
        assert_eq!(stored.record.level, 500);

        db.delete_data(id).await.unwrap();
        db.delete_command(id).await.unwrap();
        assert!(db.load_by_id(id, false).await.unwrap().is_none());

        updated.id = Some(id + 100);
        assert!(matches!(db.update_command(&updated).await, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_examples_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let id = db.insert_command(&record("points")).await.unwrap();

        let mut example = CommandExample::new(id, "Check your points");
        example.add_chat_message("say", "!points", "user", None);
        example.add_chat_message("whisper", "you have 10 points", "bot", Some("user"));
        db.insert_example(&example).await.unwrap();

        let examples = db.load_examples(id).await.unwrap();
        assert_eq!(examples.len(), 1);
        assert_eq!(examples[0].chat_messages.len(), 2);
        assert_eq!(examples[0].chat_messages[1].to.as_deref(), Some("user"));
    }

    #[test]
    fn test_token_hash() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.hsetnx("channel:viewer:tokens", "s1", "4").unwrap());
        assert!(!db.hsetnx("channel:viewer:tokens", "s1", "9").unwrap());
        db.hset("channel:viewer:tokens", "s1", "2").unwrap();

        let hash = db.hgetall("channel:viewer:tokens").unwrap();
        assert_eq!(hash.get("s1").map(String::as_str), Some("2"));
    }

    #[test]
    fn test_new_creates_parent_directory() {
        let dir = std::env::temp_dir().join(format!("chanbot-{}", uuid::Uuid::new_v4()));
        let path = dir.join("data").join("bot.db");

        let db = Database::new(&path).unwrap();
        assert_eq!(db.count_commands().unwrap(), 0);
        assert!(path.exists());

        drop(db);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
