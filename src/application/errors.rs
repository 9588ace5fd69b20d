//! Application layer errors

use thiserror::Error;

/// General bot errors
#[derive(Error, Debug)]
pub enum BotError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    #[error("Chat egress error: {0}")]
    Egress(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Command execution errors
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Unknown callback: {0}")]
    UnknownCallback(String),
}

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Lock poisoned: {0}")]
    Poisoned(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Reasons a command invocation did not run.
///
/// These are expected outcomes of admission control, not faults: callers log
/// them at debug level at most.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AdmissionDenied {
    #[error("command has no action")]
    NoAction,

    #[error("command is disabled")]
    Disabled,

    #[error("level {have} is below the required level {need}")]
    InsufficientLevel { have: i32, need: i32 },

    #[error("command cannot be used through whispers")]
    WhisperNotAllowed,

    #[error("command is for subscribers only")]
    SubscribersOnly,

    #[error("command is for moderators only")]
    ModeratorsOnly,

    #[error("command is on global cooldown for {remaining:.1}s")]
    GlobalCooldown { remaining: f64 },

    #[error("command is on user cooldown for {remaining:.1}s")]
    UserCooldown { remaining: f64 },

    #[error("command costs {cost} points, {available} available")]
    InsufficientPoints { cost: i64, available: i64 },

    #[error("command costs {cost} tokens, {available} available")]
    InsufficientTokens { cost: i64, available: i64 },

    #[error("action did not run")]
    ActionDidNotRun,

    #[error("{currency} could not be spent after the action ran")]
    SpendRace { currency: &'static str },
}

/// Malformed change notifications
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotificationError {
    #[error("notification is not an object")]
    NotAnObject,

    #[error("notification has no type")]
    MissingType,

    #[error("unknown notification type: {0}")]
    UnknownType(String),

    #[error("notification has no command id")]
    MissingCommandId,

    #[error("invalid command id: {0}")]
    InvalidCommandId(String),
}
