//! Change notifications from other processes (web admin, other bot instances)

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::application::errors::{BotError, NotificationError};
use crate::application::services::CommandService;

/// A parsed change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// The set of enabled modules changed
    ModuleUpdate,
    CommandUpdate { command_id: i64 },
    CommandRemove { command_id: i64 },
}

impl Notification {
    /// Parse a payload such as `{"type":"command.update","command_id":"12"}`.
    ///
    /// The command id may be a number or a numeric string, either at the top
    /// level or inside a nested `data` object.
    pub fn parse(payload: &Value) -> Result<Self, NotificationError> {
        let object = payload.as_object().ok_or(NotificationError::NotAnObject)?;
        let kind = object
            .get("type")
            .and_then(Value::as_str)
            .ok_or(NotificationError::MissingType)?;

        match kind {
            "module.update" => Ok(Notification::ModuleUpdate),
            "command.update" => Ok(Notification::CommandUpdate {
                command_id: command_id(payload)?,
            }),
            "command.remove" => Ok(Notification::CommandRemove {
                command_id: command_id(payload)?,
            }),
            other => Err(NotificationError::UnknownType(other.to_string())),
        }
    }
}

fn command_id(payload: &Value) -> Result<i64, NotificationError> {
    let value = payload
        .get("data")
        .and_then(|data| data.get("command_id"))
        .or_else(|| payload.get("command_id"))
        .ok_or(NotificationError::MissingCommandId)?;

    match value {
        Value::Number(n) => n.as_i64().ok_or_else(|| NotificationError::InvalidCommandId(n.to_string())),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| NotificationError::InvalidCommandId(s.clone())),
        other => Err(NotificationError::InvalidCommandId(other.to_string())),
    }
}

/// Applies notifications to the command service
#[derive(Clone)]
pub struct NotificationHandler {
    service: Arc<CommandService>,
}

impl NotificationHandler {
    pub fn new(service: Arc<CommandService>) -> Self {
        Self { service }
    }

    /// Handle one payload. Malformed payloads are logged and ignored.
    pub async fn handle(&self, payload: &Value) -> Result<(), BotError> {
        let notification = match Notification::parse(payload) {
            Ok(notification) => notification,
            Err(e) => {
                tracing::warn!("Ignoring notification {}: {}", payload, e);
                return Ok(());
            }
        };

        match notification {
            Notification::ModuleUpdate => self.service.reload_modules().await,
            Notification::CommandUpdate { command_id } => {
                self.service.apply_external_update(command_id).await?;
            }
            Notification::CommandRemove { command_id } => {
                self.service.apply_external_removal(command_id).await?;
            }
        }
        Ok(())
    }

    /// Consume payloads until the channel closes
    pub fn spawn(self, mut receiver: mpsc::Receiver<Value>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(payload) = receiver.recv().await {
                if let Err(e) = self.handle(&payload).await {
                    tracing::error!("Failed to apply notification: {}", e);
                }
            }
            tracing::debug!("Notification channel closed");
        })
    }
}
