//! Message dispatcher - Routes chat events to the command service

use std::collections::HashMap;
use std::sync::Arc;

use crate::application::services::{CommandService, Dispatch};
use crate::domain::entities::{Message, TokenLedger, User};
use crate::domain::traits::ChatSink;
use super::parser::MessageParser;

/// Routes chat events of one stream through the command engine.
///
/// Keeps the chatters it has seen so points and debts persist between
/// messages. Events are handled one at a time.
pub struct MessageDispatcher {
    parser: MessageParser,
    service: Arc<CommandService>,
    sink: Arc<dyn ChatSink>,
    ledger: TokenLedger,
    users: HashMap<String, User>,
}

impl MessageDispatcher {
    pub fn new(service: Arc<CommandService>, sink: Arc<dyn ChatSink>, ledger: TokenLedger) -> Self {
        Self {
            parser: MessageParser::new(service.prefix()),
            service,
            sink,
            ledger,
            users: HashMap::new(),
        }
    }

    /// Register a chatter up front (levels, points, badges)
    pub fn with_user(mut self, user: User) -> Self {
        self.users.insert(user.username.clone(), user);
        self
    }

    pub fn user(&self, username: &str) -> Option<&User> {
        self.users.get(&username.to_lowercase())
    }

    /// Process a raw chat line
    pub async fn process_text(&mut self, chat_id: &str, sender: &str, text: &str, whisper: bool) -> Dispatch {
        let message = self.parser.parse(chat_id, text, sender, whisper);
        self.process(message).await
    }

    /// Process a chat event
    pub async fn process(&mut self, message: Message) -> Dispatch {
        let message = self.parser.parse_message(message);
        let Some(sender) = message.sender.as_deref() else {
            tracing::debug!("Ignoring message {} without sender", message.id);
            return Dispatch::NotACommand;
        };
        if !message.content.is_command() {
            return Dispatch::NotACommand;
        }

        let user = self
            .users
            .entry(sender.to_lowercase())
            .or_insert_with(|| User::new(sender));

        let outcome = self
            .service
            .dispatch(user, &message, self.sink.as_ref(), &self.ledger)
            .await;

        if let Dispatch::Ran { alias } = &outcome {
            tracing::info!("{} ran !{}", user, alias);
        }
        outcome
    }
}
