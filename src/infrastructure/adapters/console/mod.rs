//! Console adapter for development/testing
//!
//! Reads chat lines from stdin and prints whatever the bot sends back.
//! Input format:
//!
//! ```text
//! viewer: !hello          channel message from `viewer`
//! viewer> !points         whisper from `viewer` to the bot
//! #notify {"type":"module.update"}
//! ```

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::application::errors::BotError;
use crate::domain::entities::Message;
use crate::domain::traits::{ChatSink, Outbound};

/// Sink that forwards outbound lines into a channel drained by the adapter
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<Outbound>,
}

impl ChannelSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl ChatSink for ChannelSink {
    fn send(&self, outbound: Outbound) -> Result<(), BotError> {
        self.sender
            .send(outbound)
            .map_err(|e| BotError::Egress(format!("chat channel closed: {}", e)))
    }
}

/// One parsed line of console input
#[derive(Debug, Clone)]
pub enum ConsoleInput {
    Chat(Message),
    Notify(Value),
}

/// Console bot adapter for local development
pub struct ConsoleAdapter {
    channel: String,
}

impl ConsoleAdapter {
    pub fn new(channel: impl Into<String>) -> Self {
        Self { channel: channel.into() }
    }

    /// Parse one stdin line; blank and malformed lines yield `None`
    pub fn parse_line(&self, line: &str) -> Option<ConsoleInput> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        if let Some(payload) = line.strip_prefix("#notify") {
            return match serde_json::from_str(payload.trim()) {
                Ok(value) => Some(ConsoleInput::Notify(value)),
                Err(e) => {
                    tracing::warn!("Invalid notification payload: {}", e);
                    None
                }
            };
        }

        let split = line.find([':', '>'])?;
        let (user, rest) = line.split_at(split);
        let user = user.trim();
        if user.is_empty() {
            return None;
        }
        let whisper = rest.starts_with('>');
        let text = rest[1..].trim();

        let message = Message::from_text(&self.channel, text)
            .with_sender(user)
            .with_whisper(whisper)
            .with_platform("console");
        Some(ConsoleInput::Chat(message))
    }

    pub fn format_outbound(outbound: &Outbound) -> String {
        match outbound {
            Outbound::Say(text) => format!("[BOT] {}", text),
            Outbound::Me(text) => format!("[BOT] * {}", text),
            Outbound::Whisper { to, text } => format!("[BOT > {}] {}", to, text),
        }
    }

    /// Read stdin until EOF, forwarding parsed lines
    pub async fn read_input(self, sender: mpsc::Sender<ConsoleInput>) -> Result<(), BotError> {
        tracing::info!("Starting console bot (dev mode) on #{}", self.channel);
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| BotError::Internal(format!("Failed to read stdin: {}", e)))?
        {
            if let Some(input) = self.parse_line(&line) {
                if sender.send(input).await.is_err() {
                    break;
                }
            }
        }

        tracing::info!("Console input closed");
        Ok(())
    }

    /// Print outbound lines until every sink is dropped
    pub async fn print_output(mut receiver: mpsc::UnboundedReceiver<Outbound>) {
        while let Some(outbound) = receiver.recv().await {
            println!("{}", Self::format_outbound(&outbound));
        }
    }
}
