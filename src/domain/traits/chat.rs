use crate::application::errors::BotError;

/// A line the bot wants to put into chat
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Plain channel message
    Say(String),
    /// Action-styled channel message (`/me`)
    Me(String),
    /// Private message to one user
    Whisper { to: String, text: String },
}

impl Outbound {
    pub fn text(&self) -> &str {
        match self {
            Outbound::Say(text) | Outbound::Me(text) => text,
            Outbound::Whisper { text, .. } => text,
        }
    }
}

/// ChatSink trait - abstraction for the chat egress of a transport adapter
///
/// Implementations must not block: actions call `send` from the dispatch task.
pub trait ChatSink: Send + Sync {
    /// Queue a line for delivery
    fn send(&self, outbound: Outbound) -> Result<(), BotError>;
}
