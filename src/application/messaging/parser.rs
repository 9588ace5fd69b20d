//! Message parser - Splits prefixed chat lines into alias and arguments

use crate::domain::entities::{Content, Message};

/// Turns raw chat text into structured Message objects
pub struct MessageParser {
    command_prefix: String,
}

impl MessageParser {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            command_prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.command_prefix
    }

    /// Parse a chat line
    pub fn parse(&self, chat_id: impl Into<String>, text: &str, sender: &str, whisper: bool) -> Message {
        Message::new(chat_id, self.parse_content(text))
            .with_sender(sender)
            .with_whisper(whisper)
    }

    /// Re-parse a message whose content is still plain text
    pub fn parse_message(&self, mut message: Message) -> Message {
        if let Content::Text(text) = &message.content {
            message.content = self.parse_content(text);
        }
        message
    }

    fn parse_content(&self, text: &str) -> Content {
        let text = text.trim();
        if text.is_empty() {
            return Content::Empty;
        }

        let Some(cmd_text) = text.strip_prefix(self.command_prefix.as_str()) else {
            return Content::Text(text.to_string());
        };

        // Split command and arguments
        let mut parts = cmd_text.split_whitespace();
        let Some(name) = parts.next() else {
            return Content::Text(text.to_string());
        };

        Content::Command {
            name: name.to_lowercase(),
            args: parts.map(str::to_string).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command() {
        let parser = MessageParser::new("!");
        let message = parser.parse("channel", "!Quest  start now", "viewer", true);

        assert!(message.whisper);
        assert_eq!(
            message.content,
            Content::Command {
                name: "quest".into(),
                args: vec!["start".into(), "now".into()],
            }
        );
        assert_eq!(message.remaining_text().as_deref(), Some("start now"));
    }

    #[test]
    fn test_parse_plain_text() {
        let parser = MessageParser::new("!");
        assert_eq!(parser.parse("c", "hello !there", "v", false).content, Content::Text("hello !there".into()));
        assert_eq!(parser.parse("c", "!", "v", false).content, Content::Text("!".into()));
        assert_eq!(parser.parse("c", "   ", "v", false).content, Content::Empty);
    }

    #[test]
    fn test_parse_message_keeps_metadata() {
        let parser = MessageParser::new("?");
        let raw = Message::from_text("c", "?points").with_sender("viewer").with_whisper(true);
        let id = raw.id.clone();

        let parsed = parser.parse_message(raw);
        assert_eq!(parsed.id, id);
        assert!(parsed.content.is_command());
    }
}
