use serde::{Deserialize, Serialize};

use super::action::MessageSubtype;

/// One line of an example transcript
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatLine {
    /// `say`, `me` or `whisper`
    pub kind: String,
    pub from: String,
    pub to: Option<String>,
    pub message: String,
}

/// Example chat transcript shown on a command's documentation page
///
/// `chat` holds one line per message, `from:message` for channel messages and
/// `from>to:message` for whispers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandExample {
    pub id: Option<i64>,
    pub command_id: i64,
    pub title: String,
    pub chat: String,
    pub description: String,
    #[serde(skip)]
    pub chat_messages: Vec<ChatLine>,
}

impl CommandExample {
    pub fn new(command_id: i64, title: impl Into<String>) -> Self {
        Self {
            id: None,
            command_id,
            title: title.into(),
            chat: String::new(),
            description: String::new(),
            chat_messages: Vec::new(),
        }
    }

    /// Build from a stored transcript
    pub fn from_chat(command_id: i64, title: impl Into<String>, chat: impl Into<String>, description: impl Into<String>) -> Self {
        let mut example = Self::new(command_id, title);
        example.chat = chat.into();
        example.description = description.into();
        example.parse();
        example
    }

    pub fn add_chat_message(&mut self, kind: &str, message: &str, from: &str, to: Option<&str>) {
        let line = match to {
            Some(to) => format!("{}>{}:{}", from, to, message),
            None => format!("{}:{}", from, message),
        };
        if !self.chat.is_empty() {
            self.chat.push('\n');
        }
        self.chat.push_str(&line);

        self.chat_messages.push(ChatLine {
            kind: kind.to_string(),
            from: from.to_string(),
            to: to.map(str::to_string),
            message: message.to_string(),
        });
    }

    /// Append the bot's answer the way a message action would deliver it
    pub(crate) fn add_response(&mut self, subtype: MessageSubtype, response: &str) {
        match subtype {
            MessageSubtype::Say | MessageSubtype::Reply => self.add_chat_message("say", response, "bot", None),
            MessageSubtype::Me => self.add_chat_message("me", response, "bot", None),
            MessageSubtype::Whisper => self.add_chat_message("whisper", response, "bot", Some("user")),
        }
    }

    /// Rebuild `chat_messages` from `chat`; malformed lines are skipped
    pub fn parse(&mut self) -> &mut Self {
        self.chat_messages = self
            .chat
            .lines()
            .filter_map(|line| {
                let (users, message) = line.split_once(':')?;
                Some(match users.split_once('>') {
                    Some((from, to)) => ChatLine {
                        kind: "whisper".to_string(),
                        from: from.to_string(),
                        to: Some(to.to_string()),
                        message: message.to_string(),
                    },
                    None => ChatLine {
                        kind: "say".to_string(),
                        from: users.to_string(),
                        to: None,
                        message: message.to_string(),
                    },
                })
            })
            .collect();
        self
    }
}
