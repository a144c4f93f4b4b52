//! Message parser - Parses raw messages into structured messages

use crate::domain::entities::{Content, Message, MessageType, User};

/// Parses incoming messages into structured Message objects
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

    /// Parse a text message
    pub fn parse(&self, chat_id: impl Into<String>, text: impl Into<String>, sender: Option<User>) -> Message {
        let text = text.into();
        let chat_id = chat_id.into();
        let trimmed = text.trim();

        if trimmed.is_empty() {
            return Message::new(chat_id, Content::Empty).with_sender_opt(sender);
        }

        if let Some(rest) = trimmed.strip_prefix(self.command_prefix.as_str()) {
            return self.parse_command(chat_id, rest, sender);
        }

        Message::new(chat_id, Content::Text(trimmed.to_string()))
            .with_message_type(MessageType::Text)
            .with_sender_opt(sender)
    }

    /// Parse a command body (prefix already stripped)
    fn parse_command(&self, chat_id: String, body: &str, sender: Option<User>) -> Message {
        let mut parts = body.split_whitespace();
        let name = parts.next().unwrap_or("").to_string();
        let args = parts.map(str::to_string).collect();

        Message::new(chat_id, Content::Command { name, args })
            .with_message_type(MessageType::Command)
            .with_sender_opt(sender)
    }
}

impl Message {
    /// Helper to set sender as Option
    pub fn with_sender_opt(mut self, user: Option<User>) -> Self {
        if let Some(u) = user {
            self.sender = Some(u);
        }
        self
    }

    /// Helper for MessageType
    pub fn with_message_type(mut self, mt: MessageType) -> Self {
        self.message_type = mt;
        self
    }
}
