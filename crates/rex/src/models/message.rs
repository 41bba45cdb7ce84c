use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::role::Role;
use crate::errors::{GatewayError, GatewayResult};

const MESSAGES_REQUIRED: &str = "messages array required";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// A single role-tagged turn of a conversation
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new<S: Into<String>>(role: Role, content: S) -> Self {
        Message {
            role,
            content: content.into(),
        }
    }

    pub fn system<S: Into<String>>(content: S) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user<S: Into<String>>(content: S) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant<S: Into<String>>(content: S) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Parse the `messages` field of a chat request body.
    ///
    /// Anything other than an array of `{role, content}` objects is rejected with
    /// an error that names the `messages` field.
    pub fn parse_list(messages: Option<&Value>) -> GatewayResult<Vec<Message>> {
        let items = messages
            .and_then(Value::as_array)
            .ok_or_else(|| GatewayError::invalid_request(MESSAGES_REQUIRED))?;

        items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                let role = item
                    .get("role")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        GatewayError::invalid_request(format!("messages[{index}].role is required"))
                    })?;
                let role = Role::from_str(role).map_err(|_| {
                    GatewayError::invalid_request(format!(
                        "messages[{index}].role '{role}' is not one of system, user, assistant"
                    ))
                })?;
                let content = item
                    .get("content")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        GatewayError::invalid_request(format!(
                            "messages[{index}].content must be a string"
                        ))
                    })?;
                Ok(Message::new(role, content))
            })
            .collect()
    }
}

/// An ordered, non-empty sequence of messages owned by one request.
///
/// Only constructed through [`Conversation::new`], which enforces the
/// non-empty invariant; afterwards it is read and transcoded, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new(messages: Vec<Message>) -> GatewayResult<Self> {
        if messages.is_empty() {
            return Err(GatewayError::invalid_request(
                "messages array must not be empty",
            ));
        }
        Ok(Self { messages })
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// All system messages folded into a single instruction, joined by a blank line.
    pub fn system_prompt(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();

        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n\n"))
        }
    }

    /// The user and assistant turns in order, without system messages.
    pub fn turns(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.role != Role::System)
    }

    /// Split off the last user turn from the turns that precede it.
    ///
    /// Anything after the last user message is not part of the prompt.
    pub fn last_user_turn(&self) -> Option<(&Message, Vec<&Message>)> {
        let index = self.messages.iter().rposition(|m| m.role == Role::User)?;
        let history = self.messages[..index]
            .iter()
            .filter(|m| m.role != Role::System)
            .collect();
        Some((&self.messages[index], history))
    }
}
