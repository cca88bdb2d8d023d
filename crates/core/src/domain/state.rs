//! Per-conversation state and its merge rules.
//!
//! A [`ConversationState`] is owned by exactly one `(user_id, session_id)` pair. Nodes never
//! mutate it directly; they return a [`StateUpdate`] which is folded in by
//! [`ConversationState::apply`]. Both `messages` and `memory` are append-only, and the
//! identity fields cannot change after construction.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::message::{Message, Role};
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier scoping one checkpointed conversation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ThreadKey {
    pub user_id: UserId,
    pub session_id: SessionId,
}

impl ThreadKey {
    pub fn new(
        user_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Result<Self, DomainError> {
        let user_id = user_id.into();
        let session_id = session_id.into();
        if user_id.trim().is_empty() {
            return Err(DomainError::InvariantViolation("user_id must not be empty".to_string()));
        }
        if session_id.trim().is_empty() {
            return Err(DomainError::InvariantViolation(
                "session_id must not be empty".to_string(),
            ));
        }

        Ok(Self { user_id: UserId(user_id), session_id: SessionId(session_id) })
    }

    /// Durable thread identifier, `{user_id}_{session_id}`.
    ///
    /// Storage keys on both columns, so two pairs that happen to render the same label
    /// still map to distinct checkpoints.
    pub fn thread_id(&self) -> String {
        format!("{}_{}", self.user_id.0, self.session_id.0)
    }
}

impl fmt::Display for ThreadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.thread_id())
    }
}

/// Partial state produced by a node.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StateUpdate {
    pub messages: Vec<Message>,
    pub memory: Vec<String>,
}

impl StateUpdate {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    pub fn with_messages(mut self, messages: impl IntoIterator<Item = Message>) -> Self {
        self.messages.extend(messages);
        self
    }

    pub fn with_memory(mut self, entry: impl Into<String>) -> Self {
        self.memory.push(entry.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.memory.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    user_id: UserId,
    session_id: SessionId,
    #[serde(default)]
    messages: Vec<Message>,
    #[serde(default)]
    memory: Vec<String>,
}

impl ConversationState {
    pub fn new(key: &ThreadKey) -> Self {
        Self {
            user_id: key.user_id.clone(),
            session_id: key.session_id.clone(),
            messages: Vec::new(),
            memory: Vec::new(),
        }
    }

    pub fn with_human_message(key: &ThreadKey, content: impl Into<String>) -> Self {
        let mut state = Self::new(key);
        state.apply(StateUpdate::empty().with_message(Message::human(content)));
        state
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn thread_key(&self) -> ThreadKey {
        ThreadKey { user_id: self.user_id.clone(), session_id: self.session_id.clone() }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn memory(&self) -> &[String] {
        &self.memory
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn last_assistant_message(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|message| message.role == Role::Assistant)
    }

    /// Folds a node's output into the state. Existing entries are never replaced.
    pub fn apply(&mut self, update: StateUpdate) {
        self.messages.extend(update.messages);
        self.memory.extend(update.memory);
    }

    pub fn merged(mut self, update: StateUpdate) -> Self {
        self.apply(update);
        self
    }
}
