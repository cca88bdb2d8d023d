//! Scripted doubles shared by the unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use brainstorm_core::domain::message::{Message, Role};

use crate::llm::{LlmClient, LlmError};
use crate::tools::ToolSpec;

/// Replies with the content of the last human message.
#[derive(Default)]
pub struct EchoPromptLlm;

#[async_trait]
impl LlmClient for EchoPromptLlm {
    async fn complete(
        &self,
        _system: Option<&str>,
        messages: &[Message],
        _tools: &[ToolSpec],
    ) -> Result<Message, LlmError> {
        let prompt = messages
            .iter()
            .rev()
            .find(|message| message.role == Role::Human)
            .map(|message| message.content.clone())
            .unwrap_or_default();
        Ok(Message::assistant(prompt))
    }
}

#[derive(Clone, Debug)]
pub struct RecordedCall {
    pub system: Option<String>,
    pub messages: Vec<Message>,
    pub tool_names: Vec<&'static str>,
}

/// Pops pre-scripted replies in order and records every request.
#[derive(Default)]
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<Result<Message, LlmError>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedLlm {
    pub fn new(replies: impl IntoIterator<Item = Message>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(Ok).collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn push_error(&self, error: LlmError) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(Err(error));
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(
        &self,
        system: Option<&str>,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<Message, LlmError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                system: system.map(str::to_string),
                messages: messages.to_vec(),
                tool_names: tools.iter().map(|spec| spec.name).collect(),
            });
        }
        self.replies
            .lock()
            .ok()
            .and_then(|mut replies| replies.pop_front())
            .unwrap_or_else(|| Ok(Message::assistant("(script exhausted)")))
    }
}
