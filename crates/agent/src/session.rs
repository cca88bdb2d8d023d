//! Thread-scoped entry points: start a conversation, continue it from its checkpoint.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use brainstorm_core::domain::message::Message;
use brainstorm_core::domain::state::{ConversationState, StateUpdate, ThreadKey};
use brainstorm_core::errors::{ApplicationError, DomainError};
use brainstorm_db::repositories::{CheckpointRepository, RepositoryError};

use crate::locks::KeyedLocks;
use crate::runtime::{AgentGraph, GraphError, StopReason};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    InvalidKey(#[from] DomainError),
    #[error("message must not be empty")]
    EmptyMessage,
    #[error("no session checkpoint for thread `{thread_id}`")]
    NoSession { thread_id: String },
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("session persistence failed: {0}")]
    Persistence(#[from] RepositoryError),
}

impl From<SessionError> for ApplicationError {
    fn from(value: SessionError) -> Self {
        match value {
            SessionError::InvalidKey(error) => Self::Domain(error),
            SessionError::EmptyMessage => Self::Domain(DomainError::InvariantViolation(
                "message must not be empty".to_string(),
            )),
            SessionError::NoSession { thread_id } => Self::NoSession(thread_id),
            SessionError::Graph(GraphError::Transition(error)) => {
                Self::Domain(DomainError::GraphTransition(error))
            }
            SessionError::Graph(error) => Self::Integration(error.to_string()),
            SessionError::Persistence(error) => Self::Persistence(error.to_string()),
        }
    }
}

/// Result of one start/continue call.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionTurn {
    pub thread_id: String,
    pub correlation_id: String,
    pub reply: String,
    pub stop_reason: StopReason,
    pub state: ConversationState,
}

pub struct SessionManager {
    graph: Arc<AgentGraph>,
    checkpoints: Arc<dyn CheckpointRepository>,
    locks: KeyedLocks<ThreadKey>,
}

impl SessionManager {
    pub fn new(graph: Arc<AgentGraph>, checkpoints: Arc<dyn CheckpointRepository>) -> Self {
        Self { graph, checkpoints, locks: KeyedLocks::default() }
    }

    /// Starts a fresh conversation. An existing checkpoint for the same pair is replaced.
    pub async fn start_session(
        &self,
        user_id: &str,
        session_id: &str,
        message: &str,
    ) -> Result<SessionTurn, SessionError> {
        let key = ThreadKey::new(user_id, session_id)?;
        ensure_message(message)?;
        let _guard = self.locks.acquire(&key).await;

        let state = ConversationState::with_human_message(&key, message);
        self.run(&key, state, None).await
    }

    /// Appends `message` to the last checkpoint and re-invokes the graph.
    ///
    /// The result is only written back if no other writer, in this process or another,
    /// checkpointed the thread in the meantime.
    pub async fn continue_session(
        &self,
        user_id: &str,
        session_id: &str,
        message: &str,
    ) -> Result<SessionTurn, SessionError> {
        let key = ThreadKey::new(user_id, session_id)?;
        ensure_message(message)?;
        let _guard = self.locks.acquire(&key).await;

        let state = self
            .checkpoints
            .load(&key)
            .await?
            .ok_or_else(|| SessionError::NoSession { thread_id: key.thread_id() })?;
        let loaded_messages = state.messages().len();
        let state = state.merged(StateUpdate::empty().with_message(Message::human(message)));
        self.run(&key, state, Some(loaded_messages)).await
    }

    pub async fn history(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<ConversationState>, SessionError> {
        let key = ThreadKey::new(user_id, session_id)?;
        Ok(self.checkpoints.load(&key).await?)
    }

    /// Drops the checkpoint. Returns `false` when the thread had none.
    pub async fn end_session(&self, user_id: &str, session_id: &str) -> Result<bool, SessionError> {
        let key = ThreadKey::new(user_id, session_id)?;
        let _guard = self.locks.acquire(&key).await;
        Ok(self.checkpoints.delete(&key).await?)
    }

    async fn run(
        &self,
        key: &ThreadKey,
        state: ConversationState,
        loaded_messages: Option<usize>,
    ) -> Result<SessionTurn, SessionError> {
        let mode = if loaded_messages.is_some() { "continue" } else { "start" };
        let correlation_id = Uuid::new_v4().to_string();
        let thread_id = key.thread_id();
        info!(
            event_name = "agent.session.turn_started",
            thread_id = %thread_id,
            correlation_id = %correlation_id,
            mode,
            prior_messages = state.messages().len(),
            "session turn started"
        );

        let run = self.graph.invoke(state, &correlation_id).await?;
        match loaded_messages {
            Some(expected) => self.checkpoints.save_if_unchanged(&run.state, expected).await?,
            None => self.checkpoints.save(&run.state).await?,
        }

        let reply = run.reply().unwrap_or_default().to_string();
        info!(
            event_name = "agent.session.checkpointed",
            thread_id = %thread_id,
            correlation_id = %correlation_id,
            stop_reason = ?run.stop_reason,
            messages = run.state.messages().len(),
            "session checkpoint saved"
        );

        Ok(SessionTurn {
            thread_id,
            correlation_id,
            reply,
            stop_reason: run.stop_reason,
            state: run.state,
        })
    }
}

fn ensure_message(message: &str) -> Result<(), SessionError> {
    if message.trim().is_empty() {
        Err(SessionError::EmptyMessage)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::json;

    use brainstorm_core::domain::message::{Message, Role, ToolCall};
    use brainstorm_core::domain::state::{ConversationState, StateUpdate, ThreadKey};
    use brainstorm_core::errors::ApplicationError;
    use brainstorm_db::repositories::{
        CheckpointRepository, InMemoryCheckpointRepository, RepositoryError,
    };

    use super::{SessionError, SessionManager};
    use crate::builtin::SaveToMemoryTool;
    use crate::guardrails::TurnGuard;
    use crate::runtime::{AgentGraph, StopReason};
    use crate::testing::ScriptedLlm;
    use crate::tools::ToolRegistry;

    fn manager(llm: Arc<ScriptedLlm>, guard: TurnGuard) -> SessionManager {
        let tools = Arc::new(ToolRegistry::default().with(SaveToMemoryTool::new()));
        let graph = AgentGraph::new(llm, tools).with_guard(guard);
        SessionManager::new(Arc::new(graph), Arc::new(InMemoryCheckpointRepository::default()))
    }

    fn remember(id: &str, info: &str) -> Message {
        let call = ToolCall::new(id, "save_to_memory", json!({ "info": info }));
        Message::assistant_with_tool_calls("", vec![call])
    }

    #[tokio::test]
    async fn continuation_extends_the_checkpointed_conversation() {
        let llm = Arc::new(ScriptedLlm::new([
            remember("c1", "budget is 10k"),
            Message::assistant("Got it."),
            Message::assistant("You said the budget is 10k."),
        ]));
        let sessions = manager(llm.clone(), TurnGuard::default());

        let first = sessions.start_session("alice", "s-1", "budget is 10k").await.expect("start");
        let second = sessions
            .continue_session("alice", "s-1", "what was the budget?")
            .await
            .expect("continue");

        assert_eq!(first.thread_id, "alice_s-1");
        assert_eq!(first.reply, "Got it.");
        assert_eq!(second.reply, "You said the budget is 10k.");
        let earlier = first.state.messages();
        assert_eq!(&second.state.messages()[..earlier.len()], earlier);
        assert_eq!(second.state.memory(), ["budget is 10k"]);
        assert_ne!(first.correlation_id, second.correlation_id);

        let third_call = &llm.calls()[2];
        assert_eq!(third_call.messages.len(), 5);
        assert_eq!(third_call.messages.last().map(|m| m.role), Some(Role::Human));
    }

    #[tokio::test]
    async fn continuing_an_unknown_thread_is_no_session() {
        let sessions = manager(Arc::new(ScriptedLlm::default()), TurnGuard::default());

        let result = sessions.continue_session("alice", "never-started", "hello?").await;

        let error = result.expect_err("must fail");
        assert!(matches!(
            error,
            SessionError::NoSession { ref thread_id } if thread_id == "alice_never-started"
        ));
        assert_eq!(
            ApplicationError::from(error),
            ApplicationError::NoSession("alice_never-started".to_string())
        );
    }

    #[tokio::test]
    async fn same_session_id_is_isolated_between_users() {
        let llm = Arc::new(ScriptedLlm::new([
            remember("a1", "alice likes tabs"),
            Message::assistant("ok alice"),
            Message::assistant("ok bob"),
        ]));
        let sessions = manager(llm, TurnGuard::default());

        sessions.start_session("alice", "shared", "tabs please").await.expect("alice");
        sessions.start_session("bob", "shared", "spaces please").await.expect("bob");

        let alice = sessions.history("alice", "shared").await.expect("load").expect("alice state");
        let bob = sessions.history("bob", "shared").await.expect("load").expect("bob state");

        assert_eq!(alice.memory(), ["alice likes tabs"]);
        assert!(bob.memory().is_empty());
        assert!(bob.messages().iter().all(|m| !m.content.contains("tabs")));
    }

    #[tokio::test]
    async fn starting_again_replaces_the_checkpoint() {
        let llm =
            Arc::new(ScriptedLlm::new([Message::assistant("one"), Message::assistant("two")]));
        let sessions = manager(llm, TurnGuard::default());

        sessions.start_session("alice", "s-1", "first topic").await.expect("first");
        let restarted =
            sessions.start_session("alice", "s-1", "second topic").await.expect("second");

        assert_eq!(restarted.state.messages().len(), 2);
        assert_eq!(restarted.state.messages()[0].content, "second topic");
    }

    #[tokio::test]
    async fn turn_limited_runs_are_still_checkpointed() {
        let llm = Arc::new(ScriptedLlm::new([remember("c1", "a"), remember("c2", "b")]));
        let sessions = manager(llm, TurnGuard { max_turns: Some(1) });

        let turn = sessions.start_session("alice", "s-1", "loop").await.expect("start");
        let stored = sessions.history("alice", "s-1").await.expect("load").expect("state");

        assert_eq!(turn.stop_reason, StopReason::TurnLimit);
        assert_eq!(stored, turn.state);
        assert_eq!(stored.memory(), ["a"]);
    }

    #[tokio::test]
    async fn blank_identity_and_message_are_rejected() {
        let sessions = manager(Arc::new(ScriptedLlm::default()), TurnGuard::default());

        let no_user = sessions.start_session(" ", "s-1", "hi").await;
        let no_message = sessions.start_session("alice", "s-1", "   ").await;

        assert!(matches!(no_user, Err(SessionError::InvalidKey(_))));
        assert!(matches!(no_message, Err(SessionError::EmptyMessage)));
    }

    #[tokio::test]
    async fn concurrent_continuations_of_one_thread_serialize() {
        let sessions = Arc::new(manager(Arc::new(ScriptedLlm::default()), TurnGuard::default()));
        sessions.start_session("alice", "s-1", "kickoff").await.expect("start");

        let mut handles = Vec::new();
        for index in 0..6 {
            let sessions = sessions.clone();
            handles.push(tokio::spawn(async move {
                sessions.continue_session("alice", "s-1", &format!("message {index}")).await
            }));
        }
        for handle in handles {
            handle.await.expect("join").expect("continue");
        }

        let stored = sessions.history("alice", "s-1").await.expect("load").expect("state");
        assert_eq!(stored.messages().len(), 2 + 6 * 2);
    }

    /// Simulates another process checkpointing the thread right after every load.
    #[derive(Default)]
    struct RacingCheckpoints {
        inner: InMemoryCheckpointRepository,
    }

    #[async_trait]
    impl CheckpointRepository for RacingCheckpoints {
        async fn load(
            &self,
            key: &ThreadKey,
        ) -> Result<Option<ConversationState>, RepositoryError> {
            let loaded = self.inner.load(key).await?;
            if let Some(state) = &loaded {
                let other = state.clone().merged(
                    StateUpdate::empty()
                        .with_message(Message::human("from the other process"))
                        .with_message(Message::assistant("other reply")),
                );
                self.inner.save(&other).await?;
            }
            Ok(loaded)
        }

        async fn save(&self, state: &ConversationState) -> Result<(), RepositoryError> {
            self.inner.save(state).await
        }

        async fn save_if_unchanged(
            &self,
            state: &ConversationState,
            loaded_messages: usize,
        ) -> Result<(), RepositoryError> {
            self.inner.save_if_unchanged(state, loaded_messages).await
        }

        async fn delete(&self, key: &ThreadKey) -> Result<bool, RepositoryError> {
            self.inner.delete(key).await
        }
    }

    #[tokio::test]
    async fn continuation_racing_another_writer_does_not_overwrite_it() {
        let tools = Arc::new(ToolRegistry::default());
        let graph = AgentGraph::new(Arc::new(ScriptedLlm::default()), tools);
        let checkpoints = Arc::new(RacingCheckpoints::default());
        let sessions = SessionManager::new(Arc::new(graph), checkpoints.clone());
        sessions.start_session("alice", "s-1", "kickoff").await.expect("start");

        let result = sessions.continue_session("alice", "s-1", "mine").await;

        assert!(matches!(
            result,
            Err(SessionError::Persistence(RepositoryError::StaleCheckpoint { expected: 2, .. }))
        ));
        let key = ThreadKey::new("alice", "s-1").expect("key");
        let stored = checkpoints.inner.load(&key).await.expect("load").expect("state");
        assert_eq!(stored.messages().len(), 4);
        assert!(stored.messages().iter().all(|m| m.content != "mine"));
    }

    #[tokio::test]
    async fn ending_a_session_drops_its_checkpoint() {
        let sessions = manager(Arc::new(ScriptedLlm::default()), TurnGuard::default());
        sessions.start_session("alice", "s-1", "hi").await.expect("start");

        assert!(sessions.end_session("alice", "s-1").await.expect("end"));
        assert!(!sessions.end_session("alice", "s-1").await.expect("end again"));
        assert!(sessions.history("alice", "s-1").await.expect("load").is_none());
    }
}
