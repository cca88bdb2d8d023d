//! Drives a [`ConversationState`] through the assistant/tools loop until the router
//! terminates or the turn guard stops it.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use brainstorm_core::audit::{
    AuditCategory, AuditContext, AuditOutcome, AuditSink, NoopAuditSink,
};
use brainstorm_core::domain::message::Message;
use brainstorm_core::domain::state::{ConversationState, StateUpdate};
use brainstorm_core::graph::{
    route_after_assistant, GraphEngine, GraphNode, GraphTarget, GraphTransitionError, ToolLoopGraph,
    TransitionOutcome,
};

use crate::guardrails::{TurnDecision, TurnGuard};
use crate::llm::{LlmClient, LlmError};
use crate::prompts;
use crate::tools::{ToolContext, ToolRegistry};

#[derive(Debug, Error)]
pub enum GraphError {
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Transition(#[from] GraphTransitionError),
    #[error("system prompt could not be rendered: {0}")]
    Prompt(#[from] tera::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// The router sent the last assistant message to END.
    Terminated,
    TurnLimit,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GraphRun {
    pub state: ConversationState,
    pub steps: Vec<TransitionOutcome>,
    pub stop_reason: StopReason,
    pub assistant_turns: u32,
}

impl GraphRun {
    pub fn reply(&self) -> Option<&str> {
        self.state.last_assistant_message().map(|message| message.content.as_str())
    }
}

pub struct AgentGraph {
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
    engine: GraphEngine<ToolLoopGraph>,
    guard: TurnGuard,
    audit: Arc<dyn AuditSink>,
}

impl AgentGraph {
    pub fn new(llm: Arc<dyn LlmClient>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            llm,
            tools,
            engine: GraphEngine::default(),
            guard: TurnGuard::default(),
            audit: Arc::new(NoopAuditSink),
        }
    }

    pub fn with_guard(mut self, guard: TurnGuard) -> Self {
        self.guard = guard;
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub async fn invoke(
        &self,
        state: ConversationState,
        correlation_id: &str,
    ) -> Result<GraphRun, GraphError> {
        self.invoke_from(self.engine.entry_node(), state, correlation_id).await
    }

    /// Runs the graph starting at `entry`. `Human` is only entered this way.
    pub async fn invoke_from(
        &self,
        entry: GraphNode,
        mut state: ConversationState,
        correlation_id: &str,
    ) -> Result<GraphRun, GraphError> {
        let key = state.thread_key();
        let thread_id = key.thread_id();
        let audit = AuditContext::new(Some(thread_id.clone()), correlation_id, "agent_graph");
        let tool_ctx = ToolContext::new(key, correlation_id);

        let mut node = entry;
        let mut steps = Vec::new();
        let mut assistant_turns = 0_u32;

        loop {
            let route = match node {
                GraphNode::Assistant => {
                    if let TurnDecision::Stop { reason_code, user_message } =
                        self.guard.evaluate(assistant_turns)
                    {
                        warn!(
                            event_name = "agent.graph.turn_limit",
                            thread_id = %thread_id,
                            correlation_id = %correlation_id,
                            reason_code,
                            assistant_turns,
                            "stopping graph before another assistant turn"
                        );
                        let event = audit
                            .event(
                                "graph.turn_limit_reached",
                                AuditCategory::Graph,
                                AuditOutcome::Rejected,
                            )
                            .with_metadata("reason_code", reason_code)
                            .with_metadata("assistant_turns", assistant_turns);
                        self.audit.emit(event);
                        let notice = Message::assistant(user_message);
                        state.apply(StateUpdate::empty().with_message(notice));
                        return Ok(GraphRun {
                            state,
                            steps,
                            stop_reason: StopReason::TurnLimit,
                            assistant_turns,
                        });
                    }

                    let reply = self.assistant_step(&state).await?;
                    assistant_turns += 1;
                    let route = route_after_assistant(&reply);
                    debug!(
                        event_name = "agent.graph.assistant_replied",
                        thread_id = %thread_id,
                        correlation_id = %correlation_id,
                        tool_calls = reply.tool_calls.len(),
                        assistant_turns,
                        "assistant node produced a message"
                    );
                    state.apply(StateUpdate::empty().with_message(reply));
                    Some(route)
                }
                GraphNode::Tools => {
                    let update = self.tools_step(&state, &tool_ctx, &audit).await;
                    state.apply(update);
                    None
                }
                GraphNode::Human => None,
            };

            let outcome = self.engine.apply_with_audit(node, route, self.audit.as_ref(), &audit)?;
            debug!(
                event_name = "agent.graph.transition",
                thread_id = %thread_id,
                correlation_id = %correlation_id,
                from = %outcome.from,
                to = %outcome.to,
                "graph transition applied"
            );
            let target = outcome.to;
            steps.push(outcome);

            match target {
                GraphTarget::Node(next) => node = next,
                GraphTarget::End => {
                    info!(
                        event_name = "agent.graph.completed",
                        thread_id = %thread_id,
                        correlation_id = %correlation_id,
                        assistant_turns,
                        messages = state.messages().len(),
                        "graph reached END"
                    );
                    return Ok(GraphRun {
                        state,
                        steps,
                        stop_reason: StopReason::Terminated,
                        assistant_turns,
                    });
                }
            }
        }
    }

    async fn assistant_step(&self, state: &ConversationState) -> Result<Message, GraphError> {
        let system = prompts::system_prompt(state)?;
        let specs = self.tools.specs();
        Ok(self.llm.complete(Some(&system), state.messages(), &specs).await?)
    }

    /// One result per call, in request order. Tool failures are folded into the results.
    async fn tools_step(
        &self,
        state: &ConversationState,
        ctx: &ToolContext,
        audit: &AuditContext,
    ) -> StateUpdate {
        let calls = match state.last_message() {
            Some(message) if message.requests_tools() => message.tool_calls.clone(),
            _ => Vec::new(),
        };

        let mut update = StateUpdate::empty();
        for call in &calls {
            let dispatch = self.tools.dispatch(call, ctx).await;
            let outcome =
                if dispatch.error.is_some() { AuditOutcome::Failed } else { AuditOutcome::Success };
            let mut event = audit
                .event("tool.dispatched", AuditCategory::Tool, outcome)
                .with_metadata("tool", &call.name)
                .with_metadata("call_id", &call.id);
            if let Some(error) = &dispatch.error {
                event = event.with_metadata("error_kind", error.kind());
            }
            self.audit.emit(event);

            update.messages.push(dispatch.message);
            update.memory.extend(dispatch.memory);
        }
        update
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use brainstorm_core::audit::{AuditOutcome, InMemoryAuditSink};
    use brainstorm_core::domain::message::{Message, Role, ToolCall};
    use brainstorm_core::domain::state::{ConversationState, ThreadKey};
    use brainstorm_core::graph::{GraphNode, GraphTarget};

    use super::{AgentGraph, GraphError, StopReason};
    use crate::builtin::SaveToMemoryTool;
    use crate::guardrails::TurnGuard;
    use crate::llm::LlmError;
    use crate::testing::ScriptedLlm;
    use crate::tools::ToolRegistry;

    fn state(text: &str) -> ConversationState {
        ConversationState::with_human_message(&ThreadKey::new("alice", "s-1").expect("key"), text)
    }

    fn graph(llm: Arc<ScriptedLlm>) -> AgentGraph {
        let tools = ToolRegistry::default().with(SaveToMemoryTool::new());
        AgentGraph::new(llm, Arc::new(tools))
    }

    fn calls(ids: &[(&str, &str)]) -> Message {
        Message::assistant_with_tool_calls(
            "",
            ids.iter()
                .map(|(id, name)| {
                    ToolCall::new(*id, *name, json!({ "info": format!("fact {id}") }))
                })
                .collect(),
        )
    }

    #[tokio::test]
    async fn plain_reply_goes_straight_to_end() {
        let llm = Arc::new(ScriptedLlm::new([Message::assistant("Sure, let's brainstorm.")]));

        let run = graph(llm.clone()).invoke(state("hi"), "run-1").await.expect("run");

        assert_eq!(run.stop_reason, StopReason::Terminated);
        assert_eq!(run.steps.len(), 1);
        assert_eq!(run.steps[0].to, GraphTarget::End);
        assert_eq!(run.reply(), Some("Sure, let's brainstorm."));
        assert_eq!(run.state.messages().len(), 2);
        assert_eq!(llm.calls()[0].tool_names, vec!["save_to_memory"]);
    }

    #[tokio::test]
    async fn tool_results_follow_request_order_and_preserve_prefix() {
        let llm = Arc::new(ScriptedLlm::new([
            calls(&[("c1", "save_to_memory"), ("c2", "no_such_tool"), ("c3", "save_to_memory")]),
            Message::assistant("Noted both facts."),
        ]));
        let initial = state("remember these");
        let prefix = initial.messages().to_vec();

        let run = graph(llm.clone()).invoke(initial, "run-2").await.expect("run");
        let messages = run.state.messages();

        assert_eq!(&messages[..prefix.len()], prefix.as_slice());
        let results: Vec<_> = messages.iter().filter(|m| m.role == Role::Tool).collect();
        let ids: Vec<_> = results.iter().filter_map(|m| m.tool_call_id.as_deref()).collect();
        assert_eq!(ids, vec!["c1", "c2", "c3"]);
        assert_eq!(results[0].content, "Saved: fact c1");
        assert_eq!(results[1].content, "Error: unknown tool `no_such_tool`");
        assert_eq!(run.state.memory(), ["fact c1", "fact c3"]);
        assert_eq!(run.reply(), Some("Noted both facts."));

        let second_system = llm.calls()[1].system.clone().unwrap_or_default();
        assert!(second_system.contains("SESSION MEMORY:\n- fact c1\n- fact c3"));

        let path: Vec<_> = run.steps.iter().map(|step| step.to.to_string()).collect();
        assert_eq!(path, vec!["tools", "assistant", "end"]);
    }

    #[tokio::test]
    async fn turn_guard_stops_a_runaway_tool_loop() {
        let llm = Arc::new(ScriptedLlm::new([
            calls(&[("c1", "save_to_memory")]),
            calls(&[("c2", "save_to_memory")]),
            calls(&[("c3", "save_to_memory")]),
        ]));

        let run = graph(llm.clone())
            .with_guard(TurnGuard { max_turns: Some(2) })
            .invoke(state("loop"), "run-3")
            .await
            .expect("run");

        assert_eq!(run.stop_reason, StopReason::TurnLimit);
        assert_eq!(run.assistant_turns, 2);
        assert_eq!(llm.calls().len(), 2);
        assert_eq!(run.state.memory(), ["fact c1", "fact c2"]);
        assert!(run.reply().is_some_and(|reply| reply.contains("after 2 reasoning steps")));
    }

    #[tokio::test]
    async fn llm_failure_is_a_hard_error() {
        let llm = Arc::new(ScriptedLlm::default());
        llm.push_error(LlmError::EmptyResponse);

        let result = graph(llm).invoke(state("hi"), "run-4").await;

        assert!(matches!(result, Err(GraphError::Llm(LlmError::EmptyResponse))));
    }

    #[tokio::test]
    async fn human_entry_passes_through_to_assistant() {
        let llm = Arc::new(ScriptedLlm::new([Message::assistant("back again")]));

        let run =
            graph(llm).invoke_from(GraphNode::Human, state("hi"), "run-5").await.expect("run");

        assert_eq!(run.steps[0].from, GraphNode::Human);
        assert_eq!(run.steps[0].to, GraphTarget::Node(GraphNode::Assistant));
        assert_eq!(run.reply(), Some("back again"));
    }

    #[tokio::test]
    async fn transitions_and_tool_outcomes_are_audited() {
        let llm = Arc::new(ScriptedLlm::new([
            calls(&[("c1", "save_to_memory"), ("c2", "missing")]),
            Message::assistant("done"),
        ]));
        let sink = Arc::new(InMemoryAuditSink::default());

        graph(llm).with_audit(sink.clone()).invoke(state("go"), "run-6").await.expect("run");

        let events = sink.events();
        let kinds: Vec<_> = events.iter().map(|event| event.event_type.as_str()).collect();
        assert_eq!(
            kinds,
            vec![
                "graph.transition_applied",
                "tool.dispatched",
                "tool.dispatched",
                "graph.transition_applied",
                "graph.transition_applied",
            ]
        );
        assert_eq!(events[1].outcome, AuditOutcome::Success);
        assert_eq!(events[2].outcome, AuditOutcome::Failed);
        assert_eq!(events[2].meta("error_kind"), Some("unknown_tool"));
        assert!(events.iter().all(|event| event.correlation_id == "run-6"));
    }
}
