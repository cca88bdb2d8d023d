use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use crate::domain::message::Message;
use crate::graph::states::{GraphNode, GraphTarget, RouteDecision, TransitionOutcome};

pub trait GraphDefinition {
    fn entry_node(&self) -> GraphNode;
    fn transition(
        &self,
        current: GraphNode,
        route: Option<RouteDecision>,
    ) -> Result<TransitionOutcome, GraphTransitionError>;
}

/// The assistant/tools loop with an optional human pause point.
#[derive(Clone, Debug, Default)]
pub struct ToolLoopGraph;

impl GraphDefinition for ToolLoopGraph {
    fn entry_node(&self) -> GraphNode {
        GraphNode::Assistant
    }

    fn transition(
        &self,
        current: GraphNode,
        route: Option<RouteDecision>,
    ) -> Result<TransitionOutcome, GraphTransitionError> {
        transition_tool_loop(current, route)
    }
}

pub struct GraphEngine<G> {
    graph: G,
}

impl<G> GraphEngine<G>
where
    G: GraphDefinition,
{
    pub fn new(graph: G) -> Self {
        Self { graph }
    }

    pub fn entry_node(&self) -> GraphNode {
        self.graph.entry_node()
    }

    pub fn apply(
        &self,
        current: GraphNode,
        route: Option<RouteDecision>,
    ) -> Result<TransitionOutcome, GraphTransitionError> {
        self.graph.transition(current, route)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: GraphNode,
        route: Option<RouteDecision>,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, GraphTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, route);
        match &result {
            Ok(outcome) => {
                let mut event = audit
                    .event("graph.transition_applied", AuditCategory::Graph, AuditOutcome::Success)
                    .with_metadata("from", outcome.from)
                    .with_metadata("to", outcome.to);
                if let Some(route) = outcome.route {
                    event = event.with_metadata("route", format!("{route:?}"));
                }
                sink.emit(event);
            }
            Err(error) => {
                let event = audit
                    .event(
                        "graph.transition_rejected",
                        AuditCategory::Graph,
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("error", error);
                sink.emit(event);
            }
        }
        result
    }
}

impl Default for GraphEngine<ToolLoopGraph> {
    fn default() -> Self {
        Self::new(ToolLoopGraph)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GraphTransitionError {
    #[error("node {node} requires a routing decision")]
    MissingRoute { node: GraphNode },
    #[error("invalid transition from {node} using route {route:?}")]
    InvalidTransition { node: GraphNode, route: Option<RouteDecision> },
}

/// Conditional edge out of `assistant`. Looks only at the message's tool calls.
pub fn route_after_assistant(message: &Message) -> RouteDecision {
    if message.tool_calls.is_empty() {
        RouteDecision::Terminate
    } else {
        RouteDecision::CallTools
    }
}

fn transition_tool_loop(
    current: GraphNode,
    route: Option<RouteDecision>,
) -> Result<TransitionOutcome, GraphTransitionError> {
    use GraphNode::{Assistant, Human, Tools};
    use RouteDecision::{CallTools, Terminate};

    let to = match (current, route) {
        (Assistant, Some(CallTools)) => GraphTarget::Node(Tools),
        (Assistant, Some(Terminate)) => GraphTarget::End,
        (Assistant, None) => return Err(GraphTransitionError::MissingRoute { node: current }),
        (Tools, None) | (Human, None) => GraphTarget::Node(Assistant),
        (Tools, Some(_)) | (Human, Some(_)) => {
            return Err(GraphTransitionError::InvalidTransition { node: current, route });
        }
    };

    Ok(TransitionOutcome { from: current, to, route })
}
