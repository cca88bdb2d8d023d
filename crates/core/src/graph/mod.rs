pub mod engine;
pub mod states;

pub use engine::{
    route_after_assistant, GraphDefinition, GraphEngine, GraphTransitionError, ToolLoopGraph,
};
pub use states::{GraphNode, GraphTarget, RouteDecision, TransitionOutcome};
