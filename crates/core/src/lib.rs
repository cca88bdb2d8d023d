pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod graph;

pub use audit::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink,
    NoopAuditSink,
};
pub use domain::message::{Message, Role, ToolCall};
pub use domain::prd::{FeatureKey, PrdKey, PrdRecord, PrdSummary, PrdWriteStatus};
pub use domain::research::{QualityRating, ResearchDepth, ResearchSource, SearchHit, Synthesis};
pub use domain::state::{ConversationState, SessionId, StateUpdate, ThreadKey, UserId};
pub use errors::{ApplicationError, DomainError, ErrorClass, InterfaceError};
pub use graph::{GraphEngine, GraphNode, GraphTarget, RouteDecision, ToolLoopGraph};
