//! Agent runtime for the brainstorming assistant.
//!
//! A conversation is a [`ConversationState`](brainstorm_core::ConversationState) driven
//! through the `assistant -> tools -> assistant` loop by [`runtime::AgentGraph`]. The
//! [`session::SessionManager`] scopes every run to one `(user_id, session_id)` thread and
//! checkpoints the resulting state.
//!
//! # Modules
//!
//! - `tools` - registry, parameter schemas and dispatch
//! - `builtin`, `files` - the eight tools exposed to the model
//! - `research` - the deep-research pipeline over `web` adapters
//! - `prd` - per-user PRD generation and lookup
//! - `llm` - chat-completions client
//!
//! The model never sees which user it serves through tool arguments. PRD tools read the
//! owner from the thread they run in.

pub mod builtin;
pub mod files;
pub mod guardrails;
pub mod llm;
pub mod locks;
pub mod prd;
pub mod prompts;
pub mod research;
pub mod runtime;
pub mod session;
pub mod tools;
pub mod web;

#[cfg(test)]
mod testing;

pub use builtin::{default_registry, ToolDeps};
pub use files::Workspace;
pub use guardrails::{TurnDecision, TurnGuard};
pub use llm::{ChatCompletionsClient, LlmClient, LlmError};
pub use prd::{GeneratedPrd, GenerateRequest, PrdError, PrdService};
pub use research::{ResearchPipeline, ResearchSettings};
pub use runtime::{AgentGraph, GraphError, GraphRun, StopReason};
pub use session::{SessionError, SessionManager, SessionTurn};
pub use tools::{Tool, ToolContext, ToolError, ToolOutput, ToolRegistry, ToolSpec};
pub use web::{HttpPageFetcher, PageFetcher, SearchProvider, TavilySearch};
