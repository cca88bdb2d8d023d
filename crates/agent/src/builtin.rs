//! The built-in tool set and the registry wiring used at startup.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use brainstorm_core::domain::research::ResearchDepth;

use crate::files::{ApplyPatchTool, EditFileTool, ReadFileTool, Workspace};
use crate::prd::{GenerateRequest, PrdService};
use crate::research::ResearchPipeline;
use crate::tools::{
    ParamKind, ParamSpec, Tool, ToolArgs, ToolContext, ToolError, ToolOutput, ToolRegistry,
    ToolSpec,
};
use crate::web::SearchProvider;

const BROWSE_RESULTS: u32 = 3;

/// Capabilities the built-in tools are constructed from.
#[derive(Clone)]
pub struct ToolDeps {
    pub search: Arc<dyn SearchProvider>,
    pub research: Arc<ResearchPipeline>,
    pub prds: Arc<PrdService>,
    pub workspace: Workspace,
}

/// Registers all eight built-in tools.
pub fn default_registry(deps: ToolDeps) -> ToolRegistry {
    ToolRegistry::default()
        .with(BrowseWebTool::new(deps.search))
        .with(DeepResearchTool::new(deps.research))
        .with(SaveToMemoryTool::new())
        .with(GeneratePrdTool::new(deps.prds.clone()))
        .with(ReadPrdTool::new(deps.prds))
        .with(ReadFileTool::new(deps.workspace.clone()))
        .with(EditFileTool::new(deps.workspace.clone()))
        .with(ApplyPatchTool::new(deps.workspace))
}

pub struct BrowseWebTool {
    spec: ToolSpec,
    search: Arc<dyn SearchProvider>,
}

impl BrowseWebTool {
    pub fn new(search: Arc<dyn SearchProvider>) -> Self {
        Self {
            spec: ToolSpec {
                name: "browse_web",
                description: "Quick web search for simple queries (basic, fast results).",
                params: vec![ParamSpec::required("query", ParamKind::String, "search query")],
            },
            search,
        }
    }
}

#[async_trait]
impl Tool for BrowseWebTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: ToolArgs, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let query = args.str("query")?;
        let text = match self.search.search(query, BROWSE_RESULTS).await {
            Ok(hits) if hits.is_empty() => "No info found.".to_string(),
            Ok(hits) => hits
                .iter()
                .take(BROWSE_RESULTS as usize)
                .map(|hit| format!("{}: {}", hit.title, hit.content))
                .collect::<Vec<_>>()
                .join("\n"),
            Err(err) => format!("Error: {err}"),
        };
        Ok(ToolOutput::text(text))
    }
}

pub struct DeepResearchTool {
    spec: ToolSpec,
    pipeline: Arc<ResearchPipeline>,
}

impl DeepResearchTool {
    pub fn new(pipeline: Arc<ResearchPipeline>) -> Self {
        Self {
            spec: ToolSpec {
                name: "deep_research",
                description: "Thorough research with content verification, multiple sources and \
                              synthesis. Use for comprehensive analysis.",
                params: vec![
                    ParamSpec::required("query", ParamKind::String, "research question"),
                    ParamSpec::optional(
                        "depth",
                        ParamKind::Enum(&ResearchDepth::ALL),
                        "research depth: shallow, medium or deep",
                        json!("medium"),
                    ),
                ],
            },
            pipeline,
        }
    }
}

#[async_trait]
impl Tool for DeepResearchTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: ToolArgs, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let query = args.str("query")?;
        let depth = ResearchDepth::from_str(args.str("depth")?).map_err(|err| {
            ToolError::InvalidArguments {
                tool: "deep_research".to_string(),
                message: err.to_string(),
            }
        })?;
        Ok(ToolOutput::text(self.pipeline.run(query, depth).await))
    }
}

pub struct SaveToMemoryTool {
    spec: ToolSpec,
}

impl SaveToMemoryTool {
    pub fn new() -> Self {
        Self {
            spec: ToolSpec {
                name: "save_to_memory",
                description: "Save important information to session memory.",
                params: vec![ParamSpec::required("info", ParamKind::String, "fact to remember")],
            },
        }
    }
}

impl Default for SaveToMemoryTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for SaveToMemoryTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: ToolArgs, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let info = args.str("info")?;
        Ok(ToolOutput::text(format!("Saved: {info}")).remember(info))
    }
}

pub struct GeneratePrdTool {
    spec: ToolSpec,
    prds: Arc<PrdService>,
}

impl GeneratePrdTool {
    pub fn new(prds: Arc<PrdService>) -> Self {
        Self {
            spec: ToolSpec {
                name: "generate_prd",
                description: "Generate or update a PRD for a feature. Only use when the user \
                              explicitly asks to generate, create, edit or update a PRD.",
                params: vec![
                    ParamSpec::required(
                        "feature_name",
                        ParamKind::String,
                        "feature the PRD is for",
                    ),
                    ParamSpec::required(
                        "description",
                        ParamKind::String,
                        "short feature description",
                    ),
                    ParamSpec::required("user_input", ParamKind::String, "what the user asked for"),
                    ParamSpec::optional(
                        "update_existing",
                        ParamKind::Boolean,
                        "update the stored PRD instead of replacing it",
                        json!(false),
                    ),
                ],
            },
            prds,
        }
    }
}

#[async_trait]
impl Tool for GeneratePrdTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: ToolArgs, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let request = GenerateRequest {
            feature: args.str("feature_name")?,
            description: args.str("description")?,
            user_input: args.str("user_input")?,
            update_existing: args.bool("update_existing")?,
        };
        let generated = self
            .prds
            .generate(request, &ctx.thread.user_id)
            .await
            .map_err(|err| ToolError::execution("generate_prd", err.to_string()))?;
        Ok(ToolOutput::text(generated.render()))
    }
}

pub struct ReadPrdTool {
    spec: ToolSpec,
    prds: Arc<PrdService>,
}

impl ReadPrdTool {
    pub fn new(prds: Arc<PrdService>) -> Self {
        Self {
            spec: ToolSpec {
                name: "read_prd",
                description: "Read an existing PRD for the current user.",
                params: vec![ParamSpec::required(
                    "feature_name",
                    ParamKind::String,
                    "feature to read",
                )],
            },
            prds,
        }
    }
}

#[async_trait]
impl Tool for ReadPrdTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, args: ToolArgs, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let feature = args.str("feature_name")?;
        let user = &ctx.thread.user_id;
        let found = self
            .prds
            .read(feature, user)
            .await
            .map_err(|err| ToolError::execution("read_prd", err.to_string()))?;

        let text = match found {
            Some(content) => format!("Existing PRD for '{feature}' (User: {user}):\n\n{content}"),
            None => format!("No existing PRD found for '{feature}' for user '{user}'."),
        };
        Ok(ToolOutput::text(text))
    }
}
