use std::str::FromStr;

use brainstorm_core::config::LoadOptions;
use brainstorm_core::domain::research::ResearchDepth;

use crate::commands::bootstrap::{load_config, research_pipeline, runtime};
use crate::commands::{CommandResult, EXIT_BAD_REQUEST, EXIT_CONFIG};

pub fn run(options: &LoadOptions, query: &str, depth: &str) -> CommandResult {
    let config = match load_config("research", options) {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let depth = match ResearchDepth::from_str(depth) {
        Ok(depth) => depth,
        Err(error) => {
            return CommandResult::failure(
                "research",
                "bad_request",
                error.to_string(),
                EXIT_BAD_REQUEST,
            )
        }
    };
    if query.trim().is_empty() {
        return CommandResult::failure(
            "research",
            "bad_request",
            "query must not be empty",
            EXIT_BAD_REQUEST,
        );
    }
    if config.search.api_key.is_none() {
        return CommandResult::failure(
            "research",
            "config_validation",
            "search api key is not configured (set BRAINSTORM_SEARCH_API_KEY or TAVILY_API_KEY)",
            EXIT_CONFIG,
        );
    }

    let runtime = match runtime("research") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };
    let pipeline = research_pipeline(&config);
    let report = runtime.block_on(pipeline.run(query, depth));

    CommandResult::success("research", report)
}
