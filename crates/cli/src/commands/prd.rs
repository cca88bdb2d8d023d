use std::sync::Arc;

use serde_json::{json, Value};

use brainstorm_agent::PrdService;
use brainstorm_core::config::LoadOptions;
use brainstorm_core::domain::state::UserId;
use brainstorm_db::repositories::SqlPrdRepository;

use crate::commands::bootstrap::{llm_client, load_config, open_database, runtime};
use crate::commands::{CommandResult, EXIT_BAD_REQUEST, EXIT_NOT_FOUND, EXIT_UNAVAILABLE};

#[derive(Debug, Clone)]
pub enum PrdAction {
    Show { user_id: String, feature: String },
    List { user_id: String },
}

pub fn run(options: &LoadOptions, action: PrdAction) -> CommandResult {
    let config = match load_config("prd", options) {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let user_id = match &action {
        PrdAction::Show { user_id, .. } | PrdAction::List { user_id } => user_id.trim().to_string(),
    };
    if user_id.is_empty() {
        return CommandResult::failure(
            "prd",
            "bad_request",
            "--user must not be empty",
            EXIT_BAD_REQUEST,
        );
    }
    let user_id = UserId(user_id);

    let runtime = match runtime("prd") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    runtime.block_on(async {
        let pool = match open_database("prd", &config).await {
            Ok(pool) => pool,
            Err(failure) => return failure,
        };
        let llm = match llm_client("prd", &config) {
            Ok(llm) => llm,
            Err(failure) => return failure,
        };
        let service = PrdService::new(Arc::new(SqlPrdRepository::new(pool.clone())), llm);

        let result = match action {
            PrdAction::Show { feature, .. } => show(&service, &feature, &user_id).await,
            PrdAction::List { .. } => list(&service, &user_id).await,
        };
        pool.close().await;
        result
    })
}

async fn show(service: &PrdService, feature: &str, user_id: &UserId) -> CommandResult {
    match service.read(feature, user_id).await {
        Ok(Some(content)) => CommandResult::success("prd", content),
        Ok(None) => CommandResult::failure(
            "prd",
            "not_found",
            format!("No existing PRD found for '{feature}' for user '{user_id}'."),
            EXIT_NOT_FOUND,
        ),
        Err(error) => {
            CommandResult::failure("prd", "persistence", error.to_string(), EXIT_UNAVAILABLE)
        }
    }
}

async fn list(service: &PrdService, user_id: &UserId) -> CommandResult {
    match service.list(user_id).await {
        Ok(summaries) => {
            let entries: Vec<Value> = summaries
                .iter()
                .map(|summary| {
                    json!({
                        "feature_name": summary.feature_name.as_str(),
                        "title": summary.title,
                        "description": summary.description,
                    })
                })
                .collect();
            CommandResult::success_with(
                "prd",
                format!("{} PRD(s) for user '{user_id}'", entries.len()),
                Value::Array(entries),
            )
        }
        Err(error) => {
            CommandResult::failure("prd", "persistence", error.to_string(), EXIT_UNAVAILABLE)
        }
    }
}
