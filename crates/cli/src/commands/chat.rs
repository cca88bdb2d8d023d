use serde_json::json;
use uuid::Uuid;

use brainstorm_agent::StopReason;
use brainstorm_core::config::LoadOptions;
use brainstorm_core::errors::ApplicationError;

use crate::commands::bootstrap::{load_config, open_database, runtime, session_manager};
use crate::commands::CommandResult;

#[derive(Debug, Clone)]
pub struct ChatArgs {
    pub user_id: String,
    pub session_id: String,
    pub resume: bool,
    pub message: String,
}

pub fn run(options: &LoadOptions, args: ChatArgs) -> CommandResult {
    let config = match load_config("chat", options) {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("chat") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    runtime.block_on(async {
        let pool = match open_database("chat", &config).await {
            Ok(pool) => pool,
            Err(failure) => return failure,
        };
        let sessions = match session_manager("chat", &config, &pool) {
            Ok(sessions) => sessions,
            Err(failure) => return failure,
        };

        let turn = if args.resume {
            sessions.continue_session(&args.user_id, &args.session_id, &args.message).await
        } else {
            sessions.start_session(&args.user_id, &args.session_id, &args.message).await
        };
        pool.close().await;

        match turn {
            Ok(turn) => {
                let stop_reason = match turn.stop_reason {
                    StopReason::Terminated => "terminated",
                    StopReason::TurnLimit => "turn_limit",
                };
                let details = json!({
                    "thread_id": turn.thread_id,
                    "correlation_id": turn.correlation_id,
                    "stop_reason": stop_reason,
                    "messages": turn.state.messages().len(),
                    "memory": turn.state.memory(),
                });
                CommandResult::success_with("chat", turn.reply, details)
            }
            Err(error) => CommandResult::from_application_error(
                "chat",
                ApplicationError::from(error),
                &Uuid::new_v4().to_string(),
            ),
        }
    })
}
