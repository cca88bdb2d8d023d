pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use brainstorm_core::config::LoadOptions;

use commands::chat::ChatArgs;
use commands::prd::PrdAction;

#[derive(Debug, Parser)]
#[command(
    name = "brainstorm",
    about = "Brainstorming agent operator CLI",
    long_about = "Chat with the brainstorming agent, inspect per-user PRDs, run research, and manage configuration and migrations.",
    after_help = "Examples:\n  brainstorm chat --user alice --session s1 \"let's plan dark mode\"\n  brainstorm chat --user alice --session s1 --continue \"generate PRD for dark mode\"\n  brainstorm prd list --user alice\n  brainstorm research \"dark mode adoption\" --depth deep"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Path to a brainstorm.toml config file")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Send one message to a conversation thread")]
    Chat {
        #[arg(long)]
        user: String,
        #[arg(long)]
        session: String,
        #[arg(
            long = "continue",
            help = "Continue the checkpointed thread instead of starting over"
        )]
        resume: bool,
        message: String,
    },
    #[command(subcommand, about = "Read PRDs stored for a user")]
    Prd(PrdCommand),
    #[command(about = "Run the deep research pipeline for a query")]
    Research {
        query: String,
        #[arg(long, default_value = "medium", help = "shallow | medium | deep")]
        depth: String,
    },
}

#[derive(Debug, Subcommand)]
enum PrdCommand {
    #[command(about = "Print the PRD a user stored for a feature")]
    Show {
        #[arg(long)]
        user: String,
        feature: String,
    },
    #[command(about = "List every PRD a user has stored")]
    List {
        #[arg(long)]
        user: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = LoadOptions { config_path: cli.config, ..LoadOptions::default() };

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(&options),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run(&options) }
        }
        Command::Chat { user, session, resume, message } => commands::chat::run(
            &options,
            ChatArgs { user_id: user, session_id: session, resume, message },
        ),
        Command::Prd(PrdCommand::Show { user, feature }) => {
            commands::prd::run(&options, PrdAction::Show { user_id: user, feature })
        }
        Command::Prd(PrdCommand::List { user }) => {
            commands::prd::run(&options, PrdAction::List { user_id: user })
        }
        Command::Research { query, depth } => commands::research::run(&options, &query, &depth),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
