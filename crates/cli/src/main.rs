use std::process::ExitCode;

fn main() -> ExitCode {
    brainstorm_cli::run()
}
