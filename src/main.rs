use std::process::ExitCode;

use stackback::cli::{execute, Cli};
use stackback::observability::Logger;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_args();

    let code = match execute(cli.command, cli.config).await {
        Ok(code) => code,
        Err(e) => {
            let reason = e.to_string();
            Logger::error("COMMAND_FAILED", &[("error", reason.as_str())]);
            eprintln!("{}", e);
            e.exit_code()
        }
    };

    ExitCode::from(code.clamp(0, 255) as u8)
}
