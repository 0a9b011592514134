use std::process::ExitCode;

use companion_config::Config;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::load() {
        Ok(config) => config,
        Err(error) => error.exit(),
    };
    match companiond::run_companion(config).await {
        Ok(cause) if cause.is_normal() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(error) => {
            eprintln!("companiond: {error}");
            ExitCode::FAILURE
        }
    }
}
