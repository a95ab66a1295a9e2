use clap::Parser;
use std::process::ExitCode;
use tracing::error;

mod commands;

use commands::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    check_aprs::log_format::init_logging(!cli.no_color);

    match commands::handle_run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
