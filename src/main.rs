use anyhow::Context;
use clap::Parser;
use colored::Colorize;
use snsync::commands::{Cli, Session};
use snsync::config::ENV_FILE_NAME;
use snsync::error::ErrorCategory;
use snsync::utils::logger::init_logger;
use std::path::PathBuf;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match main_impl(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{} {:#}", "❌".red(), err);
            ExitCode::from(1)
        }
    }
}

async fn main_impl(cli: Cli) -> anyhow::Result<ExitCode> {
    let root = match &cli.project {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("Cannot determine the current directory")?,
    };

    // Credentials come from the project's .env; real environment variables win.
    let env_file: PathBuf = root.join(ENV_FILE_NAME);
    let env_loaded = dotenvy::from_path(&env_file).is_ok();

    init_logger(cli.log_level.as_deref(), cli.log_file.clone())?;
    if !env_loaded {
        tracing::debug!("No credentials file at {}", env_file.display());
    }

    let mut session = match Session::open(&root) {
        Ok(session) => session,
        Err(err) => return Ok(report_error(&err)),
    };
    match session.execute(cli.command).await {
        Ok(true) => Ok(ExitCode::SUCCESS),
        Ok(false) => Ok(ExitCode::from(1)),
        Err(err) => Ok(report_error(&err)),
    }
}

fn report_error(err: &snsync::SnSyncError) -> ExitCode {
    tracing::debug!("{:?}", err);
    if err.is_conflict() {
        eprintln!("\n{} {}", "🛑".red(), err.user_message().red());
        return ExitCode::from(2);
    }
    match err.category() {
        ErrorCategory::Auth => {
            eprintln!("{} {}", "🔒".red(), err.user_message());
            ExitCode::from(3)
        }
        _ => {
            eprintln!("{} {}", "❌".red(), err.user_message());
            ExitCode::from(1)
        }
    }
}
