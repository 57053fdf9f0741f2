// crates/open-mem-server/src/main.rs
// open-mem - per-project coding-session memory engine

mod cli;

use std::process::ExitCode;

use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env from ~/.open-mem/.env only (never from CWD - a malicious
    // repo could override API keys)
    if let Some(home) = dirs::home_dir()
        && let Err(e) = dotenvy::from_path(home.join(".open-mem/.env"))
    {
        tracing::debug!("Failed to load global .env file: {}", e);
    }

    let cli = Cli::parse();

    let log_level = match std::env::var("OPEN_MEM_LOG_LEVEL")
        .unwrap_or_default()
        .to_lowercase()
        .as_str()
    {
        "error" => Level::ERROR,
        "info" => Level::INFO,
        "debug" | "trace" => Level::DEBUG,
        _ => match &cli.command {
            // The daemon narrates its lifecycle; one-shot commands stay quiet
            Commands::Daemon { .. } => Level::INFO,
            _ => Level::WARN,
        },
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    match cli.command {
        Commands::Daemon {
            project,
            poll_interval,
        } => cli::run_daemon(project, poll_interval).await,
        Commands::Tool {
            name,
            args,
            project,
        } => cli::run_tool(name, args, project).await,
        Commands::Doctor { project } => cli::run_doctor(project).await,
        Commands::Maintenance { action, project } => cli::run_maintenance(action, project).await,
    }
}
