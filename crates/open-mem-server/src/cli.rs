// crates/open-mem-server/src/cli.rs
// Command-line surface: daemon, one-shot tool calls, doctor, maintenance

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use open_mem::config::Settings;
use open_mem::daemon;
use open_mem::engine::Engine;
use open_mem::tools;
use open_mem::utils::CancelToken;

#[derive(Parser)]
#[command(
    name = "open-mem",
    about = "Per-project coding-session memory engine",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the background worker owning one project database
    Daemon {
        /// Project root containing .open-mem/memory.db
        #[arg(long)]
        project: PathBuf,
        /// Poll cadence in milliseconds (minimum 100)
        #[arg(long, default_value_t = 5000)]
        poll_interval: u64,
    },
    /// Run one mem-* tool call and print the JSON response
    Tool {
        /// Tool name (mem-find, mem-get, mem-export, ...)
        name: String,
        /// JSON arguments (defaults to {})
        args: Option<String>,
        /// Project root (defaults to the current directory)
        #[arg(long)]
        project: Option<PathBuf>,
    },
    /// Validate configuration and report engine health
    Doctor {
        /// Project root (defaults to the current directory)
        #[arg(long)]
        project: Option<PathBuf>,
    },
    /// Folder-context maintenance
    Maintenance {
        /// Action: dry-run, clean, rebuild, or purge
        action: String,
        /// Project root (defaults to the current directory)
        #[arg(long)]
        project: Option<PathBuf>,
    },
}

fn project_or_cwd(project: Option<PathBuf>) -> PathBuf {
    project.unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

/// Run the daemon subcommand. Exit codes: 0 clean, 1 usage, 2
/// unrecoverable.
pub async fn run_daemon(project: PathBuf, poll_interval: u64) -> ExitCode {
    if poll_interval < daemon::MIN_POLL_INTERVAL_MS {
        eprintln!(
            "error: --poll-interval must be at least {} ms",
            daemon::MIN_POLL_INTERVAL_MS
        );
        return ExitCode::from(1);
    }
    if !project.is_dir() {
        eprintln!("error: project path {} is not a directory", project.display());
        return ExitCode::from(1);
    }

    match daemon::run(&project, poll_interval).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("daemon failed: {e:#}");
            ExitCode::from(2)
        }
    }
}

/// Run one tool call against the project engine and print the envelope.
pub async fn run_tool(name: String, args: Option<String>, project: Option<PathBuf>) -> ExitCode {
    let parsed_args: serde_json::Value = match args.as_deref() {
        None | Some("") => serde_json::json!({}),
        Some(raw) => match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => {
                eprintln!("error: arguments are not valid JSON: {e}");
                return ExitCode::from(1);
            }
        },
    };

    let engine = match init_engine(project).await {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::from(2);
        }
    };

    let response = tools::dispatch(&engine, &name, parsed_args, &CancelToken::new()).await;
    match serde_json::to_string_pretty(&response) {
        Ok(text) => println!("{text}"),
        Err(e) => {
            eprintln!("error serializing response: {e}");
            return ExitCode::from(2);
        }
    }
    ExitCode::SUCCESS
}

/// Print the configuration validation report and basic store stats.
pub async fn run_doctor(project: Option<PathBuf>) -> ExitCode {
    let root = project_or_cwd(project);
    let settings = Settings::resolve(&root);
    let validation = settings.validate();
    println!("{}", validation.report());

    println!("db path: {}", settings.resolved_db_path().display());
    match settings.effective_provider() {
        Some(provider) => println!(
            "provider: {provider} (embedding dimension {})",
            settings.effective_embedding_dimension()
        ),
        None => println!("provider: none detected; capture-only mode"),
    }

    match Engine::init(settings).await {
        Ok(engine) => {
            let counts = engine
                .pool
                .interact_raw(|conn| {
                    let observations = open_mem::db::count_current_observations_sync(conn)?;
                    let pending = open_mem::db::queue_depth_sync(conn)?;
                    Ok((observations, pending))
                })
                .await;
            match counts {
                Ok((observations, pending)) => {
                    println!("observations: {observations}, pending queue: {pending}");
                }
                Err(e) => println!("store check failed: {e}"),
            }
            println!(
                "vector index: {}",
                if engine.pool.has_vector_index() {
                    "native (sqlite-vec)"
                } else {
                    "fallback (in-memory cosine)"
                }
            );
            if validation.is_valid() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            }
        }
        Err(e) => {
            eprintln!("engine failed to start: {e:#}");
            ExitCode::from(2)
        }
    }
}

/// Run one folder-context maintenance action.
pub async fn run_maintenance(action: String, project: Option<PathBuf>) -> ExitCode {
    let tool_action = match action.as_str() {
        "dry-run" => "folderContextDryRun",
        "clean" => "folderContextClean",
        "rebuild" => "folderContextRebuild",
        "purge" => "folderContextPurge",
        other => {
            eprintln!("error: unknown action {other:?} (use dry-run|clean|rebuild|purge)");
            return ExitCode::from(1);
        }
    };

    let engine = match init_engine(project).await {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::from(2);
        }
    };
    let response = tools::dispatch(
        &engine,
        "mem-maintenance",
        serde_json::json!({"action": tool_action}),
        &CancelToken::new(),
    )
    .await;
    match serde_json::to_string_pretty(&response) {
        Ok(text) => println!("{text}"),
        Err(e) => eprintln!("error serializing response: {e}"),
    }
    ExitCode::SUCCESS
}

async fn init_engine(project: Option<PathBuf>) -> anyhow::Result<Arc<Engine>> {
    let root = project_or_cwd(project);
    let settings = Settings::resolve(&root);
    Engine::init(settings).await
}
