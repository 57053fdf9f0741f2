// crates/open-mem-server/src/daemon/mod.rs
// Long-running worker owning one project database

pub mod ipc;
pub mod pid;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::config::Settings;
use crate::engine::Engine;
use crate::utils::CancelToken;
use ipc::{DaemonCommand, DaemonReply, DaemonStatus};

/// Floor for `--poll-interval`; anything lower is a usage error at the
/// CLI and clamped here as a second line of defense.
pub const MIN_POLL_INTERVAL_MS: u64 = 100;

/// Run the daemon for one project until `stop` or a termination signal.
///
/// On start: PID file beside the DB, engine construction, poll loop.
/// Each poll step claims a batch, compresses, persists, embeds, sleeps.
/// SIGINT/SIGTERM and the `stop` IPC command drain the in-flight batch
/// and exit cleanly (0). Unrecoverable startup errors exit 2 (mapped by
/// the caller).
pub async fn run(project_root: &Path, poll_interval_ms: u64) -> Result<()> {
    let mut settings = Settings::resolve(project_root);
    settings.poll_interval_ms = poll_interval_ms.max(MIN_POLL_INTERVAL_MS);

    let db_path = settings.resolved_db_path();
    if let Some(existing) = pid::live_daemon_pid(&db_path) {
        anyhow::bail!("another daemon (pid {existing}) already owns {}", db_path.display());
    }

    let engine = Engine::init(settings.clone()).await?;
    let pid_path = pid::write_pid_file(&db_path)?;
    tracing::info!(
        "daemon started (pid {}, poll {}ms, pid file {})",
        std::process::id(),
        settings.poll_interval_ms,
        pid_path.display()
    );

    let result = poll_loop(&engine, settings.poll_interval_ms).await;

    pid::remove_pid_file(&db_path);
    tracing::info!("daemon stopped");
    result
}

async fn poll_loop(engine: &Arc<Engine>, poll_interval_ms: u64) -> Result<()> {
    let cancel = CancelToken::new();
    let mut processed_total: u64 = 0;

    let mut stdin_lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    loop {
        tokio::select! {
            _ = sigint.recv() => {
                tracing::info!("SIGINT: draining and shutting down");
                cancel.cancel();
                break;
            }
            _ = sigterm.recv() => {
                tracing::info!("SIGTERM: draining and shutting down");
                cancel.cancel();
                break;
            }
            line = stdin_lines.next_line() => {
                match line {
                    Ok(Some(line)) if line.trim().is_empty() => {}
                    Ok(Some(line)) => {
                        let reply = match ipc::parse_command(&line) {
                            Ok(DaemonCommand::Stop) => {
                                write_reply(&mut stdout, &DaemonReply::ack()).await;
                                break;
                            }
                            Ok(DaemonCommand::Flush) => {
                                match engine.processor.process_batch(&cancel).await {
                                    Ok(n) => {
                                        processed_total += n as u64;
                                        DaemonReply::ack()
                                    }
                                    Err(e) => DaemonReply::error(e.to_string()),
                                }
                            }
                            Ok(DaemonCommand::Status) => {
                                let depth = engine
                                    .pool
                                    .interact_raw(crate::db::queue_depth_sync)
                                    .await
                                    .unwrap_or(-1);
                                DaemonReply::status(DaemonStatus {
                                    pid: std::process::id(),
                                    queue_depth: depth,
                                    processed_total,
                                })
                            }
                            Err(e) => DaemonReply::error(e),
                        };
                        write_reply(&mut stdout, &reply).await;
                    }
                    // Parent closed the channel: keep polling headless
                    Ok(None) => {
                        tokio::time::sleep(Duration::from_millis(poll_interval_ms)).await;
                        processed_total += poll_once(engine, &cancel).await;
                    }
                    Err(e) => {
                        tracing::warn!("stdin read failed: {e}");
                        tokio::time::sleep(Duration::from_millis(poll_interval_ms)).await;
                    }
                }
            }
            _ = tokio::time::sleep(Duration::from_millis(poll_interval_ms)) => {
                processed_total += poll_once(engine, &cancel).await;
            }
        }
    }

    // Drain: one final pass so claimed rows settle before exit
    let _ = engine.processor.process_batch(&CancelToken::new()).await;
    Ok(())
}

async fn poll_once(engine: &Arc<Engine>, cancel: &CancelToken) -> u64 {
    match engine.processor.process_batch(cancel).await {
        Ok(n) => {
            if n > 0 {
                tracing::debug!("poll processed {n} observations");
            }
            n as u64
        }
        Err(e) => {
            tracing::warn!("poll batch failed: {e}");
            0
        }
    }
}

async fn write_reply(stdout: &mut tokio::io::Stdout, reply: &DaemonReply) {
    if let Ok(mut line) = serde_json::to_string(reply) {
        line.push('\n');
        if let Err(e) = stdout.write_all(line.as_bytes()).await {
            tracing::warn!("failed to write IPC reply: {e}");
        }
        let _ = stdout.flush().await;
    }
}
