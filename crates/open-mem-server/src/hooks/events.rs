// crates/open-mem-server/src/hooks/events.rs
// Session-lifecycle event hook: retention on create, batch kicks on idle,
// the full drain + summarize path on completion

use std::sync::Arc;

use open_mem_types::SessionStatus;

use crate::engine::Engine;
use crate::hooks::{HookTimer, spawn_logged, swallow_hook_error};
use crate::maintenance::folder_context;
use crate::processor::summarize_session;
use crate::utils::CancelToken;

/// Host lifecycle events the adapter understands. Everything else is a
/// deliberate no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    SessionCreated { session_id: String },
    SessionIdle { session_id: String },
    SessionCompleted { session_id: String },
    Unknown,
}

impl HostEvent {
    /// Parse the host's `{type, properties}` payload.
    pub fn from_json(event: &serde_json::Value) -> Self {
        let session_id = event
            .get("properties")
            .and_then(|p| p.get("sessionId"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        match event.get("type").and_then(|v| v.as_str()) {
            Some("session.created") if !session_id.is_empty() => {
                Self::SessionCreated { session_id }
            }
            Some("session.idle") if !session_id.is_empty() => Self::SessionIdle { session_id },
            Some("session.completed") | Some("session.ended") if !session_id.is_empty() => {
                Self::SessionCompleted { session_id }
            }
            _ => Self::Unknown,
        }
    }
}

/// onEvent: dispatch one lifecycle event. Never throws; the host sees
/// unit regardless of what happens underneath.
pub async fn on_event(engine: &Arc<Engine>, event: &serde_json::Value, cancel: &CancelToken) {
    let _timer = HookTimer::start("onEvent");

    match HostEvent::from_json(event) {
        HostEvent::SessionCreated { session_id } => on_created(engine, &session_id).await,
        HostEvent::SessionIdle { session_id } => on_idle(engine, &session_id).await,
        HostEvent::SessionCompleted { session_id } => {
            on_completed(engine, &session_id, cancel).await
        }
        HostEvent::Unknown => {}
    }
}

async fn on_created(engine: &Arc<Engine>, session_id: &str) {
    let project_path = engine.settings.project_root.to_string_lossy().to_string();
    let sid = session_id.to_string();
    if engine
        .pool
        .try_interact("session create", move |conn| {
            crate::db::get_or_create_session_sync(conn, &sid, &project_path).map_err(Into::into)
        })
        .await
        .is_none()
    {
        swallow_hook_error("onEvent", "session creation failed");
        return;
    }

    // Retention is best-effort: a failed sweep never blocks the session
    let retention_days = engine.settings.retention_days;
    let size_cap = engine.settings.max_database_size_mb;
    if retention_days > 0 || size_cap > 0 {
        engine
            .pool
            .try_interact("retention", move |conn| {
                crate::db::run_age_retention_sync(conn, retention_days)
                    .map_err(anyhow::Error::msg)?;
                crate::db::enforce_size_cap_sync(conn, size_cap).map_err(anyhow::Error::msg)?;
                Ok(())
            })
            .await;
    }
}

async fn on_idle(engine: &Arc<Engine>, session_id: &str) {
    let sid = session_id.to_string();
    engine
        .pool
        .try_interact("session idle", move |conn| {
            crate::db::update_session_status_sync(conn, &sid, SessionStatus::Idle)
                .map_err(Into::into)
        })
        .await;

    // Fire-and-forget drain, skipped when a daemon owns the DB
    if !daemon_owns_db(engine) {
        let processor = engine.processor.clone();
        spawn_logged("idle batch", async move {
            let processed = processor.drain(&CancelToken::new()).await?;
            if processed > 0 {
                tracing::debug!("idle drain processed {processed} observations");
            }
            Ok(())
        });
    }

    if engine.settings.folder_context_enabled {
        let engine = engine.clone();
        spawn_logged("folder context refresh", async move {
            folder_context::rebuild(&engine).await.map(|_| ())
        });
    }
}

async fn on_completed(engine: &Arc<Engine>, session_id: &str, cancel: &CancelToken) {
    // Drain the queue synchronously so the summary sees every observation
    if !daemon_owns_db(engine) {
        if let Err(e) = engine.processor.drain(cancel).await {
            swallow_hook_error("onEvent", format!("final drain failed: {e}"));
        }
    }

    let summary_id = match summarize_session(
        &engine.pool,
        engine.language_model.as_ref(),
        session_id,
        cancel,
    )
    .await
    {
        Ok(id) => id,
        Err(e) => {
            swallow_hook_error("onEvent", format!("summarization failed: {e}"));
            None
        }
    };

    let sid = session_id.to_string();
    engine
        .pool
        .try_interact("session complete", move |conn| {
            crate::db::mark_completed_sync(conn, &sid, summary_id.as_deref()).map_err(Into::into)
        })
        .await;

    if engine.settings.folder_context_enabled
        && let Err(e) = folder_context::rebuild(engine).await
    {
        swallow_hook_error("onEvent", format!("folder context rebuild failed: {e}"));
    }
}

/// Whether a live daemon owns this project DB (discovered by PID-file
/// liveness). The in-process batch path stands down when one does.
fn daemon_owns_db(engine: &Arc<Engine>) -> bool {
    engine
        .pool
        .path()
        .map(|path| crate::daemon::pid::live_daemon_pid(path).is_some())
        .unwrap_or(false)
}
