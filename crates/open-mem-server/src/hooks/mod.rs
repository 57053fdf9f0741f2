// crates/open-mem-server/src/hooks/mod.rs
// Host hook adapters: thin, never-throwing glue between host callbacks
// and the core

pub mod capture;
pub mod compact;
pub mod events;
pub mod inject;

use std::time::Instant;

/// Performance threshold in milliseconds - warn if a hook exceeds this.
const HOOK_PERF_THRESHOLD_MS: u128 = 100;

/// Timer guard for hook performance monitoring.
/// Logs execution time to stderr on drop.
pub struct HookTimer {
    hook_name: &'static str,
    start: Instant,
}

impl HookTimer {
    /// Start timing a hook
    pub fn start(hook_name: &'static str) -> Self {
        Self {
            hook_name,
            start: Instant::now(),
        }
    }
}

impl Drop for HookTimer {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed().as_millis();
        if elapsed > HOOK_PERF_THRESHOLD_MS {
            tracing::warn!(
                "[open-mem] PERF: {} hook took {}ms (threshold: {}ms)",
                self.hook_name,
                elapsed,
                HOOK_PERF_THRESHOLD_MS
            );
        } else {
            tracing::debug!(
                "[open-mem] {} hook completed in {}ms",
                self.hook_name,
                elapsed
            );
        }
    }
}

/// Log a hook-layer failure without propagating it. Hooks never throw:
/// errors go to stderr with the `[open-mem]` prefix and the hook returns
/// unit.
pub fn swallow_hook_error(hook_name: &str, error: impl std::fmt::Display) {
    eprintln!("[open-mem] {hook_name} hook error (non-fatal): {error}");
}

/// Spawn a detached background task whose only failure handling is a log
/// line. Keeps fire-and-forget paths (session.idle batch kicks) from ever
/// surfacing errors into the host.
pub fn spawn_logged<F>(label: &'static str, future: F)
where
    F: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = future.await {
            tracing::warn!("[open-mem] background {label} failed: {e}");
        }
    });
}
