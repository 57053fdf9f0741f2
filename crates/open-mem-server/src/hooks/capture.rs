// crates/open-mem-server/src/hooks/capture.rs
// Tool-capture hook: gate, redact, ensure session, enqueue

use std::sync::{Arc, LazyLock};

use crate::engine::Engine;
use crate::hooks::{HookTimer, swallow_hook_error};

/// `<private>…</private>` blocks, non-greedy, matching across newlines.
static PRIVATE_BLOCK: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"(?s)<private>.*?</private>").unwrap_or_else(|e| {
        // The pattern is a literal; this cannot fail at runtime
        panic!("private-block regex failed to compile: {e}")
    })
});

/// Replacement for matched sensitive patterns.
const REDACTED: &str = "[REDACTED]";
/// Replacement for private blocks.
const PRIVATE: &str = "[PRIVATE]";

/// Input delivered by the host for one finished tool call.
#[derive(Debug, Clone)]
pub struct ToolCapture {
    pub session_id: String,
    pub tool_name: String,
    pub call_id: String,
    pub output: String,
}

/// onToolAfter: capture one tool output into the pending queue.
///
/// Gates first (ignored tools, minimum output length), then redacts, then
/// ensures the session row exists, then enqueues. Never throws; failures
/// log to stderr and the hook returns.
pub async fn on_tool_after(engine: &Arc<Engine>, capture: ToolCapture) {
    let _timer = HookTimer::start("onToolAfter");

    if engine
        .settings
        .ignored_tools
        .iter()
        .any(|t| t == &capture.tool_name)
    {
        tracing::debug!("ignoring tool {}", capture.tool_name);
        return;
    }
    if (capture.output.len() as i64) < engine.settings.min_output_length.max(0) {
        tracing::debug!(
            "output below minimum length ({} < {})",
            capture.output.len(),
            engine.settings.min_output_length
        );
        return;
    }

    let sanitized = redact(&capture.output, &engine.redaction_patterns);

    let project_path = engine.settings.project_root.to_string_lossy().to_string();
    let session_id = capture.session_id.clone();
    let tool_name = capture.tool_name.clone();
    let call_id = capture.call_id.clone();

    let result = engine
        .pool
        .run_with_retry(move |conn| {
            crate::db::get_or_create_session_sync(conn, &session_id, &project_path)?;
            crate::db::enqueue_pending_sync(conn, &session_id, &tool_name, &sanitized, &call_id)?;
            Ok::<_, rusqlite::Error>(())
        })
        .await;

    if let Err(e) = result {
        swallow_hook_error("onToolAfter", e);
    }
}

/// Apply sensitive-pattern redaction and strip private blocks.
///
/// Every regex match becomes `[REDACTED]`; every `<private>…</private>`
/// block (any newlines inside) becomes `[PRIVATE]`. The private sweep
/// runs last so patterns cannot resurrect stripped content.
pub fn redact(output: &str, patterns: &[regex::Regex]) -> String {
    let mut sanitized = output.to_string();
    for pattern in patterns {
        sanitized = pattern.replace_all(&sanitized, REDACTED).into_owned();
    }
    PRIVATE_BLOCK.replace_all(&sanitized, PRIVATE).into_owned()
}
