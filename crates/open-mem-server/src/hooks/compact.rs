// crates/open-mem-server/src/hooks/compact.rs
// Session-compaction hook: the enhanced half-budget variant with more
// full observations, rendered as plain text

use std::sync::Arc;

use crate::context::format_plain;
use crate::engine::Engine;
use crate::hooks::HookTimer;
use crate::hooks::inject::gather_project_context;

/// onSessionCompacting: a condensed memory block for the host's
/// compaction flow. Half the injection budget, twice the full-observation
/// count, plain-text bullets. Returns None when there is nothing to add.
pub async fn on_session_compacting(engine: &Arc<Engine>, session_id: &str) -> Option<String> {
    let _timer = HookTimer::start("onSessionCompacting");

    if !engine.settings.context_injection_enabled {
        return None;
    }

    let budget = (engine.settings.max_context_tokens / 2) as i64;
    let full_count = engine.settings.context_full_observation_count * 2;
    let context = gather_project_context(engine, Some(session_id), budget, full_count).await;

    let text = format_plain(&context);
    if text.is_empty() { None } else { Some(text) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::db::test_support::{sample_observation, setup_test_pool};

    #[tokio::test]
    async fn compaction_renders_plain_bullets() {
        let pool = setup_test_pool().await;
        pool.interact_raw(|conn| {
            crate::db::test_support::seed_session(conn, "s1", "/proj");
            crate::db::create_observation_sync(
                conn,
                &sample_observation("o1", "s1", "Queue claim is transactional"),
            )
        })
        .await
        .unwrap();
        let settings = Settings::defaults(std::path::Path::new("/proj"));
        let engine = Engine::for_tests(pool, settings, None, None);

        let text = on_session_compacting(&engine, "s1").await.unwrap();
        assert!(text.contains("Queue claim is transactional"));
        assert!(text.starts_with("Memory highlights:"));
    }

    #[tokio::test]
    async fn empty_store_compacts_to_nothing() {
        let settings = Settings::defaults(std::path::Path::new("/proj"));
        let engine = Engine::for_tests(setup_test_pool().await, settings, None, None);
        assert!(on_session_compacting(&engine, "s1").await.is_none());
    }
}
