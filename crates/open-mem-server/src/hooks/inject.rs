// crates/open-mem-server/src/hooks/inject.rs
// Context-injection hook: assemble and format the memory block appended
// to the host's system prompt

use std::sync::Arc;

use open_mem_types::{Observation, ObservationType, SessionSummary};

use crate::context::{
    FormatOptions, ProgressiveContext, ScoringContext, build_progressive_context, format_markdown,
};
use crate::engine::Engine;
use crate::hooks::{HookTimer, swallow_hook_error};

/// Recent summaries considered for the context window.
const SUMMARY_CANDIDATES: usize = 5;

/// onSystemTransform: produce the markdown block to append, or None when
/// injection is disabled or there is nothing to say. Never throws.
pub async fn on_system_transform(engine: &Arc<Engine>, session_id: Option<&str>) -> Option<String> {
    let _timer = HookTimer::start("onSystemTransform");

    if !engine.settings.context_injection_enabled {
        return None;
    }

    let context = gather_project_context(
        engine,
        session_id,
        engine.settings.max_context_tokens as i64,
        engine.settings.context_full_observation_count,
    )
    .await;

    let options = FormatOptions {
        show_token_costs: engine.settings.context_show_token_costs,
        show_economics: engine.settings.context_show_token_costs,
    };
    let mut block = format_markdown(&context, &options);

    // User scope renders under its own budget; it never eats into the
    // project allocation above.
    if engine.settings.user_memory_enabled {
        let user_section = gather_user_section(engine).await;
        if !user_section.is_empty() {
            if block.is_empty() {
                block = user_section;
            } else {
                block.push('\n');
                block.push_str(&user_section);
            }
        }
    }

    if block.is_empty() { None } else { Some(block) }
}

/// Collect summaries and index candidates and run the budgeted assembly.
pub async fn gather_project_context(
    engine: &Arc<Engine>,
    session_id: Option<&str>,
    budget: i64,
    full_count: usize,
) -> ProgressiveContext {
    let include_summaries = engine.settings.context_show_last_summary;
    let types: Vec<ObservationType> = engine
        .settings
        .context_observation_types
        .iter()
        .map(|t| ObservationType::from_str_lossy(t))
        .collect();
    let candidate_limit = engine.settings.max_observations;

    let rows: Option<(Vec<SessionSummary>, Vec<Observation>)> = engine
        .pool
        .try_interact("gather context", move |conn| {
            let summaries = if include_summaries {
                crate::db::list_recent_summaries_sync(conn, SUMMARY_CANDIDATES)?
            } else {
                Vec::new()
            };
            let observations =
                crate::db::list_recent_observations_sync(conn, candidate_limit, &types)?;
            Ok((summaries, observations))
        })
        .await;

    let Some((summaries, observations)) = rows else {
        swallow_hook_error("onSystemTransform", "context query failed");
        return ProgressiveContext::default();
    };

    let scoring = ScoringContext::new(session_id.map(String::from));
    build_progressive_context(
        &summaries,
        &observations,
        Some(&scoring),
        budget,
        engine.settings.max_index_entries,
        full_count,
    )
}

/// Render the user-scope section under `user_memory_max_context_tokens`.
async fn gather_user_section(engine: &Arc<Engine>) -> String {
    let Some(ref user_pool) = engine.user_pool else {
        return String::new();
    };

    let rows = user_pool
        .try_interact("gather user context", |conn| {
            crate::db::list_recent_user_observations_sync(conn, 50).map_err(Into::into)
        })
        .await
        .unwrap_or_default();
    if rows.is_empty() {
        return String::new();
    }

    let budget = engine.settings.user_memory_max_context_tokens as i64;
    let mut out = String::from("### User Memory (cross-project)\n\n");
    let mut spent = 0i64;
    let mut wrote = false;
    for obs in rows {
        if spent + obs.token_count > budget {
            break;
        }
        spent += obs.token_count;
        wrote = true;
        out.push_str(&format!(
            "- {} {}: {}\n",
            obs.kind.icon(),
            obs.title,
            crate::utils::truncate(&obs.narrative, 100)
        ));
    }
    if wrote { out } else { String::new() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::db::test_support::{sample_observation, sample_summary, setup_test_pool};

    async fn seeded_engine(mut settings: Settings) -> Arc<Engine> {
        settings.min_output_length = 0;
        let pool = setup_test_pool().await;
        pool.interact_raw(|conn| {
            crate::db::test_support::seed_session(conn, "s1", "/proj");
            crate::db::create_observation_sync(
                conn,
                &sample_observation("o1", "s1", "Learned the pool sizing"),
            )?;
            crate::db::upsert_summary_sync(conn, &sample_summary("sum1", "s1"))?;
            Ok(())
        })
        .await
        .unwrap();
        Engine::for_tests(pool, settings, None, None)
    }

    #[tokio::test]
    async fn injection_disabled_is_a_noop() {
        let mut settings = Settings::defaults(std::path::Path::new("/proj"));
        settings.context_injection_enabled = false;
        let engine = seeded_engine(settings).await;
        assert!(on_system_transform(&engine, Some("s1")).await.is_none());
    }

    #[tokio::test]
    async fn empty_store_injects_nothing() {
        let settings = Settings::defaults(std::path::Path::new("/proj"));
        let engine = Engine::for_tests(setup_test_pool().await, settings, None, None);
        assert!(on_system_transform(&engine, Some("s1")).await.is_none());
    }

    #[tokio::test]
    async fn seeded_store_injects_markdown_block() {
        let settings = Settings::defaults(std::path::Path::new("/proj"));
        let engine = seeded_engine(settings).await;
        let block = on_system_transform(&engine, Some("s1")).await.unwrap();
        assert!(block.contains("Progressive Disclosure"));
        assert!(block.contains("worked on things"));
    }

    #[tokio::test]
    async fn summaries_can_be_suppressed() {
        let mut settings = Settings::defaults(std::path::Path::new("/proj"));
        settings.context_show_last_summary = false;
        let engine = seeded_engine(settings).await;
        let context = gather_project_context(&engine, Some("s1"), 2000, 3).await;
        assert!(context.recent_summaries.is_empty());
        assert!(!context.observation_index.is_empty());
    }

    #[tokio::test]
    async fn type_filter_constrains_index() {
        let mut settings = Settings::defaults(std::path::Path::new("/proj"));
        settings.context_observation_types = vec!["decision".into()];
        let engine = seeded_engine(settings).await;
        let context = gather_project_context(&engine, Some("s1"), 2000, 3).await;
        // Seeded observation is a discovery; the filter excludes it
        assert!(context.observation_index.is_empty());
    }
}
