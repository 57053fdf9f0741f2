//! End-to-end pipeline tests: capture → queue → compress → persist →
//! retrieve, plus export round-trips and degradation behavior.

mod test_utils;

use open_mem::context::build_progressive_context;
use open_mem::db::FtsFilters;
use open_mem::hooks::capture::{ToolCapture, on_tool_after};
use open_mem::search::{Scope, SearchRequest};
use open_mem::tools;
use open_mem::utils::CancelToken;
use open_mem_types::{ObservationType, PendingStatus};
use serde_json::json;
use test_utils::{MarkerEmbeddings, StubModel, engine_over, test_engine, test_settings};

fn capture(session: &str, tool: &str, output: &str) -> ToolCapture {
    ToolCapture {
        session_id: session.to_string(),
        tool_name: tool.to_string(),
        call_id: format!("call-{tool}"),
        output: output.to_string(),
    }
}

async fn pending_count(
    engine: &std::sync::Arc<open_mem::engine::Engine>,
    status: PendingStatus,
) -> i64 {
    engine
        .pool
        .interact_raw(move |conn| open_mem::db::count_pending_by_status_sync(conn, status))
        .await
        .unwrap()
}

// ── Scenario 1: capture and compress ────────────────────────────────────

#[tokio::test]
async fn capture_and_compress_produces_searchable_observation() {
    let stub = StubModel::returning(ObservationType::Discovery, "T");
    let engine = test_engine(test_settings(), Some(stub.clone()), None).await;

    on_tool_after(&engine, capture("s1", "Read", &"x".repeat(500))).await;
    assert_eq!(pending_count(&engine, PendingStatus::Pending).await, 1);

    let processed = engine
        .processor
        .process_batch(&CancelToken::new())
        .await
        .unwrap();
    assert_eq!(processed, 1);
    assert_eq!(stub.call_count(), 1);
    assert_eq!(pending_count(&engine, PendingStatus::Completed).await, 1);

    // Exactly one observation with the compressed shape
    let observations = engine
        .pool
        .interact_raw(|conn| open_mem::db::list_session_observations_sync(conn, "s1"))
        .await
        .unwrap();
    assert_eq!(observations.len(), 1);
    assert_eq!(observations[0].kind, ObservationType::Discovery);
    assert_eq!(observations[0].title, "T");
    assert_eq!(observations[0].tool_name, "Read");

    // Session counter advanced
    let session = engine
        .pool
        .interact_raw(|conn| Ok(open_mem::db::get_session_sync(conn, "s1")))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.observation_count, 1);

    // FTS finds it by title
    let hits = engine
        .pool
        .interact_raw(|conn| {
            open_mem::db::fts_search_sync(conn, "T", &FtsFilters::default(), 10)
        })
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].observation.title, "T");
}

// ── Scenario 2: export / import round trip ──────────────────────────────

#[tokio::test]
async fn export_import_round_trip_is_idempotent() {
    let engine = test_engine(test_settings(), None, None).await;

    // Seed three observations and one summary through the tool surface
    for title in ["alpha finding", "beta finding", "gamma finding"] {
        let response = tools::dispatch(
            &engine,
            "mem-create",
            json!({"title": title, "narrative": "seeded", "sessionId": "s1"}),
            &CancelToken::new(),
        )
        .await;
        assert_eq!(response["ok"], true);
    }
    engine
        .pool
        .interact_raw(|conn| {
            open_mem::db::upsert_summary_sync(
                conn,
                &open_mem_types::SessionSummary {
                    id: "sum1".into(),
                    session_id: "s1".into(),
                    summary: "seeded summary".into(),
                    key_decisions: vec![],
                    files_modified: vec![],
                    concepts: vec![],
                    created_at: "2026-01-01T00:00:00Z".into(),
                    token_count: 20,
                    request: None,
                    investigated: None,
                    learned: None,
                    completed: None,
                    next_steps: None,
                },
            )
        })
        .await
        .unwrap();

    let exported = tools::dispatch(&engine, "mem-export", json!({}), &CancelToken::new()).await;
    assert_eq!(exported["ok"], true);
    let envelope_json = serde_json::to_string(&exported["data"]).unwrap();

    // Fresh database, default (skip-duplicates) import
    let fresh = test_engine(test_settings(), None, None).await;
    let envelope: serde_json::Value = serde_json::from_str(&envelope_json).unwrap();
    let first = tools::dispatch(
        &fresh,
        "mem-import",
        json!({"data": envelope.clone()}),
        &CancelToken::new(),
    )
    .await;
    assert_eq!(first["ok"], true);
    assert_eq!(first["data"]["imported"], 3);
    assert_eq!(first["data"]["summariesImported"], 1);

    // Re-export and deep-compare modulo exportedAt
    let second_export =
        tools::dispatch(&fresh, "mem-export", json!({}), &CancelToken::new()).await;
    assert_eq!(
        exported["data"]["observations"],
        second_export["data"]["observations"]
    );
    assert_eq!(
        exported["data"]["summaries"],
        second_export["data"]["summaries"]
    );

    // Second import of the same payload changes nothing
    let second = tools::dispatch(
        &fresh,
        "mem-import",
        json!({"data": envelope}),
        &CancelToken::new(),
    )
    .await;
    assert_eq!(second["data"]["imported"], 0);
    assert_eq!(second["data"]["skipped"], 3);
}

// ── Scenario 3: hybrid retrieval ────────────────────────────────────────

#[tokio::test]
async fn hybrid_search_fuses_keyword_and_vector_hits() {
    let embedder = MarkerEmbeddings::new("quorum");
    let engine = test_engine(test_settings(), None, Some(embedder)).await;

    // Ten observations; #3 is the FTS best match for "quorum" (title),
    // #7 is the vector nearest neighbor (embedding marker, no text match)
    engine
        .pool
        .interact_raw(|conn| {
            open_mem::db::get_or_create_session_sync(conn, "s1", "/proj")?;
            for i in 1..=10 {
                let title = match i {
                    3 => "quorum handling rewritten".to_string(),
                    _ => format!("unrelated topic number {i}"),
                };
                let obs = open_mem_types::Observation {
                    id: format!("o{i}"),
                    session_id: "s1".into(),
                    kind: ObservationType::Discovery,
                    title,
                    subtitle: String::new(),
                    facts: vec![],
                    narrative: "body".into(),
                    concepts: vec![],
                    files_read: vec![],
                    files_modified: vec![],
                    raw_tool_output: String::new(),
                    tool_name: "Read".into(),
                    created_at: format!("2026-01-{:02}T00:00:00Z", i + 10),
                    token_count: 10,
                    discovery_tokens: 100,
                    importance: 3,
                    superseded_by: None,
                    superseded_at: None,
                    deleted_at: None,
                };
                open_mem::db::create_observation_sync(conn, &obs)?;
                // Only #7 carries the marker vector
                let embedding = if i == 7 {
                    vec![1.0f32, 0.0]
                } else {
                    vec![0.0f32, 1.0]
                };
                open_mem::db::store_observation_embedding_sync(
                    conn,
                    &format!("o{i}"),
                    &embedding,
                    false,
                )?;
            }
            Ok(())
        })
        .await
        .unwrap();

    let request = SearchRequest {
        query: "quorum".into(),
        filters: FtsFilters::default(),
        limit: 5,
        scope: Scope::Project,
        prefer_semantic: false,
    };
    let hits = engine
        .search_engine()
        .search(&request, &CancelToken::new())
        .await;

    let ids: Vec<&str> = hits.iter().map(|h| h.observation.id.as_str()).collect();
    let pos3 = ids.iter().position(|id| *id == "o3");
    let pos7 = ids.iter().position(|id| *id == "o7");
    assert!(pos3.is_some(), "FTS hit must be in the top 5: {ids:?}");
    assert!(pos7.is_some(), "vector hit must be in the top 5: {ids:?}");
    assert!(pos3 < pos7, "keyword winner precedes vector winner on RRF tie");
}

// ── Scenario 4: context budget ──────────────────────────────────────────

#[tokio::test]
async fn context_budget_80_admits_one_summary_only() {
    let summaries = vec![open_mem_types::SessionSummary {
        id: "sum".into(),
        session_id: "s1".into(),
        summary: "the only summary".into(),
        key_decisions: vec![],
        files_modified: vec![],
        concepts: vec![],
        created_at: "2026-01-02T00:00:00Z".into(),
        token_count: 60,
        request: None,
        investigated: None,
        learned: None,
        completed: None,
        next_steps: None,
    }];
    let observations: Vec<open_mem_types::Observation> = (0..2)
        .map(|i| open_mem_types::Observation {
            id: format!("o{i}"),
            session_id: "s1".into(),
            kind: ObservationType::Discovery,
            title: format!("entry {i}"),
            subtitle: String::new(),
            facts: vec![],
            narrative: "n".into(),
            concepts: vec![],
            files_read: vec![],
            files_modified: vec![],
            raw_tool_output: String::new(),
            tool_name: "Read".into(),
            created_at: "2026-01-01T00:00:00Z".into(),
            token_count: 30,
            discovery_tokens: 0,
            importance: 3,
            superseded_by: None,
            superseded_at: None,
            deleted_at: None,
        })
        .collect();

    let context = build_progressive_context(&summaries, &observations, None, 80, 50, 3);
    assert_eq!(context.recent_summaries.len(), 1);
    assert!(context.observation_index.is_empty());
    assert!(context.full_observations.is_empty());
    assert_eq!(context.total_tokens, 60);
}

// ── Scenario 5: redaction ───────────────────────────────────────────────

#[tokio::test]
async fn redaction_survives_the_full_pipeline() {
    let mut settings = test_settings();
    settings.sensitive_patterns = vec!["sk-[A-Za-z0-9]+".into()];
    let stub = StubModel::returning(ObservationType::Discovery, "captured");
    let engine = test_engine(settings, Some(stub), None).await;

    on_tool_after(
        &engine,
        capture(
            "s1",
            "Bash",
            "api=sk-ABC123 visible <private>secret</private> tail",
        ),
    )
    .await;
    engine
        .processor
        .process_batch(&CancelToken::new())
        .await
        .unwrap();

    let observations = engine
        .pool
        .interact_raw(|conn| open_mem::db::list_session_observations_sync(conn, "s1"))
        .await
        .unwrap();
    let raw = &observations[0].raw_tool_output;
    assert!(raw.contains("[REDACTED]"));
    assert!(raw.contains("[PRIVATE]"));
    assert!(!raw.contains("sk-ABC123"));
    assert!(!raw.contains("secret"));
    assert!(raw.contains("visible"));
}

// ── Scenario 6: graceful degradation ────────────────────────────────────

#[tokio::test]
async fn capture_survives_provider_outage_and_drains_on_recovery() {
    // No API key, no provider: capture still works
    let engine = test_engine(test_settings(), None, None).await;
    for i in 0..3 {
        on_tool_after(&engine, capture("s1", "Read", &format!("output {i} content"))).await;
    }

    // A batch without a provider claims nothing
    let processed = engine
        .processor
        .process_batch(&CancelToken::new())
        .await
        .unwrap();
    assert_eq!(processed, 0);
    assert_eq!(pending_count(&engine, PendingStatus::Pending).await, 3);

    // Provider appears: same pool, new processor
    let stub = StubModel::returning(ObservationType::Change, "recovered");
    let recovered = engine_over(
        engine.pool.clone(),
        test_settings(),
        Some(stub),
        None,
    );
    let processed = recovered
        .processor
        .process_batch(&CancelToken::new())
        .await
        .unwrap();
    assert_eq!(processed, 3);
    assert_eq!(pending_count(&recovered, PendingStatus::Completed).await, 3);

    let observations = recovered
        .pool
        .interact_raw(|conn| open_mem::db::list_session_observations_sync(conn, "s1"))
        .await
        .unwrap();
    assert_eq!(observations.len(), 3);
}

// ── Failure accounting ──────────────────────────────────────────────────

#[tokio::test]
async fn failed_compressions_mark_rows_failed_with_retry_count() {
    let engine = test_engine(test_settings(), Some(StubModel::failing()), None).await;
    on_tool_after(&engine, capture("s1", "Read", "will fail to compress")).await;

    let processed = engine
        .processor
        .process_batch(&CancelToken::new())
        .await
        .unwrap();
    assert_eq!(processed, 0);
    assert_eq!(pending_count(&engine, PendingStatus::Failed).await, 1);

    let (retry_count, error): (i64, Option<String>) = engine
        .pool
        .interact_raw(|conn| {
            conn.query_row(
                "SELECT retry_count, error FROM pending_messages",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
        })
        .await
        .unwrap();
    assert_eq!(retry_count, 1);
    assert!(error.unwrap().contains("stub compression failure"));
}

#[tokio::test]
async fn concurrent_process_batch_is_a_noop_for_the_loser() {
    let stub = StubModel::returning(ObservationType::Discovery, "only once");
    let engine = test_engine(test_settings(), Some(stub.clone()), None).await;
    for i in 0..4 {
        on_tool_after(&engine, capture("s1", "Read", &format!("payload {i}"))).await;
    }

    let a = engine.processor.clone();
    let b = engine.processor.clone();
    let token_a = CancelToken::new();
    let token_b = CancelToken::new();
    let (ra, rb) = tokio::join!(a.process_batch(&token_a), b.process_batch(&token_b));
    let total = ra.unwrap() + rb.unwrap();

    // The reentrancy flag lets at most one batch run; nothing processed
    // twice either way
    assert!(total <= 4);
    let observations = engine
        .pool
        .interact_raw(|conn| open_mem::db::list_session_observations_sync(conn, "s1"))
        .await
        .unwrap();
    assert_eq!(observations.len(), total);
    assert_eq!(stub.call_count(), total);
}
