// crates/open-mem-server/src/tools/mod.rs
// The mem-* tool surface: one deserialize → validate → dispatch pipe
// returning `{ok:true, data}` / `{ok:false, code, message}` envelopes

mod args;

pub use args::ToolCall;

use std::sync::Arc;

use open_mem_types::{Observation, ObservationType};
use serde_json::{Value, json};

use crate::db::{FtsFilters, ImportMode};
use crate::engine::Engine;
use crate::error::MemError;
use crate::maintenance::folder_context;
use crate::search::{Scope, SearchRequest};
use crate::utils::{CancelToken, estimate_tokens, new_id, now_rfc3339};

/// Session that owns observations created by hand through mem-create.
const MANUAL_SESSION_ID: &str = "manual";

/// Run one tool call end-to-end and produce the response envelope.
/// This layer never panics and never returns a bare error: everything
/// maps into `{ok:false, code, message}`.
pub async fn dispatch(
    engine: &Arc<Engine>,
    tool: &str,
    args: Value,
    cancel: &CancelToken,
) -> Value {
    let call = match ToolCall::parse(tool, args) {
        Ok(call) => call,
        Err(e) => return error_envelope(&e),
    };

    let result = match call {
        ToolCall::Find(args) => find(engine, args, cancel).await,
        ToolCall::History(args) => history(engine, args).await,
        ToolCall::Get(args) => get(engine, args).await,
        ToolCall::Create(args) => create(engine, args).await,
        ToolCall::Revise(args) => revise(engine, args).await,
        ToolCall::Remove(args) => remove(engine, args).await,
        ToolCall::Export(args) => export(engine, args).await,
        ToolCall::Import(args) => import(engine, args).await,
        ToolCall::Maintenance(args) => maintenance(engine, args).await,
        ToolCall::Help => Ok(help_text()),
    };

    match result {
        Ok(data) => json!({"ok": true, "data": data}),
        Err(e) => error_envelope(&e),
    }
}

fn error_envelope(error: &MemError) -> Value {
    json!({
        "ok": false,
        "code": error.tool_code(),
        "message": error.to_string(),
    })
}

async fn find(
    engine: &Arc<Engine>,
    args: args::FindArgs,
    cancel: &CancelToken,
) -> Result<Value, MemError> {
    let request = SearchRequest {
        query: args.query,
        filters: FtsFilters {
            types: args
                .types
                .iter()
                .map(|t| ObservationType::from_str_lossy(t))
                .collect(),
            concepts: args.concepts,
            files: args.files,
            ..Default::default()
        },
        limit: args.limit,
        scope: Scope::from_str_lossy(&args.scope),
        prefer_semantic: args.semantic,
    };
    let hits = engine.search_engine().search(&request, cancel).await;
    Ok(json!({
        "results": hits.iter().map(|hit| json!({
            "id": hit.observation.id,
            "type": hit.observation.kind,
            "title": hit.observation.title,
            "subtitle": hit.observation.subtitle,
            "snippet": hit.snippet,
            "rank": hit.rank,
            "matchedBy": hit.matched_by,
            "source": hit.source,
            "createdAt": hit.observation.created_at,
        })).collect::<Vec<_>>(),
        "count": hits.len(),
    }))
}

async fn history(engine: &Arc<Engine>, args: args::HistoryArgs) -> Result<Value, MemError> {
    let timeline = engine
        .pool
        .run(move |conn| {
            crate::db::observation_timeline_sync(
                conn,
                args.session_id.as_deref(),
                args.anchor.as_deref(),
                args.depth_before,
                args.depth_after,
                args.limit,
            )
        })
        .await?;
    Ok(json!({
        "timeline": timeline.iter().map(index_entry).collect::<Vec<_>>(),
        "count": timeline.len(),
    }))
}

async fn get(engine: &Arc<Engine>, args: args::GetArgs) -> Result<Value, MemError> {
    let ids: Vec<String> = args.ids.into_iter().take(args.limit).collect();
    let requested = ids.len();
    let observations = engine
        .pool
        .run(move |conn| {
            Ok::<_, rusqlite::Error>(crate::db::get_observations_by_ids_sync(conn, &ids))
        })
        .await?;
    if observations.is_empty() {
        return Err(MemError::NotFound(format!(
            "none of the {requested} requested observations exist"
        )));
    }
    Ok(json!({"observations": observations}))
}

async fn create(engine: &Arc<Engine>, args: args::CreateArgs) -> Result<Value, MemError> {
    let session_id = args
        .session_id
        .unwrap_or_else(|| MANUAL_SESSION_ID.to_string());
    let body = format!("{} {}", args.title, args.narrative);
    let observation = Observation {
        id: new_id(),
        session_id: session_id.clone(),
        kind: ObservationType::from_str_lossy(args.kind.as_deref().unwrap_or("discovery")),
        title: args.title,
        subtitle: args.subtitle.unwrap_or_default(),
        facts: args.facts,
        narrative: args.narrative,
        concepts: args.concepts,
        files_read: args.files_read,
        files_modified: args.files_modified,
        raw_tool_output: String::new(),
        tool_name: "mem-create".to_string(),
        created_at: now_rfc3339(),
        token_count: estimate_tokens(&body),
        // Manual rows have no raw output: 0 marks savings as unknown
        discovery_tokens: 0,
        importance: args.importance.unwrap_or(3),
        superseded_by: None,
        superseded_at: None,
        deleted_at: None,
    };

    let project_path = engine.settings.project_root.to_string_lossy().to_string();
    let id = observation.id.clone();
    let extract = engine.settings.entity_extraction_enabled;
    engine
        .pool
        .run(move |conn| {
            crate::db::get_or_create_session_sync(conn, &session_id, &project_path)?;
            crate::db::create_observation_sync(conn, &observation)?;
            if extract {
                crate::db::extract_entities_for_observation_sync(conn, &observation)?;
            }
            Ok::<_, rusqlite::Error>(())
        })
        .await?;

    Ok(json!({"id": id}))
}

async fn revise(engine: &Arc<Engine>, args: args::ReviseArgs) -> Result<Value, MemError> {
    let original_id = args.id.clone();
    let original = engine
        .pool
        .run(move |conn| {
            Ok::<_, rusqlite::Error>(crate::db::get_observation_sync(conn, &original_id))
        })
        .await?
        .ok_or_else(|| MemError::NotFound(format!("observation {} not found", args.id)))?;
    if !original.is_current() {
        return Err(MemError::Conflict(format!(
            "observation {} is already superseded or removed",
            args.id
        )));
    }

    let revised = Observation {
        id: new_id(),
        created_at: now_rfc3339(),
        kind: args
            .kind
            .map(|k| ObservationType::from_str_lossy(&k))
            .unwrap_or(original.kind),
        title: args.title.unwrap_or_else(|| original.title.clone()),
        narrative: args.narrative.unwrap_or_else(|| original.narrative.clone()),
        subtitle: args.subtitle.unwrap_or_else(|| original.subtitle.clone()),
        facts: args.facts.unwrap_or_else(|| original.facts.clone()),
        concepts: args.concepts.unwrap_or_else(|| original.concepts.clone()),
        importance: args.importance.unwrap_or(original.importance),
        superseded_by: None,
        superseded_at: None,
        deleted_at: None,
        ..original.clone()
    };

    let old_id = args.id.clone();
    let revised_id = revised.id.clone();
    let superseded = engine
        .pool
        .run(move |conn| {
            crate::db::create_observation_sync(conn, &revised)?;
            crate::db::supersede_observation_sync(conn, &old_id, &revised.id)
        })
        .await?;
    if !superseded {
        return Err(MemError::Conflict(format!(
            "failed to supersede observation {}",
            args.id
        )));
    }

    Ok(json!({"id": revised_id, "supersedes": args.id}))
}

async fn remove(engine: &Arc<Engine>, args: args::RemoveArgs) -> Result<Value, MemError> {
    let id = args.id.clone();
    let removed = engine
        .pool
        .run(move |conn| crate::db::tombstone_observation_sync(conn, &id))
        .await?;
    if !removed {
        return Err(MemError::NotFound(format!(
            "observation {} not found or already removed",
            args.id
        )));
    }
    Ok(json!({"removed": args.id}))
}

async fn export(engine: &Arc<Engine>, args: args::ExportArgs) -> Result<Value, MemError> {
    let project = engine.settings.project_root.to_string_lossy().to_string();
    let envelope = engine
        .pool
        .run(move |conn| crate::db::export_envelope_sync(conn, &project, args.include_raw))
        .await?;
    serde_json::to_value(&envelope).map_err(Into::into)
}

async fn import(engine: &Arc<Engine>, args: args::ImportArgs) -> Result<Value, MemError> {
    let envelope: open_mem_types::ExportEnvelope = serde_json::from_value(args.data)
        .map_err(|e| MemError::Validation(format!("invalid export envelope: {e}")))?;
    let mode = if args.mode == "overwrite" {
        ImportMode::Overwrite
    } else {
        ImportMode::SkipDuplicates
    };
    let stats = engine
        .pool
        .run(move |conn| {
            crate::db::import_envelope_sync(conn, &envelope, mode).map_err(MemError::Anyhow)
        })
        .await?;
    serde_json::to_value(stats).map_err(Into::into)
}

async fn maintenance(
    engine: &Arc<Engine>,
    args: args::MaintenanceArgs,
) -> Result<Value, MemError> {
    let report = match args.action.as_str() {
        "folderContextDryRun" => folder_context::dry_run(engine).await,
        "folderContextClean" => folder_context::clean(engine).await,
        "folderContextPurge" => folder_context::purge(engine).await,
        "folderContextRebuild" => folder_context::rebuild(engine).await,
        // Parse already validated the action set
        other => return Err(MemError::Validation(format!("unknown action {other:?}"))),
    }
    .map_err(MemError::Anyhow)?;
    serde_json::to_value(report).map_err(Into::into)
}

fn index_entry(obs: &Observation) -> Value {
    json!({
        "id": obs.id,
        "type": obs.kind,
        "title": obs.title,
        "sessionId": obs.session_id,
        "createdAt": obs.created_at,
        "importance": obs.importance,
        "tokenCount": obs.token_count,
    })
}

fn help_text() -> Value {
    json!({
        "tools": {
            "mem-find": "Search memory. {query, types[], concepts[], files[], limit, scope: project|user|all, semantic}",
            "mem-history": "Timeline view. {limit, sessionId?, anchor?, depthBefore, depthAfter}",
            "mem-get": "Fetch full observations by id. {ids[], limit}",
            "mem-create": "Record an observation manually. {type?, title, narrative, subtitle?, facts[], concepts[], filesRead[], filesModified[], importance?, sessionId?}",
            "mem-revise": "Supersede an observation with corrected fields. {id, ...fields}",
            "mem-remove": "Tombstone an observation. {id}",
            "mem-export": "Export observations + summaries as JSON. {includeRaw}",
            "mem-import": "Import an exported envelope. {data, mode: skip-duplicates|overwrite}",
            "mem-maintenance": "Folder-context upkeep. {action: folderContextDryRun|folderContextClean|folderContextPurge|folderContextRebuild}",
            "mem-help": "This text."
        }
    })
}
