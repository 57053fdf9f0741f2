// crates/open-mem-server/src/processor/summarize.rs
// Session summarization: one summary per session, written at completion

use std::sync::Arc;

use open_mem_types::{Observation, SessionSummary};

use crate::db::pool::DatabasePool;
use crate::llm::LanguageModel;
use crate::utils::{CancelToken, estimate_tokens, new_id, now_rfc3339};

/// Summarize a session from its current observations and persist the
/// result.
///
/// Returns the summary id on success, None when there was nothing to
/// summarize or no model is configured. An existing summary is replaced
/// only when the summarization call succeeds; on failure the old summary
/// stays and the error propagates to the caller.
pub async fn summarize_session(
    pool: &Arc<DatabasePool>,
    model: Option<&Arc<dyn LanguageModel>>,
    session_id: &str,
    cancel: &CancelToken,
) -> anyhow::Result<Option<String>> {
    let Some(model) = model else {
        return Ok(None);
    };

    let sid = session_id.to_string();
    let observations: Vec<Observation> = pool
        .interact_raw(move |conn| crate::db::list_session_observations_sync(conn, &sid))
        .await?;
    if observations.is_empty() {
        tracing::debug!("session {session_id} has no observations to summarize");
        return Ok(None);
    }

    let digests: Vec<String> = observations.iter().map(observation_digest).collect();
    let fields = model.summarize(&digests, cancel).await?;

    let files_modified = if fields.files_modified.is_empty() {
        collect_files(&observations)
    } else {
        fields.files_modified
    };

    let summary = SessionSummary {
        id: new_id(),
        session_id: session_id.to_string(),
        summary: fields.summary,
        key_decisions: fields.key_decisions,
        files_modified,
        concepts: fields.concepts,
        created_at: now_rfc3339(),
        token_count: 0,
        request: fields.request,
        investigated: fields.investigated,
        learned: fields.learned,
        completed: fields.completed,
        next_steps: fields.next_steps,
    };
    let summary = SessionSummary {
        token_count: estimate_tokens(&summary.summary)
            + estimate_tokens(&summary.key_decisions.join(" ")),
        ..summary
    };

    let summary_id = summary.id.clone();
    let sid = session_id.to_string();
    let stored_id = summary_id.clone();
    pool.interact_raw(move |conn| {
        crate::db::upsert_summary_sync(conn, &summary)?;
        conn.execute(
            "UPDATE sessions SET summary_id = ?1 WHERE id = ?2",
            rusqlite::params![stored_id, sid],
        )?;
        Ok(())
    })
    .await?;

    Ok(Some(summary_id))
}

/// One-line digest of an observation for the summarization prompt.
fn observation_digest(obs: &Observation) -> String {
    let mut digest = format!("[{}] {}", obs.kind, obs.title);
    if !obs.narrative.is_empty() {
        digest.push_str(" - ");
        digest.push_str(&obs.narrative);
    }
    if !obs.files_modified.is_empty() {
        digest.push_str(&format!(" (modified: {})", obs.files_modified.join(", ")));
    }
    digest
}

/// Distinct modified files across the session, in first-seen order.
fn collect_files(observations: &[Observation]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut files = Vec::new();
    for obs in observations {
        for file in &obs.files_modified {
            if seen.insert(file.clone()) {
                files.push(file.clone());
            }
        }
    }
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use open_mem_types::ObservationType;

    fn obs(title: &str, files: &[&str]) -> Observation {
        Observation {
            id: crate::utils::new_id(),
            session_id: "s1".into(),
            kind: ObservationType::Bugfix,
            title: title.into(),
            subtitle: String::new(),
            facts: vec![],
            narrative: "details".into(),
            concepts: vec![],
            files_read: vec![],
            files_modified: files.iter().map(|s| s.to_string()).collect(),
            raw_tool_output: String::new(),
            tool_name: "Edit".into(),
            created_at: now_rfc3339(),
            token_count: 10,
            discovery_tokens: 100,
            importance: 3,
            superseded_by: None,
            superseded_at: None,
            deleted_at: None,
        }
    }

    #[test]
    fn digest_carries_type_title_and_files() {
        let digest = observation_digest(&obs("Fixed the race", &["src/a.rs"]));
        assert!(digest.contains("[bugfix]"));
        assert!(digest.contains("Fixed the race"));
        assert!(digest.contains("src/a.rs"));
    }

    #[test]
    fn collect_files_dedupes_in_order() {
        let observations = vec![
            obs("one", &["a.rs", "b.rs"]),
            obs("two", &["b.rs", "c.rs"]),
        ];
        assert_eq!(collect_files(&observations), vec!["a.rs", "b.rs", "c.rs"]);
    }
}
