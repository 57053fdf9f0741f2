// crates/open-mem-server/src/processor/mod.rs
// Batch worker driving compression, persistence, and embedding backfill

mod summarize;

pub use summarize::summarize_session;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use open_mem_types::{Observation, PendingMessage};

use crate::config::{Mode, Settings};
use crate::db::pool::DatabasePool;
use crate::embeddings::EmbeddingModel;
use crate::llm::{CompressedObservation, LanguageModel};
use crate::utils::{CancelToken, estimate_tokens, new_id, now_rfc3339};

/// Observations embedded per backfill pass.
const EMBED_BACKFILL_LIMIT: usize = 32;

/// The per-project batch worker.
///
/// At most one `process_batch` runs per process: a reentrancy flag turns
/// concurrent callers into no-ops. All writes sequence through the pool;
/// AI calls may overlap only within a provider adapter.
pub struct Processor {
    pool: Arc<DatabasePool>,
    language_model: Option<Arc<dyn LanguageModel>>,
    embedding_model: Option<Arc<dyn EmbeddingModel>>,
    settings: Settings,
    mode: Mode,
    batch_in_flight: AtomicBool,
}

/// Flag reset on every exit path from `process_batch`.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Processor {
    pub fn new(
        pool: Arc<DatabasePool>,
        language_model: Option<Arc<dyn LanguageModel>>,
        embedding_model: Option<Arc<dyn EmbeddingModel>>,
        settings: Settings,
        mode: Mode,
    ) -> Self {
        Self {
            pool,
            language_model,
            embedding_model,
            settings,
            mode,
            batch_in_flight: AtomicBool::new(false),
        }
    }

    pub fn pool(&self) -> &Arc<DatabasePool> {
        &self.pool
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn language_model(&self) -> Option<&Arc<dyn LanguageModel>> {
        self.language_model.as_ref()
    }

    /// Drain one batch from the pending queue.
    ///
    /// Returns the number of observations persisted. Without a language
    /// model (or with compression disabled) nothing is claimed: captured
    /// rows stay `pending` and drain when a provider appears.
    pub async fn process_batch(&self, cancel: &CancelToken) -> anyhow::Result<usize> {
        if self
            .batch_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("process_batch already in flight, skipping");
            return Ok(0);
        }
        let _guard = InFlightGuard(&self.batch_in_flight);

        let Some(model) = self.language_model.clone() else {
            return Ok(0);
        };
        if !self.settings.compression_enabled {
            return Ok(0);
        }

        let batch_size = self.settings.batch_size;
        let batch: Vec<PendingMessage> = self
            .pool
            .interact_raw(move |conn| {
                crate::db::requeue_eligible_failed_sync(conn)?;
                let depth = crate::db::queue_depth_sync(conn)? as usize;
                crate::db::claim_batch_sync(conn, depth.min(batch_size))
            })
            .await?;

        if batch.is_empty() {
            return Ok(0);
        }
        tracing::debug!("processing batch of {}", batch.len());

        let mut persisted = 0;
        for message in batch {
            if cancel.is_cancelled() {
                let id = message.id.clone();
                self.pool
                    .try_interact("revert claimed row", move |conn| {
                        crate::db::revert_pending_sync(conn, &id).map_err(Into::into)
                    })
                    .await;
                continue;
            }

            match model
                .compress(
                    &message.tool_name,
                    &message.tool_output,
                    &self.mode.hints(),
                    cancel,
                )
                .await
            {
                Ok(compressed) => {
                    let observation = build_observation(&message, compressed);
                    let extract_entities = self.settings.entity_extraction_enabled;
                    let message_id = message.id.clone();
                    let result = self
                        .pool
                        .run_with_retry(move |conn| {
                            crate::db::create_observation_sync(conn, &observation)?;
                            if extract_entities {
                                crate::db::extract_entities_for_observation_sync(
                                    conn,
                                    &observation,
                                )?;
                            }
                            crate::db::mark_pending_completed_sync(conn, &message_id)?;
                            Ok::<_, rusqlite::Error>(())
                        })
                        .await;
                    match result {
                        Ok(()) => persisted += 1,
                        Err(e) => {
                            tracing::warn!("failed to persist observation: {e}");
                            let id = message.id.clone();
                            let error = e.to_string();
                            self.pool
                                .try_interact("mark pending failed", move |conn| {
                                    crate::db::mark_pending_failed_sync(conn, &id, &error)
                                        .map_err(Into::into)
                                })
                                .await;
                        }
                    }
                }
                Err(e) if cancel.is_cancelled() => {
                    // Abort is not a failure: the row goes back to pending
                    tracing::debug!("compression aborted: {e}");
                    let id = message.id.clone();
                    self.pool
                        .try_interact("revert claimed row", move |conn| {
                            crate::db::revert_pending_sync(conn, &id).map_err(Into::into)
                        })
                        .await;
                }
                Err(e) => {
                    tracing::warn!("compression failed for {}: {e}", message.tool_name);
                    let id = message.id.clone();
                    let error = e.to_string();
                    self.pool
                        .try_interact("mark pending failed", move |conn| {
                            crate::db::mark_pending_failed_sync(conn, &id, &error)
                                .map_err(Into::into)
                        })
                        .await;
                }
            }
        }

        // Embeddings are best-effort: a failed embed never fails the batch
        if persisted > 0 {
            self.backfill_embeddings(cancel).await;
        }

        Ok(persisted)
    }

    /// Drain the queue completely, pacing successive batches by
    /// `batch_interval_ms`. The idle-time kick uses this so a deep queue
    /// empties without hammering the provider.
    pub async fn drain(&self, cancel: &CancelToken) -> anyhow::Result<usize> {
        let mut total = 0;
        loop {
            let processed = self.process_batch(cancel).await?;
            total += processed;
            if processed == 0 || cancel.is_cancelled() {
                break;
            }
            let depth = self
                .pool
                .interact_raw(crate::db::queue_depth_sync)
                .await
                .unwrap_or(0);
            if depth == 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(
                self.settings.batch_interval_ms,
            ))
            .await;
        }
        Ok(total)
    }

    /// Generate embeddings for observations that are still missing one.
    /// Failures log and leave the rows for the next pass.
    pub async fn backfill_embeddings(&self, cancel: &CancelToken) {
        let Some(embedder) = self.embedding_model.clone() else {
            return;
        };

        let missing: Vec<(String, String)> = match self
            .pool
            .interact_raw(|conn| {
                crate::db::observations_without_embedding_sync(conn, EMBED_BACKFILL_LIMIT)
            })
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                tracing::debug!("embedding backfill query failed: {e}");
                return;
            }
        };
        if missing.is_empty() {
            return;
        }

        let texts: Vec<String> = missing.iter().map(|(_, text)| text.clone()).collect();
        let vectors = match embedder.embed_batch(&texts, cancel).await {
            Ok(vectors) => vectors,
            Err(e) => {
                tracing::warn!("embedding backfill failed (will retry later): {e}");
                return;
            }
        };

        let vector_index = self.pool.has_vector_index();
        for ((id, _), vector) in missing.into_iter().zip(vectors.into_iter()) {
            let store = self
                .pool
                .try_interact("store embedding", move |conn| {
                    crate::db::store_observation_embedding_sync(conn, &id, &vector, vector_index)
                        .map_err(Into::into)
                })
                .await;
            if store.is_none() {
                break;
            }
        }
    }
}

/// Assemble the persisted observation from a claimed message and its
/// compression result. Token accounting: `token_count` measures the
/// compressed text, `discovery_tokens` the raw output it replaced.
fn build_observation(message: &PendingMessage, compressed: CompressedObservation) -> Observation {
    let compact_text = format!(
        "{} {} {} {}",
        compressed.title,
        compressed.subtitle,
        compressed.narrative,
        compressed.facts.join(" ")
    );
    Observation {
        id: new_id(),
        session_id: message.session_id.clone(),
        kind: compressed.kind,
        title: compressed.title,
        subtitle: compressed.subtitle,
        facts: compressed.facts,
        narrative: compressed.narrative,
        concepts: compressed.concepts,
        files_read: compressed.files_read,
        files_modified: compressed.files_modified,
        raw_tool_output: message.tool_output.clone(),
        tool_name: message.tool_name.clone(),
        created_at: now_rfc3339(),
        token_count: estimate_tokens(&compact_text),
        discovery_tokens: estimate_tokens(&message.tool_output),
        importance: compressed.importance,
        superseded_by: None,
        superseded_at: None,
        deleted_at: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use open_mem_types::ObservationType;

    fn message(output: &str) -> PendingMessage {
        PendingMessage {
            id: "p1".into(),
            session_id: "s1".into(),
            tool_name: "Read".into(),
            tool_output: output.into(),
            call_id: "c1".into(),
            created_at: now_rfc3339(),
            status: open_mem_types::PendingStatus::Processing,
            retry_count: 0,
            error: None,
        }
    }

    fn compressed(title: &str) -> CompressedObservation {
        CompressedObservation {
            kind: ObservationType::Discovery,
            title: title.into(),
            subtitle: String::new(),
            facts: vec![],
            narrative: "short narrative".into(),
            concepts: vec![],
            files_read: vec![],
            files_modified: vec![],
            importance: 3,
        }
    }

    #[test]
    fn build_observation_token_accounting() {
        let raw = "x".repeat(2000);
        let obs = build_observation(&message(&raw), compressed("T"));
        assert_eq!(obs.discovery_tokens, 500);
        assert!(obs.token_count > 0);
        assert!(obs.token_count < obs.discovery_tokens);
        assert_eq!(obs.session_id, "s1");
        assert_eq!(obs.tool_name, "Read");
        assert_eq!(obs.raw_tool_output, raw);
        assert!(obs.is_current());
    }
}
