// crates/open-mem-server/src/maintenance/folder_context.rs
// Per-folder AGENTS.md artifacts generated from observation history

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use open_mem_types::Observation;
use walkdir::WalkDir;

use crate::engine::Engine;

/// Marker identifying artifacts this engine owns. Clean and purge only
/// ever touch files carrying it.
const ARTIFACT_MARKER: &str = "<!-- generated by open-mem; do not edit -->";

/// Artifact file name written into each folder.
const ARTIFACT_NAME: &str = "AGENTS.md";

/// Observations listed per folder artifact.
const MAX_ENTRIES_PER_FOLDER: usize = 12;

/// Result of one maintenance action.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderContextReport {
    pub written: usize,
    pub removed: usize,
    pub folders: usize,
}

/// Regenerate artifacts for every folder with observation history.
pub async fn rebuild(engine: &Arc<Engine>) -> anyhow::Result<FolderContextReport> {
    let groups = folder_groups(engine).await?;
    let root = engine.settings.project_root.clone();

    let mut report = FolderContextReport {
        folders: groups.len(),
        ..Default::default()
    };
    for (folder, observations) in &groups {
        let dir = root.join(folder);
        if !dir.is_dir() {
            continue;
        }
        let content = render_artifact(folder, observations);
        let path = dir.join(ARTIFACT_NAME);
        if write_if_ours(&path, &content)? {
            report.written += 1;
        }
    }
    Ok(report)
}

/// Remove artifacts in folders that no longer have observation history.
pub async fn clean(engine: &Arc<Engine>) -> anyhow::Result<FolderContextReport> {
    let groups = folder_groups(engine).await?;
    let live: std::collections::HashSet<PathBuf> = groups.keys().cloned().collect();

    let mut report = FolderContextReport {
        folders: groups.len(),
        ..Default::default()
    };
    for artifact in find_artifacts(engine) {
        let folder = artifact
            .parent()
            .and_then(|dir| dir.strip_prefix(&engine.settings.project_root).ok())
            .map(Path::to_path_buf)
            .unwrap_or_default();
        if !live.contains(&folder) {
            std::fs::remove_file(&artifact)?;
            report.removed += 1;
        }
    }
    Ok(report)
}

/// Remove every artifact this engine owns.
pub async fn purge(engine: &Arc<Engine>) -> anyhow::Result<FolderContextReport> {
    let mut report = FolderContextReport::default();
    for artifact in find_artifacts(engine) {
        std::fs::remove_file(&artifact)?;
        report.removed += 1;
    }
    Ok(report)
}

/// Report what rebuild + clean would do, without side effects.
pub async fn dry_run(engine: &Arc<Engine>) -> anyhow::Result<FolderContextReport> {
    let groups = folder_groups(engine).await?;
    let live: std::collections::HashSet<PathBuf> = groups.keys().cloned().collect();

    let mut report = FolderContextReport {
        folders: groups.len(),
        ..Default::default()
    };
    for (folder, _) in &groups {
        if engine.settings.project_root.join(folder).is_dir() {
            report.written += 1;
        }
    }
    for artifact in find_artifacts(engine) {
        let folder = artifact
            .parent()
            .and_then(|dir| dir.strip_prefix(&engine.settings.project_root).ok())
            .map(Path::to_path_buf)
            .unwrap_or_default();
        if !live.contains(&folder) {
            report.removed += 1;
        }
    }
    Ok(report)
}

/// Group current observations by the folders of their modified files,
/// bounded by `folder_context_max_depth`.
async fn folder_groups(
    engine: &Arc<Engine>,
) -> anyhow::Result<BTreeMap<PathBuf, Vec<Observation>>> {
    let max_depth = engine.settings.folder_context_max_depth;
    let observations = engine
        .pool
        .interact_raw(|conn| crate::db::list_recent_observations_sync(conn, 500, &[]))
        .await?;

    let mut groups: BTreeMap<PathBuf, Vec<Observation>> = BTreeMap::new();
    for obs in observations {
        let mut folders: std::collections::HashSet<PathBuf> = std::collections::HashSet::new();
        for file in &obs.files_modified {
            let folder = Path::new(file).parent().unwrap_or(Path::new("")).to_path_buf();
            if folder.components().count() <= max_depth {
                folders.insert(folder);
            }
        }
        for folder in folders {
            groups.entry(folder).or_default().push(obs.clone());
        }
    }
    Ok(groups)
}

/// Render one folder artifact.
fn render_artifact(folder: &Path, observations: &[Observation]) -> String {
    let mut out = format!(
        "{ARTIFACT_MARKER}\n# Memory: {}\n\nWhat past sessions learned about this folder:\n\n",
        if folder.as_os_str().is_empty() {
            "project root".to_string()
        } else {
            folder.display().to_string()
        }
    );
    for obs in observations.iter().take(MAX_ENTRIES_PER_FOLDER) {
        out.push_str(&format!(
            "- **{}** ({}): {}\n",
            obs.title,
            obs.kind,
            crate::utils::truncate(&obs.narrative, 140)
        ));
    }
    out
}

/// Write an artifact unless a foreign (non-marker) file occupies the path.
fn write_if_ours(path: &Path, content: &str) -> anyhow::Result<bool> {
    if path.exists() {
        let existing = std::fs::read_to_string(path).unwrap_or_default();
        if !existing.starts_with(ARTIFACT_MARKER) {
            tracing::warn!(
                "skipping {}: existing file was not generated by open-mem",
                path.display()
            );
            return Ok(false);
        }
    }
    std::fs::write(path, content)?;
    Ok(true)
}

/// All artifacts we own under the project root, depth-bounded.
fn find_artifacts(engine: &Arc<Engine>) -> Vec<PathBuf> {
    let max_depth = engine.settings.folder_context_max_depth.max(1);
    WalkDir::new(&engine.settings.project_root)
        .max_depth(max_depth + 1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name() == ARTIFACT_NAME)
        .filter(|entry| {
            std::fs::read_to_string(entry.path())
                .map(|content| content.starts_with(ARTIFACT_MARKER))
                .unwrap_or(false)
        })
        .map(|entry| entry.into_path())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::db::test_support::{sample_observation, seed_session, setup_test_pool};

    async fn engine_with_tempdir() -> (Arc<Engine>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src/db")).unwrap();
        let mut settings = Settings::defaults(dir.path());
        settings.folder_context_enabled = true;
        settings.folder_context_max_depth = 3;

        let pool = setup_test_pool().await;
        pool.interact_raw(|conn| {
            seed_session(conn, "s1", "/proj");
            let mut obs = sample_observation("o1", "s1", "Pool uses WAL");
            obs.files_modified = vec!["src/db/pool.rs".into()];
            crate::db::create_observation_sync(conn, &obs)
        })
        .await
        .unwrap();

        (Engine::for_tests(pool, settings, None, None), dir)
    }

    #[tokio::test]
    async fn rebuild_writes_folder_artifacts() {
        let (engine, dir) = engine_with_tempdir().await;
        let report = rebuild(&engine).await.unwrap();
        assert_eq!(report.written, 1);

        let artifact = dir.path().join("src/db/AGENTS.md");
        let content = std::fs::read_to_string(&artifact).unwrap();
        assert!(content.starts_with(ARTIFACT_MARKER));
        assert!(content.contains("Pool uses WAL"));
    }

    #[tokio::test]
    async fn rebuild_never_clobbers_foreign_files() {
        let (engine, dir) = engine_with_tempdir().await;
        let artifact = dir.path().join("src/db/AGENTS.md");
        std::fs::write(&artifact, "# Hand-written instructions\n").unwrap();

        let report = rebuild(&engine).await.unwrap();
        assert_eq!(report.written, 0);
        assert_eq!(
            std::fs::read_to_string(&artifact).unwrap(),
            "# Hand-written instructions\n"
        );
    }

    #[tokio::test]
    async fn purge_removes_only_ours() {
        let (engine, dir) = engine_with_tempdir().await;
        rebuild(&engine).await.unwrap();
        let foreign = dir.path().join("AGENTS.md");
        std::fs::write(&foreign, "# keep me\n").unwrap();

        let report = purge(&engine).await.unwrap();
        assert_eq!(report.removed, 1);
        assert!(foreign.exists());
        assert!(!dir.path().join("src/db/AGENTS.md").exists());
    }

    #[tokio::test]
    async fn clean_removes_stale_artifacts() {
        let (engine, dir) = engine_with_tempdir().await;
        rebuild(&engine).await.unwrap();

        // Orphan the artifact by tombstoning its only observation
        engine
            .pool
            .interact_raw(|conn| crate::db::tombstone_observation_sync(conn, "o1"))
            .await
            .unwrap();

        let report = clean(&engine).await.unwrap();
        assert_eq!(report.removed, 1);
        assert!(!dir.path().join("src/db/AGENTS.md").exists());
    }

    #[tokio::test]
    async fn dry_run_reports_without_writing() {
        let (engine, dir) = engine_with_tempdir().await;
        let report = dry_run(&engine).await.unwrap();
        assert_eq!(report.written, 1);
        assert_eq!(report.removed, 0);
        assert!(!dir.path().join("src/db/AGENTS.md").exists());
    }
}
