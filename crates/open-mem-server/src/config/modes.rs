// crates/open-mem-server/src/config/modes.rs
// Mode descriptors: named vocabularies constraining observation types,
// concepts, and the entity/relationship graph for prompt construction

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use serde::{Deserialize, Serialize};

use crate::llm::ModeHints;

/// Identifier of the built-in default mode.
pub const DEFAULT_MODE_ID: &str = "code";

/// One mode descriptor, loadable from `<modes_dir>/<id>.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mode {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub observation_types: Vec<String>,
    #[serde(default)]
    pub concept_vocabulary: Vec<String>,
    #[serde(default)]
    pub entity_types: Vec<String>,
    #[serde(default)]
    pub relationship_types: Vec<String>,
    #[serde(default)]
    pub prompt_overrides: HashMap<String, String>,
    /// Parent mode id; resolved by shallow merge (empty child fields take
    /// the parent's values). Cycles and missing parents fall back to the
    /// default mode.
    #[serde(default)]
    pub extends: Option<String>,
}

impl Mode {
    /// The built-in default mode used when nothing is installed on disk.
    pub fn default_mode() -> Self {
        Self {
            id: DEFAULT_MODE_ID.to_string(),
            name: "Code".to_string(),
            description: "General software engineering memory".to_string(),
            observation_types: vec![
                "decision".into(),
                "bugfix".into(),
                "feature".into(),
                "refactor".into(),
                "discovery".into(),
                "change".into(),
            ],
            concept_vocabulary: Vec::new(),
            entity_types: vec![
                "file".into(),
                "function".into(),
                "module".into(),
                "library".into(),
                "service".into(),
            ],
            relationship_types: vec!["uses".into(), "contains".into(), "depends_on".into()],
            prompt_overrides: HashMap::new(),
            extends: None,
        }
    }

    /// Hints handed to the compression prompt.
    pub fn hints(&self) -> ModeHints {
        ModeHints {
            observation_types: self.observation_types.clone(),
            concept_vocabulary: self.concept_vocabulary.clone(),
        }
    }

    /// Shallow-merge a parent into this mode: empty child fields take the
    /// parent's values, non-empty child fields win.
    fn merge_parent(mut self, parent: &Mode) -> Self {
        if self.observation_types.is_empty() {
            self.observation_types = parent.observation_types.clone();
        }
        if self.concept_vocabulary.is_empty() {
            self.concept_vocabulary = parent.concept_vocabulary.clone();
        }
        if self.entity_types.is_empty() {
            self.entity_types = parent.entity_types.clone();
        }
        if self.relationship_types.is_empty() {
            self.relationship_types = parent.relationship_types.clone();
        }
        for (key, value) in &parent.prompt_overrides {
            self.prompt_overrides
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        self
    }
}

/// Process-wide mode loader with a cache keyed by the modes directory.
/// Explicit `reset` keeps tests deterministic.
pub struct ModeLoader {
    cache: Mutex<HashMap<PathBuf, HashMap<String, Mode>>>,
}

static LOADER: OnceLock<ModeLoader> = OnceLock::new();

impl ModeLoader {
    pub fn global() -> &'static ModeLoader {
        LOADER.get_or_init(|| ModeLoader {
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Default per-installation modes directory (`~/.open-mem/modes`).
    pub fn default_modes_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".open-mem/modes")
    }

    /// Load a mode by id, resolving `extends` chains. Unknown ids, cycles,
    /// and missing parents all fall back to the built-in default mode.
    pub fn load(&self, modes_dir: &Path, id: &str) -> Mode {
        let raw = self.raw_modes(modes_dir);
        resolve_mode(&raw, id)
    }

    /// Drop all cached mode files.
    pub fn reset(&self) {
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    fn raw_modes(&self, modes_dir: &Path) -> HashMap<String, Mode> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(loaded) = cache.get(modes_dir) {
            return loaded.clone();
        }
        let loaded = read_modes_dir(modes_dir);
        cache.insert(modes_dir.to_path_buf(), loaded.clone());
        loaded
    }
}

/// Read every `*.toml` descriptor in the modes directory. Unparseable
/// files are skipped with a warning.
fn read_modes_dir(modes_dir: &Path) -> HashMap<String, Mode> {
    let mut modes = HashMap::new();
    let entries = match std::fs::read_dir(modes_dir) {
        Ok(entries) => entries,
        Err(_) => return modes,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("toml") {
            continue;
        }
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("failed to read mode file {}: {e}", path.display());
                continue;
            }
        };
        match toml::from_str::<Mode>(&content) {
            Ok(mode) => {
                modes.insert(mode.id.clone(), mode);
            }
            Err(e) => {
                tracing::warn!("skipping invalid mode file {}: {e}", path.display());
            }
        }
    }
    modes
}

/// Resolve one mode against its raw set, following `extends` with cycle
/// detection.
fn resolve_mode(raw: &HashMap<String, Mode>, id: &str) -> Mode {
    let Some(mode) = raw.get(id) else {
        if id != DEFAULT_MODE_ID {
            tracing::debug!("mode {id:?} not installed, using default");
        }
        return raw
            .get(DEFAULT_MODE_ID)
            .cloned()
            .unwrap_or_else(Mode::default_mode);
    };

    let mut resolved = mode.clone();
    let mut visited = vec![id.to_string()];
    let mut parent_id = resolved.extends.clone();

    while let Some(pid) = parent_id {
        if visited.contains(&pid) {
            tracing::warn!("mode extends cycle at {pid:?}, falling back to default mode");
            return Mode::default_mode();
        }
        let Some(parent) = raw.get(&pid) else {
            tracing::warn!("mode parent {pid:?} missing, falling back to default mode");
            return Mode::default_mode();
        };
        resolved = resolved.merge_parent(parent);
        visited.push(pid);
        parent_id = parent.extends.clone();
    }

    resolved
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mode(id: &str, extends: Option<&str>, types: &[&str]) -> Mode {
        Mode {
            id: id.to_string(),
            name: id.to_uppercase(),
            description: String::new(),
            observation_types: types.iter().map(|s| s.to_string()).collect(),
            concept_vocabulary: Vec::new(),
            entity_types: Vec::new(),
            relationship_types: Vec::new(),
            prompt_overrides: HashMap::new(),
            extends: extends.map(String::from),
        }
    }

    fn raw(modes: Vec<Mode>) -> HashMap<String, Mode> {
        modes.into_iter().map(|m| (m.id.clone(), m)).collect()
    }

    #[test]
    fn unknown_id_falls_back_to_default() {
        let resolved = resolve_mode(&HashMap::new(), "research");
        assert_eq!(resolved.id, DEFAULT_MODE_ID);
    }

    #[test]
    fn extends_fills_empty_fields_only() {
        let parent = mode("base", None, &["decision", "discovery"]);
        let child = mode("child", Some("base"), &[]);
        let resolved = resolve_mode(&raw(vec![parent, child]), "child");
        assert_eq!(resolved.id, "child");
        assert_eq!(resolved.observation_types, vec!["decision", "discovery"]);

        let opinionated = mode("strict", Some("base"), &["bugfix"]);
        let base = mode("base", None, &["decision", "discovery"]);
        let resolved = resolve_mode(&raw(vec![base, opinionated]), "strict");
        assert_eq!(resolved.observation_types, vec!["bugfix"]);
    }

    #[test]
    fn extends_cycle_falls_back_to_default() {
        let a = mode("a", Some("b"), &["x"]);
        let b = mode("b", Some("a"), &["y"]);
        let resolved = resolve_mode(&raw(vec![a, b]), "a");
        assert_eq!(resolved.id, DEFAULT_MODE_ID);
    }

    #[test]
    fn missing_parent_falls_back_to_default() {
        let orphan = mode("orphan", Some("ghost"), &["x"]);
        let resolved = resolve_mode(&raw(vec![orphan]), "orphan");
        assert_eq!(resolved.id, DEFAULT_MODE_ID);
    }

    #[test]
    fn loader_reads_toml_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("research.toml"),
            r#"
id = "research"
name = "Research"
observation_types = ["discovery"]
concept_vocabulary = ["paper", "dataset"]
"#,
        )
        .unwrap();

        let loader = ModeLoader::global();
        loader.reset();
        let resolved = loader.load(dir.path(), "research");
        assert_eq!(resolved.id, "research");
        assert_eq!(resolved.concept_vocabulary, vec!["paper", "dataset"]);
        loader.reset();
    }

    #[test]
    fn default_mode_has_full_type_set() {
        let mode = Mode::default_mode();
        assert_eq!(mode.observation_types.len(), 6);
        assert!(mode.hints().observation_types.contains(&"bugfix".to_string()));
    }
}
