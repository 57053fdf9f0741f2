// crates/open-mem-types/src/lib.rs

//! Shared data contracts between the open-mem engine and its clients.
//!
//! This crate provides the core domain model:
//! - **Observations**: structured records distilled from tool-call outputs
//! - **Sessions & summaries**: one continuous agent interaction per project
//! - **Pending messages**: the durable ingest queue rows
//! - **Entities & relations**: the optional graph layer
//! - **Export envelope**: the versioned JSON import/export shape
//!
//! All types are plain serde data with no native-only dependencies.

use serde::{Deserialize, Serialize};

// ===================================================
// OBSERVATIONS
// ===================================================

/// Category of a compressed observation.
///
/// Unknown values coerce to `Discovery` when parsing provider output,
/// so a misbehaving model never fails an otherwise valid compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ObservationType {
    Decision,
    Bugfix,
    Feature,
    Refactor,
    #[default]
    Discovery,
    Change,
}

impl ObservationType {
    /// Parse from a string, coercing unknown values to `Discovery`.
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "decision" => Self::Decision,
            "bugfix" => Self::Bugfix,
            "feature" => Self::Feature,
            "refactor" => Self::Refactor,
            "change" => Self::Change,
            _ => Self::Discovery,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Decision => "decision",
            Self::Bugfix => "bugfix",
            Self::Feature => "feature",
            Self::Refactor => "refactor",
            Self::Discovery => "discovery",
            Self::Change => "change",
        }
    }

    /// Display icon used by the plain-text context formatter.
    pub fn icon(&self) -> &'static str {
        match self {
            Self::Decision => "⚖",
            Self::Bugfix => "🐛",
            Self::Feature => "✨",
            Self::Refactor => "🔧",
            Self::Discovery => "🔍",
            Self::Change => "✏",
        }
    }
}

impl std::fmt::Display for ObservationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One structured record distilled from a single tool-call output.
///
/// Append-only except for `embedding` (late-filled), the `superseded_*`
/// pair (revision), and the soft-delete timestamp. A "current" observation
/// has `superseded_by == None && deleted_at == None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    pub id: String,
    pub session_id: String,
    #[serde(rename = "type")]
    pub kind: ObservationType,
    pub title: String,
    #[serde(default)]
    pub subtitle: String,
    #[serde(default)]
    pub facts: Vec<String>,
    pub narrative: String,
    #[serde(default)]
    pub concepts: Vec<String>,
    #[serde(default)]
    pub files_read: Vec<String>,
    #[serde(default)]
    pub files_modified: Vec<String>,
    #[serde(default)]
    pub raw_tool_output: String,
    pub tool_name: String,
    pub created_at: String,
    /// Size of the compressed observation, in tokens.
    pub token_count: i64,
    /// Size of the original raw tool output, in tokens. Zero means unknown
    /// (e.g. manual creation) and excludes the row from savings aggregates.
    #[serde(default)]
    pub discovery_tokens: i64,
    /// 1 (low) to 5 (critical).
    pub importance: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<String>,
}

impl Observation {
    /// Whether this observation is current (not superseded, not tombstoned).
    pub fn is_current(&self) -> bool {
        self.superseded_by.is_none() && self.deleted_at.is_none()
    }
}

/// Observation stored in the cross-project user database.
///
/// Same shape as [`Observation`] minus the session link, plus the project
/// the observation originated from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserObservation {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ObservationType,
    pub title: String,
    #[serde(default)]
    pub subtitle: String,
    #[serde(default)]
    pub facts: Vec<String>,
    pub narrative: String,
    #[serde(default)]
    pub concepts: Vec<String>,
    #[serde(default)]
    pub files_read: Vec<String>,
    #[serde(default)]
    pub files_modified: Vec<String>,
    pub source_project: String,
    pub created_at: String,
    pub token_count: i64,
    pub importance: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<String>,
}

// ===================================================
// SESSIONS
// ===================================================

/// Session lifecycle. Advances monotonically `active → idle ↔ active →
/// completed`; a completed session never reactivates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Active,
    Idle,
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Idle => "idle",
            Self::Completed => "completed",
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "idle" => Self::Idle,
            "completed" => Self::Completed,
            _ => Self::Active,
        }
    }
}

/// One continuous agent interaction scoped to a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub project_path: String,
    pub started_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<String>,
    pub status: SessionStatus,
    pub observation_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_id: Option<String>,
}

/// Session summary written at completion. Exactly zero or one per session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub session_id: String,
    pub summary: String,
    #[serde(default)]
    pub key_decisions: Vec<String>,
    #[serde(default)]
    pub files_modified: Vec<String>,
    #[serde(default)]
    pub concepts: Vec<String>,
    pub created_at: String,
    pub token_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub investigated: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub learned: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_steps: Option<String>,
}

// ===================================================
// PENDING QUEUE
// ===================================================

/// Lifecycle of a pending-queue row: `pending → processing →
/// (completed | failed)`. Failed rows below the retry cap are requeued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PendingStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl PendingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "processing" => Self::Processing,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

/// One captured tool output waiting for compression. FIFO by `created_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingMessage {
    pub id: String,
    pub session_id: String,
    pub tool_name: String,
    pub tool_output: String,
    pub call_id: String,
    pub created_at: String,
    pub status: PendingStatus,
    pub retry_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ===================================================
// GRAPH LAYER
// ===================================================

/// Named entity extracted from observations. Case-insensitively unique by
/// `(name, entity_type)` within a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub id: String,
    pub name: String,
    pub entity_type: String,
    pub created_at: String,
}

/// Directed relation between two entities. Duplicates coalesce.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relation {
    pub subject_id: String,
    pub predicate: String,
    pub object_id: String,
}

// ===================================================
// EXPORT ENVELOPE
// ===================================================

/// Current export envelope version.
pub const EXPORT_VERSION: u32 = 1;

/// Versioned export shape: `export(db) → envelope → import(envelope)` is a
/// lossless round trip modulo `exported_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportEnvelope {
    pub version: u32,
    pub exported_at: String,
    pub project: String,
    pub observations: Vec<Observation>,
    pub summaries: Vec<SessionSummary>,
}

/// Outcome of an import call. Observation rows count in the top-level
/// fields; summaries are tracked separately.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportStats {
    pub imported: usize,
    pub skipped: usize,
    pub overwritten: usize,
    pub summaries_imported: usize,
    pub summaries_skipped: usize,
}
