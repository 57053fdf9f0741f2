// crates/open-mem-server/src/tools/args.rs
// Statically-typed argument records for the mem-* tool surface

use serde::Deserialize;

use crate::error::MemError;

fn default_limit() -> usize {
    10
}

fn default_depth() -> usize {
    3
}

fn default_scope() -> String {
    "project".to_string()
}

fn default_mode() -> String {
    "skip-duplicates".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FindArgs {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default = "default_scope")]
    pub scope: String,
    #[serde(default)]
    pub concepts: Vec<String>,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub semantic: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HistoryArgs {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub anchor: Option<String>,
    #[serde(default = "default_depth")]
    pub depth_before: usize,
    #[serde(default = "default_depth")]
    pub depth_after: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GetArgs {
    pub ids: Vec<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateArgs {
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    pub title: String,
    pub narrative: String,
    #[serde(default)]
    pub subtitle: Option<String>,
    #[serde(default)]
    pub facts: Vec<String>,
    #[serde(default)]
    pub concepts: Vec<String>,
    #[serde(default)]
    pub files_read: Vec<String>,
    #[serde(default)]
    pub files_modified: Vec<String>,
    #[serde(default)]
    pub importance: Option<i64>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ReviseArgs {
    pub id: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub narrative: Option<String>,
    #[serde(default)]
    pub subtitle: Option<String>,
    #[serde(default)]
    pub facts: Option<Vec<String>>,
    #[serde(default)]
    pub concepts: Option<Vec<String>>,
    #[serde(default)]
    pub importance: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RemoveArgs {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ExportArgs {
    #[serde(default)]
    pub include_raw: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ImportArgs {
    pub data: serde_json::Value,
    #[serde(default = "default_mode")]
    pub mode: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MaintenanceArgs {
    pub action: String,
}

/// One parsed tool call: the tagged-variant record the dispatcher runs.
#[derive(Debug, Clone)]
pub enum ToolCall {
    Find(FindArgs),
    History(HistoryArgs),
    Get(GetArgs),
    Create(CreateArgs),
    Revise(ReviseArgs),
    Remove(RemoveArgs),
    Export(ExportArgs),
    Import(ImportArgs),
    Maintenance(MaintenanceArgs),
    Help,
}

impl ToolCall {
    /// Deserialize and validate one tool invocation.
    /// Shape mismatches come back as `MemError::Validation`.
    pub fn parse(tool: &str, args: serde_json::Value) -> Result<Self, MemError> {
        fn de<T: serde::de::DeserializeOwned>(
            tool: &str,
            args: serde_json::Value,
        ) -> Result<T, MemError> {
            serde_json::from_value(args)
                .map_err(|e| MemError::Validation(format!("{tool}: {e}")))
        }

        let call = match tool {
            "mem-find" => Self::Find(de(tool, args)?),
            "mem-history" => Self::History(de(tool, args)?),
            "mem-get" => Self::Get(de(tool, args)?),
            "mem-create" => Self::Create(de(tool, args)?),
            "mem-revise" => Self::Revise(de(tool, args)?),
            "mem-remove" => Self::Remove(de(tool, args)?),
            "mem-export" => Self::Export(de(tool, args)?),
            "mem-import" => Self::Import(de(tool, args)?),
            "mem-maintenance" => Self::Maintenance(de(tool, args)?),
            "mem-help" => Self::Help,
            other => {
                return Err(MemError::Validation(format!("unknown tool {other:?}")));
            }
        };
        call.validate()?;
        Ok(call)
    }

    /// Semantic validation beyond shape.
    fn validate(&self) -> Result<(), MemError> {
        match self {
            Self::Find(args) => {
                if args.limit == 0 || args.limit > 100 {
                    return Err(MemError::Validation("limit must be 1..=100".into()));
                }
                if !matches!(args.scope.as_str(), "project" | "user" | "all") {
                    return Err(MemError::Validation(format!(
                        "scope must be project|user|all, got {:?}",
                        args.scope
                    )));
                }
            }
            Self::History(args) => {
                if args.limit == 0 || args.limit > 200 {
                    return Err(MemError::Validation("limit must be 1..=200".into()));
                }
            }
            Self::Get(args) => {
                if args.ids.is_empty() {
                    return Err(MemError::Validation("ids must not be empty".into()));
                }
            }
            Self::Create(args) => {
                if args.title.trim().is_empty() {
                    return Err(MemError::Validation("title must not be empty".into()));
                }
                if args.narrative.trim().is_empty() {
                    return Err(MemError::Validation("narrative must not be empty".into()));
                }
                if let Some(importance) = args.importance
                    && !(1..=5).contains(&importance)
                {
                    return Err(MemError::Validation("importance must be 1..=5".into()));
                }
            }
            Self::Revise(args) => {
                if args.id.trim().is_empty() {
                    return Err(MemError::Validation("id must not be empty".into()));
                }
            }
            Self::Remove(args) => {
                if args.id.trim().is_empty() {
                    return Err(MemError::Validation("id must not be empty".into()));
                }
            }
            Self::Import(args) => {
                if !matches!(args.mode.as_str(), "skip-duplicates" | "overwrite") {
                    return Err(MemError::Validation(format!(
                        "mode must be skip-duplicates|overwrite, got {:?}",
                        args.mode
                    )));
                }
            }
            Self::Maintenance(args) => {
                const ACTIONS: [&str; 4] = [
                    "folderContextDryRun",
                    "folderContextClean",
                    "folderContextPurge",
                    "folderContextRebuild",
                ];
                if !ACTIONS.contains(&args.action.as_str()) {
                    return Err(MemError::Validation(format!(
                        "action must be one of {ACTIONS:?}, got {:?}",
                        args.action
                    )));
                }
            }
            Self::Export(_) | Self::Help => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_defaults() {
        let call = ToolCall::parse("mem-find", serde_json::json!({"query": "auth"})).unwrap();
        let ToolCall::Find(args) = call else {
            panic!("wrong variant")
        };
        assert_eq!(args.limit, 10);
        assert_eq!(args.scope, "project");
        assert!(!args.semantic);
    }

    #[test]
    fn unknown_tool_is_validation_error() {
        let err = ToolCall::parse("mem-frobnicate", serde_json::json!({})).unwrap_err();
        assert_eq!(err.tool_code(), "VALIDATION_ERROR");
    }

    #[test]
    fn unknown_field_is_rejected() {
        let err =
            ToolCall::parse("mem-find", serde_json::json!({"qurey": "typo"})).unwrap_err();
        assert_eq!(err.tool_code(), "VALIDATION_ERROR");
    }

    #[test]
    fn limits_are_bounded() {
        assert!(ToolCall::parse("mem-find", serde_json::json!({"limit": 0})).is_err());
        assert!(ToolCall::parse("mem-find", serde_json::json!({"limit": 101})).is_err());
        assert!(ToolCall::parse("mem-find", serde_json::json!({"limit": 100})).is_ok());
    }

    #[test]
    fn get_requires_ids() {
        assert!(ToolCall::parse("mem-get", serde_json::json!({"ids": []})).is_err());
        assert!(ToolCall::parse("mem-get", serde_json::json!({"ids": ["a"]})).is_ok());
        // Missing field entirely is a shape error
        assert!(ToolCall::parse("mem-get", serde_json::json!({})).is_err());
    }

    #[test]
    fn create_requires_title_and_narrative() {
        assert!(ToolCall::parse(
            "mem-create",
            serde_json::json!({"title": "  ", "narrative": "n"})
        )
        .is_err());
        assert!(ToolCall::parse(
            "mem-create",
            serde_json::json!({"title": "t", "narrative": "n", "importance": 9})
        )
        .is_err());
        assert!(ToolCall::parse(
            "mem-create",
            serde_json::json!({"title": "t", "narrative": "n"})
        )
        .is_ok());
    }

    #[test]
    fn maintenance_actions_are_closed_set() {
        assert!(ToolCall::parse(
            "mem-maintenance",
            serde_json::json!({"action": "folderContextRebuild"})
        )
        .is_ok());
        assert!(ToolCall::parse(
            "mem-maintenance",
            serde_json::json!({"action": "vacuumEverything"})
        )
        .is_err());
    }

    #[test]
    fn import_mode_validated() {
        assert!(ToolCall::parse(
            "mem-import",
            serde_json::json!({"data": {}, "mode": "merge"})
        )
        .is_err());
        assert!(ToolCall::parse("mem-import", serde_json::json!({"data": {}})).is_ok());
    }
}
