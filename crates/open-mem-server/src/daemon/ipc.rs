// crates/open-mem-server/src/daemon/ipc.rs
// NDJSON protocol over the parent-child stdio channel

use serde::{Deserialize, Serialize};

/// Messages the parent may send the daemon.
/// Line-delimited JSON on stdin: one message per line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum DaemonCommand {
    /// Stop polling, drain the in-flight batch, exit 0.
    Stop,
    /// Run one batch immediately, outside the poll cadence.
    Flush,
    /// Report queue depth and liveness.
    Status,
}

/// One status/acknowledgement line written to stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonReply {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<DaemonStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Daemon state snapshot for `status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonStatus {
    pub pid: u32,
    pub queue_depth: i64,
    pub processed_total: u64,
}

impl DaemonReply {
    pub fn ack() -> Self {
        Self {
            ok: true,
            status: None,
            error: None,
        }
    }

    pub fn status(status: DaemonStatus) -> Self {
        Self {
            ok: true,
            status: Some(status),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            status: None,
            error: Some(message.into()),
        }
    }
}

/// Parse one command line. Unknown or malformed input is an error the
/// caller reports without stopping the loop.
pub fn parse_command(line: &str) -> Result<DaemonCommand, String> {
    serde_json::from_str(line.trim()).map_err(|e| format!("bad daemon command: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_parse_from_tagged_json() {
        assert_eq!(parse_command(r#"{"op": "stop"}"#).unwrap(), DaemonCommand::Stop);
        assert_eq!(parse_command(r#"{"op": "flush"}"#).unwrap(), DaemonCommand::Flush);
        assert_eq!(parse_command(r#"{"op": "status"}"#).unwrap(), DaemonCommand::Status);
        assert!(parse_command(r#"{"op": "dance"}"#).is_err());
        assert!(parse_command("not json").is_err());
    }

    #[test]
    fn reply_serialization_skips_empty_fields() {
        let json = serde_json::to_string(&DaemonReply::ack()).unwrap();
        assert_eq!(json, r#"{"ok":true}"#);

        let json = serde_json::to_string(&DaemonReply::error("bad")).unwrap();
        assert!(json.contains("\"ok\":false"));
        assert!(!json.contains("status"));
    }

    #[test]
    fn status_round_trip() {
        let reply = DaemonReply::status(DaemonStatus {
            pid: 42,
            queue_depth: 7,
            processed_total: 100,
        });
        let json = serde_json::to_string(&reply).unwrap();
        let parsed: DaemonReply = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.status.unwrap().queue_depth, 7);
    }
}
