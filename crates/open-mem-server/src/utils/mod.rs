//! crates/open-mem-server/src/utils/mod.rs
//! Shared utility functions used across the codebase

pub mod json;

use std::fmt::Display;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Approximate chars per token (conservative estimate)
const CHARS_PER_TOKEN: usize = 4;

/// Extension trait for Result to simplify error conversion to String.
///
/// Eliminates verbose `.map_err(|e| e.to_string())?` patterns; use
/// `.str_err()?` instead.
pub trait ResultExt<T, E> {
    /// Convert the error type to String.
    fn str_err(self) -> Result<T, String>;
}

impl<T, E: Display> ResultExt<T, E> for Result<T, E> {
    fn str_err(self) -> Result<T, String> {
        self.map_err(|e| e.to_string())
    }
}

/// Convert a Path to an owned String, replacing invalid UTF-8 with U+FFFD.
pub fn path_to_string(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// Truncate a string to max length with ellipsis.
///
/// If the string is longer than `max_len`, it will be truncated and
/// "..." will be appended. The total length will be `max_len + 3`.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        format!("{}...", &s[..max_len])
    }
}

/// Estimate token count from text length (chars / 4, minimum 1 for
/// non-empty input). Used wherever the provider does not report usage.
pub fn estimate_tokens(text: &str) -> i64 {
    if text.is_empty() {
        return 0;
    }
    (text.len() / CHARS_PER_TOKEN).max(1) as i64
}

/// Current UTC timestamp in RFC 3339 format, the one timestamp shape
/// stored everywhere (columns, export envelope, tool responses).
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Generate a new opaque UUID-v4 identifier.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Cooperative abort flag propagated from the hook context into AI calls
/// and the batch worker. Cancellation makes the current attempt fail
/// non-retryably; the pending row reverts to `pending`.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
