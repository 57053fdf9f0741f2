// crates/open-mem-server/src/config/env.rs
// Environment variable helpers - single source of truth for OPEN_MEM_* vars

use tracing::warn;

/// Prefix for every configuration env var.
pub const ENV_PREFIX: &str = "OPEN_MEM_";

/// Read a raw string var (`OPEN_MEM_<NAME>`), filtering empty values.
pub fn read_string(name: &str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}{name}"))
        .ok()
        .filter(|v| !v.trim().is_empty())
}

/// Read a boolean var. Accepts 1/true/yes/on and 0/false/no/off.
pub fn read_bool(name: &str) -> Option<bool> {
    let value = read_string(name)?.to_lowercase();
    match value.as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        other => {
            warn!("ignoring non-boolean {ENV_PREFIX}{name}={other:?}");
            None
        }
    }
}

/// Read a numeric var, ignoring unparseable values with a warning.
pub fn read_num<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = read_string(name)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("ignoring non-numeric {ENV_PREFIX}{name}={raw:?}");
            None
        }
    }
}

/// Read a comma-separated list var. Empty segments are dropped.
pub fn read_list(name: &str) -> Option<Vec<String>> {
    let raw = read_string(name)?;
    Some(
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
    )
}

/// Configuration validation result
#[derive(Debug, Default)]
pub struct ConfigValidation {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ConfigValidation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    /// Format as a human-readable report
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        if !self.errors.is_empty() {
            lines.push("Errors:".to_string());
            for err in &self.errors {
                lines.push(format!("  - {}", err));
            }
        }

        if !self.warnings.is_empty() {
            lines.push("Warnings:".to_string());
            for warn in &self.warnings {
                lines.push(format!("  - {}", warn));
            }
        }

        if lines.is_empty() {
            "Configuration OK".to_string()
        } else {
            lines.join("\n")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_report_ok_when_clean() {
        let validation = ConfigValidation::new();
        assert!(validation.is_valid());
        assert_eq!(validation.report(), "Configuration OK");
    }

    #[test]
    fn validation_errors_invalidate() {
        let mut validation = ConfigValidation::new();
        validation.add_warning("heads up");
        assert!(validation.is_valid());
        validation.add_error("broken");
        assert!(!validation.is_valid());
        let report = validation.report();
        assert!(report.contains("Errors:"));
        assert!(report.contains("broken"));
        assert!(report.contains("heads up"));
    }
}
