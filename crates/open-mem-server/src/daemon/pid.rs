// crates/open-mem-server/src/daemon/pid.rs
// PID-file ownership for the per-project daemon

use std::path::{Path, PathBuf};

/// PID file path: next to the database (`memory.db` → `memory.db.pid`).
pub fn pid_file_path(db_path: &Path) -> PathBuf {
    let mut name = db_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "memory.db".to_string());
    name.push_str(".pid");
    db_path.with_file_name(name)
}

/// Write this process's PID next to the database.
pub fn write_pid_file(db_path: &Path) -> std::io::Result<PathBuf> {
    let path = pid_file_path(db_path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, std::process::id().to_string())?;
    Ok(path)
}

/// Remove the PID file if it belongs to this process.
pub fn remove_pid_file(db_path: &Path) {
    let path = pid_file_path(db_path);
    let ours = std::fs::read_to_string(&path)
        .ok()
        .and_then(|raw| raw.trim().parse::<u32>().ok())
        .map(|pid| pid == std::process::id())
        .unwrap_or(false);
    if ours && let Err(e) = std::fs::remove_file(&path) {
        tracing::warn!("failed to remove PID file {}: {e}", path.display());
    }
}

/// PID of a live daemon owning this database, or None.
///
/// A PID file whose process is gone is stale and treated as absent (and
/// removed opportunistically).
pub fn live_daemon_pid(db_path: &Path) -> Option<u32> {
    let path = pid_file_path(db_path);
    let pid: u32 = std::fs::read_to_string(&path).ok()?.trim().parse().ok()?;
    if process_is_alive(pid) {
        Some(pid)
    } else {
        tracing::debug!("removing stale PID file for dead process {pid}");
        let _ = std::fs::remove_file(&path);
        None
    }
}

/// Probe process liveness. Signal 0 performs the permission/existence
/// check without delivering anything.
#[cfg(unix)]
fn process_is_alive(pid: u32) -> bool {
    // SAFETY: kill with signal 0 only checks for existence
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(not(unix))]
fn process_is_alive(_pid: u32) -> bool {
    // Without a cheap probe, assume the recorded owner is alive
    true
}
