use std::path::Path;

use anyhow::{Context, Result};
use chrono::Local;

/// Once-per-day guard for jobs that must not hammer the portal.
///
/// Returns `true` when the job may run today (and stamps the lock), `false`
/// when the stamp already matches today's date. An unreadable stamp is
/// treated as stale rather than blocking the run.
pub fn daily_lock(path: &Path) -> Result<bool> {
    let today = Local::now().date_naive().to_string();

    if let Ok(existing) = std::fs::read_to_string(path) {
        if existing.trim() == today {
            return Ok(false);
        }
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating lock dir {}", parent.display()))?;
    }
    std::fs::write(path, &today).with_context(|| format!("writing lock {}", path.display()))?;
    Ok(true)
}
