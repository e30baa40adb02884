//! XDG directory helpers for config and log locations.

use std::path::PathBuf;

/// Base directory for configuration files.
///
/// Uses `SOP_CONFIG_DIR` if set, otherwise `$XDG_CONFIG_HOME/sop-check` or
/// `~/.config/sop-check`.
pub(crate) fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("SOP_CONFIG_DIR")
        && !dir.trim().is_empty()
    {
        return PathBuf::from(dir);
    }

    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .or_else(dirs::config_dir)
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".config")
        })
        .join("sop-check")
}

/// Directory for rolling log files.
///
/// Uses `SOP_LOG_DIR` if set, otherwise `$XDG_STATE_HOME/sop-check/logs` or
/// `~/.local/state/sop-check/logs`.
pub(crate) fn log_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("SOP_LOG_DIR")
        && !dir.trim().is_empty()
    {
        return PathBuf::from(dir);
    }

    std::env::var("XDG_STATE_HOME")
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .or_else(dirs::state_dir)
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".local")
                .join("state")
        })
        .join("sop-check")
        .join("logs")
}
