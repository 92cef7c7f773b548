//! Environment constants and path utilities for the session tracker.
//!
//! This module centralizes the directory and file names used by the CLI and
//! the default file-backed store.

use std::path::{Path, PathBuf};

/// Application directory name (hidden directory like .git, .vscode)
pub const APP_DIR_NAME: &str = ".session-tracker";

/// Configuration file name inside the application directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Configuration file name looked up in the current directory
pub const LOCAL_CONFIG_FILE_NAME: &str = "session-tracker.toml";

/// Persisted session record set file name
pub const SESSIONS_FILE_NAME: &str = "sessions.json";

/// Environment variable overriding the log filter
pub const LOG_ENV_VAR: &str = "RUST_LOG";

/// Default log filter for the binary
pub const DEFAULT_LOG_FILTER: &str = "session_tracker=info";

/// Log filter used with `--verbose`
pub const VERBOSE_LOG_FILTER: &str = "session_tracker=debug";

/// Build the application directory path under a base directory
pub fn app_dir_path(base: &Path) -> PathBuf {
    base.join(APP_DIR_NAME)
}

/// Build the default session store path under a base directory
pub fn sessions_file_path(base: &Path) -> PathBuf {
    app_dir_path(base).join(SESSIONS_FILE_NAME)
}

/// Build config file path in user's home directory
pub fn user_config_file_path(home_dir: &Path) -> PathBuf {
    app_dir_path(home_dir).join(CONFIG_FILE_NAME)
}

/// Build local config file paths in the current directory, in priority order
pub fn local_config_file_paths(current_dir: &Path) -> [PathBuf; 2] {
    [
        current_dir.join(LOCAL_CONFIG_FILE_NAME),
        app_dir_path(current_dir).join(CONFIG_FILE_NAME),
    ]
}

/// Home directory from `HOME` (or `USERPROFILE` on Windows)
pub fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .or_else(|| std::env::var("USERPROFILE").ok())
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}
