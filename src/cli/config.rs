//! Configuration discovery and loading
//!
//! This module handles the configuration discovery hierarchy:
//! 1. Explicit `--config` override
//! 2. Current directory: ./session-tracker.toml or ./.session-tracker/config.toml
//! 3. User config: ~/.session-tracker/config.toml
//! 4. Built-in defaults

use crate::{TrackerConfig, env};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Session store file; defaults to ~/.session-tracker/sessions.json
    pub storage_path: Option<PathBuf>,
    pub tracker: TrackerConfig,
}

impl AppConfig {
    /// Store path, falling back to the user's app directory, then the current one
    pub fn resolve_storage_path(&self) -> PathBuf {
        if let Some(path) = &self.storage_path {
            return path.clone();
        }
        let base = env::home_dir()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        env::sessions_file_path(&base)
    }

    /// Load from TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Save to TOML file
    pub fn to_toml_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;
        Ok(())
    }
}

/// Configuration discovery system
pub struct ConfigDiscovery;

impl ConfigDiscovery {
    /// Load the override if given, otherwise walk the discovery hierarchy
    pub fn load(config_override: Option<&Path>) -> Result<AppConfig> {
        if let Some(path) = config_override {
            info!("Loading configuration override from: {:?}", path);
            return AppConfig::from_toml_file(path);
        }

        if let Some(config_path) = Self::find_config_file() {
            info!("Loading configuration from: {:?}", config_path);
            return AppConfig::from_toml_file(config_path);
        }

        info!("No configuration file found, using defaults");
        Ok(AppConfig::default())
    }

    /// Find configuration file using discovery hierarchy
    pub fn find_config_file() -> Option<PathBuf> {
        Self::get_config_candidates()
            .into_iter()
            .inspect(|candidate| debug!("Checking for config file: {:?}", candidate))
            .find(|candidate| candidate.is_file())
    }

    /// Get list of configuration file candidates in priority order
    pub fn get_config_candidates() -> Vec<PathBuf> {
        let mut candidates = Vec::new();

        if let Ok(current_dir) = std::env::current_dir() {
            candidates.extend(env::local_config_file_paths(&current_dir));
        }

        if let Some(home_dir) = env::home_dir() {
            candidates.push(env::user_config_file_path(&home_dir));
        }

        candidates
    }

    /// Create a default config file in the user's home directory
    pub fn create_default_user_config() -> Result<PathBuf> {
        let home_dir = env::home_dir().context("Could not determine home directory")?;
        Self::create_default_config_in(&home_dir)
    }

    /// Create a default config file under `base`, keeping an existing one
    pub fn create_default_config_in(base: &Path) -> Result<PathBuf> {
        let config_dir = env::app_dir_path(base);
        let config_path = env::user_config_file_path(base);

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir).with_context(|| {
                format!("Failed to create directory: {}", config_dir.display())
            })?;
            info!("Created configuration directory: {:?}", config_dir);
        }

        if config_path.exists() {
            warn!("Configuration file already exists: {:?}", config_path);
        } else {
            let default_config = AppConfig {
                storage_path: Some(env::sessions_file_path(base)),
                ..AppConfig::default()
            };
            default_config.to_toml_file(&config_path)?;
            info!("Created default configuration file: {:?}", config_path);
        }

        Ok(config_path)
    }

    /// Show configuration discovery information for debugging
    pub fn show_discovery_info(active: &AppConfig) {
        println!("Configuration Discovery Hierarchy:");
        println!();

        for (i, candidate) in Self::get_config_candidates().iter().enumerate() {
            let status = if candidate.is_file() {
                "✓ EXISTS"
            } else if candidate.exists() {
                "✗ NOT A FILE"
            } else {
                "✗ NOT FOUND"
            };
            println!("  {}. {:?} - {}", i + 1, candidate, status);
        }

        println!();
        match Self::find_config_file() {
            Some(found) => println!("Active configuration: {:?}", found),
            None => println!("Active configuration: Built-in defaults"),
        }
        println!("Session store: {:?}", active.resolve_storage_path());
        match active.tracker.active_limit() {
            Some(limit) => println!("Max active sessions: {}", limit),
            None => println!("Max active sessions: unlimited"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.storage_path, None);
        assert_eq!(config.tracker.max_active_sessions, 1);
        assert!(!config.tracker.verbose);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: AppConfig = toml::from_str("[tracker]\nverbose = true\n").unwrap();
        assert!(config.tracker.verbose);
        assert_eq!(config.tracker.max_active_sessions, 1);
        assert_eq!(config.storage_path, None);
    }

    #[test]
    fn test_zero_limit_means_unlimited() {
        let config: AppConfig = toml::from_str("[tracker]\nmax_active_sessions = 0\n").unwrap();
        assert_eq!(config.tracker.active_limit(), None);
        assert_eq!(AppConfig::default().tracker.active_limit(), Some(1));
    }

    #[test]
    fn test_config_file_operations() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test_config.toml");

        let original = AppConfig {
            storage_path: Some(temp_dir.path().join("sessions.json")),
            tracker: TrackerConfig {
                max_active_sessions: 3,
                verbose: true,
            },
        };

        original.to_toml_file(&config_path).unwrap();
        let loaded = AppConfig::from_toml_file(&config_path).unwrap();

        assert_eq!(original, loaded);
    }

    #[test]
    fn test_explicit_storage_path_wins() {
        let config = AppConfig {
            storage_path: Some(PathBuf::from("/data/sessions.json")),
            ..AppConfig::default()
        };
        assert_eq!(
            config.resolve_storage_path(),
            PathBuf::from("/data/sessions.json")
        );
    }

    #[test]
    fn test_create_default_config_keeps_existing_file() {
        let temp_dir = TempDir::new().unwrap();

        let path = ConfigDiscovery::create_default_config_in(temp_dir.path()).unwrap();
        fs::write(&path, "[tracker]\nmax_active_sessions = 5\n").unwrap();
        let again = ConfigDiscovery::create_default_config_in(temp_dir.path()).unwrap();

        assert_eq!(path, again);
        let loaded = AppConfig::from_toml_file(&path).unwrap();
        assert_eq!(loaded.tracker.max_active_sessions, 5);
    }

    #[test]
    fn test_override_is_loaded() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("override.toml");
        fs::write(&path, "storage_path = \"/tmp/override.json\"\n").unwrap();

        let config = ConfigDiscovery::load(Some(&path)).unwrap();
        assert_eq!(
            config.storage_path,
            Some(PathBuf::from("/tmp/override.json"))
        );
    }

    #[test]
    fn test_malformed_override_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("broken.toml");
        fs::write(&path, "tracker = [").unwrap();

        assert!(ConfigDiscovery::load(Some(&path)).is_err());
    }
}
