use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;
use tracing::info;

use crate::types::error::InboxError;

/// Global configuration instance
static CONFIG: OnceCell<RwLock<EngineConfig>> = OnceCell::new();

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Autosave cadence while composing
    #[serde(default = "default_autosave_interval_secs")]
    pub autosave_interval_secs: u64,

    /// Quiet period before a typed query is searched
    #[serde(default = "default_search_debounce_ms")]
    pub search_debounce_ms: u64,

    /// Upper bound on any single remote call
    #[serde(default = "default_remote_timeout_secs")]
    pub remote_timeout_secs: u64,

    /// Page size used when the caller does not pass one
    #[serde(default = "default_page_size")]
    pub default_page_size: u32,

    /// Larger requested pages are clamped to this
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u32,

    /// Background refresh interval for the active folder
    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: u64,

    /// SQLite file holding the active composer draft (None = in memory)
    #[serde(default)]
    pub draft_db_path: Option<PathBuf>,
}

fn default_autosave_interval_secs() -> u64 {
    30
}

fn default_search_debounce_ms() -> u64 {
    300
}

fn default_remote_timeout_secs() -> u64 {
    15
}

fn default_page_size() -> u32 {
    20
}

fn default_max_page_size() -> u32 {
    100
}

fn default_poll_interval_seconds() -> u64 {
    60
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            autosave_interval_secs: default_autosave_interval_secs(),
            search_debounce_ms: default_search_debounce_ms(),
            remote_timeout_secs: default_remote_timeout_secs(),
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            poll_interval_seconds: default_poll_interval_seconds(),
            draft_db_path: None,
        }
    }
}

impl EngineConfig {
    pub fn autosave_interval(&self) -> Duration {
        Duration::from_secs(self.autosave_interval_secs)
    }

    pub fn search_debounce(&self) -> Duration {
        Duration::from_millis(self.search_debounce_ms)
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    /// Resolve a requested page size against the configured bounds
    pub fn page_size(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size.max(1))
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<(), InboxError> {
        if self.autosave_interval_secs == 0 {
            return Err(InboxError::Config(
                "autosave_interval_secs must be greater than zero".into(),
            ));
        }
        if self.remote_timeout_secs == 0 {
            return Err(InboxError::Config(
                "remote_timeout_secs must be greater than zero".into(),
            ));
        }
        if self.poll_interval_seconds == 0 {
            return Err(InboxError::Config(
                "poll_interval_seconds must be greater than zero".into(),
            ));
        }
        if self.default_page_size == 0 || self.default_page_size > self.max_page_size {
            return Err(InboxError::Config(format!(
                "default_page_size must be between 1 and {}",
                self.max_page_size
            )));
        }
        Ok(())
    }

    /// Parse a TOML document
    pub fn from_toml(content: &str) -> Result<Self, InboxError> {
        let config: EngineConfig = toml::from_str(content)
            .map_err(|e| InboxError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }
}

/// Get default config paths
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // XDG config path
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("inbox-engine").join("config.toml"));
    }

    // Home directory fallback
    if let Some(home_dir) = dirs::home_dir() {
        paths.push(
            home_dir
                .join(".config")
                .join("inbox-engine")
                .join("config.toml"),
        );
    }

    paths
}

/// Initialize configuration from default paths
pub fn init_config() -> Result<EngineConfig, InboxError> {
    info!("Initializing configuration from default paths");

    for path in default_config_paths() {
        if path.exists() {
            info!("Found config at: {:?}", path);
            return init_config_from_path(&path);
        }
    }

    // No config found, initialize with defaults
    info!("No config file found, using defaults");
    let config = EngineConfig::default();
    set_config(config.clone())?;
    Ok(config)
}

/// Initialize configuration from a specific path
pub fn init_config_from_path(path: &Path) -> Result<EngineConfig, InboxError> {
    info!("Loading configuration from: {:?}", path);

    let content = fs::read_to_string(path)
        .map_err(|e| InboxError::Config(format!("Failed to read config: {}", e)))?;

    let config = EngineConfig::from_toml(&content)?;
    set_config(config.clone())?;
    Ok(config)
}

/// Set the global configuration
fn set_config(config: EngineConfig) -> Result<(), InboxError> {
    match CONFIG.get() {
        Some(lock) => {
            let mut guard = lock
                .write()
                .map_err(|e| InboxError::Config(format!("Failed to lock config: {}", e)))?;
            *guard = config;
        }
        None => {
            CONFIG.set(RwLock::new(config)).ok();
        }
    }
    Ok(())
}

/// Current global configuration, defaults when never initialized
pub fn get_config() -> EngineConfig {
    CONFIG
        .get()
        .and_then(|lock| lock.read().ok().map(|c| c.clone()))
        .unwrap_or_default()
}

/// Check if configuration is initialized
pub fn is_initialized() -> bool {
    CONFIG.get().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = EngineConfig::from_toml("remote_timeout_secs = 5\n").unwrap();
        assert_eq!(config.remote_timeout(), Duration::from_secs(5));
        assert_eq!(config.autosave_interval(), Duration::from_secs(30));
        assert_eq!(config.search_debounce(), Duration::from_millis(300));
        assert_eq!(config.draft_db_path, None);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = EngineConfig::from_toml("autosave_interval_secs = 0").unwrap_err();
        assert!(matches!(err, InboxError::Config(_)));

        let err = EngineConfig::from_toml("default_page_size = 500").unwrap_err();
        assert!(matches!(err, InboxError::Config(_)));

        let err = EngineConfig::from_toml("poll_interval_seconds = \"soon\"").unwrap_err();
        assert!(matches!(err, InboxError::Config(_)));
    }

    #[test]
    fn test_page_size_clamping() {
        let config = EngineConfig::default();
        assert_eq!(config.page_size(None), 20);
        assert_eq!(config.page_size(Some(0)), 1);
        assert_eq!(config.page_size(Some(1000)), 100);
    }

    #[test]
    fn test_init_from_path_sets_global() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "search_debounce_ms = 150").unwrap();

        let config = init_config_from_path(file.path()).unwrap();
        assert_eq!(config.search_debounce_ms, 150);
        assert!(is_initialized());
        assert_eq!(get_config().search_debounce_ms, 150);
    }
}
