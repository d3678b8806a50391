// Engine configuration.
//
// Global config: `~/.marginalia/config.toml`. Missing or unparsable files
// fall back to defaults; the engine never refuses to start over config.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root directory for global state: `~/.marginalia/`.
pub fn global_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".marginalia"))
}

/// Path to the global config file: `~/.marginalia/config.toml`.
pub fn global_config_path() -> Option<PathBuf> {
    global_dir().map(|d| d.join("config.toml"))
}

/// Engine configuration at `~/.marginalia/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub gateway: GatewayConfig,
    pub healing: HealingConfig,
}

/// Edit-gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    /// Gateway endpoint URL (e.g. `https://gateway.example.com/v1/edits`).
    pub url: Option<String>,
    pub request_timeout_ms: u64,
    /// Extra submissions allowed after the first conflict.
    pub max_rebase_attempts: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self { url: None, request_timeout_ms: 10_000, max_rebase_attempts: 1 }
    }
}

/// Chain-healing settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HealingConfig {
    pub heal_on_structural: bool,
}

impl Default for HealingConfig {
    fn default() -> Self {
        Self { heal_on_structural: true }
    }
}

impl EngineConfig {
    /// Load from `~/.marginalia/config.toml`. Returns defaults if the file
    /// doesn't exist or can't be parsed.
    pub fn load() -> Self {
        global_config_path().and_then(|p| Self::load_from(&p).ok()).unwrap_or_default()
    }

    /// Load from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&contents).map_err(ConfigError::Parse)
    }

    /// Save to `~/.marginalia/config.toml`.
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = global_config_path().ok_or_else(|| {
            ConfigError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "could not determine home directory",
            ))
        })?;
        self.save_to(&path)
    }

    /// Save to a specific path (creates parent directories).
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigError::Io)?;
        }
        let contents = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, contents).map_err(ConfigError::Io)
    }
}

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Serialize(toml::ser::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "config I/O error: {e}"),
            Self::Parse(e) => write!(f, "config parse error: {e}"),
            Self::Serialize(e) => write!(f, "config serialize error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}
