//! Configuration management for the VaultFM engine.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/vaultfm/config.toml`.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::router::OperationKind;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),

    #[error("instance id must not be empty")]
    EmptyInstanceId,

    #[error("instance {0} has an empty root_path")]
    EmptyRootPath(String),

    #[error("instance id {0} is defined more than once")]
    DuplicateInstanceId(String),

    #[error("instance {0} enables encryption but no key is configured")]
    MissingEncryptionKey(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Highest deflate level accepted for archives.
pub const MAX_COMPRESSION_LEVEL: u32 = 9;

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Process-wide settings.
    pub engine: EngineConfig,

    /// File manager instances, one per mount point.
    pub instances: Vec<InstanceConfig>,
}

/// Process-wide engine settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Directory for daily rolling log files. Logs go to stderr only when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: None,
        }
    }
}

/// What a multi-item operation does when one item fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BatchPolicy {
    /// Process every item and report the last failure.
    #[default]
    Continue,
    /// Return the first failure immediately.
    Stop,
}

/// Settings for a single file manager instance.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InstanceConfig {
    /// Identifier used to look the instance up.
    pub id: String,

    /// Physical directory every virtual path is rooted at.
    pub root_path: PathBuf,

    /// Total storage quota in MB (0 = unlimited).
    pub storage_max_size_mb: u64,

    /// Per-operation ceiling for zip/unzip in MB (0 = unlimited).
    pub compression_max_size_mb: u64,

    /// Largest single upload in MB (0 = unlimited).
    pub max_upload_size_mb: u64,

    /// Accepted upload extensions such as ".pdf". Empty means any.
    pub accepted_files: Vec<String>,

    /// Encryption passphrase. Never written back to disk.
    #[serde(skip_serializing)]
    pub encryption_key: Option<String>,

    /// Environment variable holding the passphrase; wins over `encryption_key`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encryption_key_env: Option<String>,

    /// Seal content at rest.
    pub use_encryption: bool,

    /// Deflate level for archives, clamped to 0..=9.
    #[serde(deserialize_with = "deserialize_compression_level")]
    pub compression_level: u32,

    /// Redirect deletes into the recycle bin.
    pub use_recycle_bin: bool,

    /// Operation kinds this instance refuses.
    pub disabled_operations: BTreeSet<OperationKind>,

    /// Failure handling for multi-item operations.
    pub batch_policy: BatchPolicy,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            root_path: PathBuf::new(),
            storage_max_size_mb: 1024,
            compression_max_size_mb: 256,
            max_upload_size_mb: 256,
            accepted_files: Vec::new(),
            encryption_key: None,
            encryption_key_env: None,
            use_encryption: false,
            compression_level: 6,
            use_recycle_bin: true,
            disabled_operations: BTreeSet::new(),
            batch_policy: BatchPolicy::Continue,
        }
    }
}

impl std::fmt::Debug for InstanceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceConfig")
            .field("id", &self.id)
            .field("root_path", &self.root_path)
            .field("storage_max_size_mb", &self.storage_max_size_mb)
            .field("compression_max_size_mb", &self.compression_max_size_mb)
            .field("max_upload_size_mb", &self.max_upload_size_mb)
            .field("accepted_files", &self.accepted_files)
            .field(
                "encryption_key",
                &self.encryption_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("encryption_key_env", &self.encryption_key_env)
            .field("use_encryption", &self.use_encryption)
            .field("compression_level", &self.compression_level)
            .field("use_recycle_bin", &self.use_recycle_bin)
            .field("disabled_operations", &self.disabled_operations)
            .field("batch_policy", &self.batch_policy)
            .finish()
    }
}

impl InstanceConfig {
    /// Create a configuration for `id` rooted at `root_path` with default limits.
    pub fn new(id: impl Into<String>, root_path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            root_path: root_path.into(),
            ..Self::default()
        }
    }

    /// The passphrase in effect, from the named env var or the inline key.
    pub fn resolve_key(&self) -> Option<String> {
        if let Some(var) = &self.encryption_key_env {
            if let Ok(value) = std::env::var(var) {
                if !value.is_empty() {
                    return Some(value);
                }
            }
        }
        self.encryption_key.clone().filter(|k| !k.is_empty())
    }

    /// Whether `kind` is refused for this instance.
    pub fn is_disabled(&self, kind: OperationKind) -> bool {
        self.disabled_operations.contains(&kind)
    }

    /// Whether uploads with this file name are accepted.
    pub fn accepts(&self, file_name: &str) -> bool {
        if self.accepted_files.is_empty() {
            return true;
        }
        let ext = Path::new(file_name)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()));
        match ext {
            Some(ext) => self.accepted_files.iter().any(|accepted| {
                let accepted = accepted.trim().to_lowercase();
                let accepted = if accepted.starts_with('.') {
                    accepted
                } else {
                    format!(".{}", accepted)
                };
                accepted == ext
            }),
            None => false,
        }
    }
}

fn deserialize_compression_level<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let level = i64::deserialize(deserializer)?;
    Ok(level.clamp(0, i64::from(MAX_COMPRESSION_LEVEL)) as u32)
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("vaultfm")
        .join("config.toml")
}

/// Returns the default root for the instance written by `init-config`.
pub fn default_data_root() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("vaultfm")
        .join("files")
}

impl Config {
    /// A configuration with one default instance named `files` rooted at `root`.
    pub fn starter(root: impl Into<PathBuf>) -> Self {
        Self {
            instances: vec![InstanceConfig::new("files", root)],
            ..Self::default()
        }
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported variables:
    /// - VAULTFM_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("VAULTFM_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.engine.log_level = level;
            }
        }
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let level = self.engine.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.engine.log_level.clone()));
        }

        let mut seen = HashSet::new();
        for instance in &self.instances {
            if instance.id.trim().is_empty() {
                return Err(ConfigError::EmptyInstanceId);
            }
            if instance.root_path.as_os_str().is_empty() {
                return Err(ConfigError::EmptyRootPath(instance.id.clone()));
            }
            if !seen.insert(instance.id.as_str()) {
                return Err(ConfigError::DuplicateInstanceId(instance.id.clone()));
            }
            if instance.use_encryption && instance.resolve_key().is_none() {
                return Err(ConfigError::MissingEncryptionKey(instance.id.clone()));
            }
        }

        Ok(())
    }

    /// Look up an instance configuration by id.
    pub fn instance(&self, id: &str) -> Option<&InstanceConfig> {
        self.instances.iter().find(|i| i.id == id)
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist. Inline keys are omitted.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
