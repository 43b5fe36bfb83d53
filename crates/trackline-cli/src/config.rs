use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use trackline_backup::{BackupConfig, ImportMode};
use trackline_store::{JournalMode, SqliteConfig};

/// Config file read when `--config` is not given.
pub const DEFAULT_CONFIG: &str = "trackline.toml";

/// Settings from `trackline.toml`. Command-line flags take precedence.
///
/// ```toml
/// pretty = false
/// mode = "merge"
///
/// [sqlite]
/// journal_mode = "delete"
/// busy_timeout_ms = 10000
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CliConfig {
    /// Indent exported documents.
    pub pretty: Option<bool>,
    /// Import mode when `--mode` is not given.
    pub mode: Option<ImportMode>,
    pub sqlite: SqliteSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SqliteSection {
    pub journal_mode: Option<String>,
    pub busy_timeout_ms: Option<u32>,
}

impl CliConfig {
    /// Load `path`, or `trackline.toml` in the working directory if present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG);
                if !default.exists() {
                    return Ok(Self::default());
                }
                default
            }
        };
        let text = fs::read_to_string(&path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn backup_config(&self) -> BackupConfig {
        let defaults = BackupConfig::default();
        BackupConfig::default()
            .with_pretty(self.pretty.unwrap_or(defaults.pretty))
            .with_default_mode(self.mode.unwrap_or(defaults.default_mode))
    }

    pub fn sqlite_config(&self) -> Result<SqliteConfig> {
        let mut config = SqliteConfig::default();
        if let Some(mode) = &self.sqlite.journal_mode {
            config.journal_mode = mode.parse::<JournalMode>().map_err(anyhow::Error::msg)?;
        }
        if let Some(timeout) = self.sqlite.busy_timeout_ms {
            config.busy_timeout_ms = timeout;
        }
        Ok(config)
    }
}
