use serde::{Deserialize, Serialize};

use crate::import::ImportMode;

/// Backup behavior settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BackupConfig {
    /// Indent exported documents. Defaults to true.
    pub pretty: bool,
    /// Mode used by [`Importer::import`](crate::Importer::import).
    /// Defaults to [`ImportMode::Replace`].
    pub default_mode: ImportMode,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            pretty: true,
            default_mode: ImportMode::Replace,
        }
    }
}

impl BackupConfig {
    /// Set whether exported documents are indented.
    pub fn with_pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    /// Set the default import mode.
    pub fn with_default_mode(mut self, mode: ImportMode) -> Self {
        self.default_mode = mode;
        self
    }
}
