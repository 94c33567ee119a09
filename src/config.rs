use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Integration-time execution options. Fixed for the lifetime of a service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOptions {
    /// Request plain-data records instead of fully materialized ones.
    #[serde(default)]
    pub lean: bool,
}

impl ExecOptions {
    #[must_use]
    pub const fn lean() -> Self {
        Self { lean: true }
    }
}

/// Service configuration, usually read from `urlquery.toml`.
///
/// ```toml
/// lean = false
/// log_dir = "logs"
/// log_level = "debug"
/// log_retention = 3
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub lean: bool,
    pub log_dir: Option<PathBuf>,
    pub log_level: Option<String>,
    pub log_retention: Option<u32>,
}

impl ServiceConfig {
    /// # Errors
    /// Returns an error if the text is not valid TOML for this structure.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Overlay values from `URLQUERY_LEAN`, `URLQUERY_LOG_DIR`, `URLQUERY_LOG_LEVEL`.
    #[must_use]
    pub fn with_env(self) -> Self {
        self.with_vars(|k| std::env::var(k).ok())
    }

    fn with_vars(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = var("URLQUERY_LEAN") {
            self.lean = matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(v) = var("URLQUERY_LOG_DIR") {
            self.log_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = var("URLQUERY_LOG_LEVEL") {
            self.log_level = Some(v);
        }
        self
    }

    /// Options for the default entry point.
    #[must_use]
    pub const fn exec_options(&self) -> ExecOptions {
        ExecOptions { lean: self.lean }
    }

    /// Options for the lean entry point; `lean` is always forced on.
    #[must_use]
    pub const fn lean_exec_options(&self) -> ExecOptions {
        ExecOptions::lean()
    }

    /// Whether the file logger should be installed.
    #[must_use]
    pub const fn wants_logging(&self) -> bool {
        self.log_dir.is_some() || self.log_level.is_some()
    }
}
