//! Configuration file model for the JSONP loader.
//!
//! Everything is optional at this boundary; the loader resolves missing
//! values to its defaults. The file lives at `~/.jsonp/config.toml` unless
//! `JSONP_CONFIG` points elsewhere, and a missing file is not an error.

use std::path::{Path, PathBuf};
use std::{env, fs};

use serde::Deserialize;
use thiserror::Error;

/// Environment variable overriding the config file location.
pub const CONFIG_PATH_ENV: &str = "JSONP_CONFIG";

#[derive(Debug, Default, Deserialize)]
pub struct JsonpConfig {
    pub loader: Option<LoaderConfig>,
}

/// `[loader]` table.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoaderConfig {
    /// Request timeout in milliseconds. Default: 30000.
    pub timeout_ms: Option<u64>,
    /// Query parameter carrying the correlation token. Default: "callback".
    pub param_name: Option<String>,
    /// Response field holding the payload data. Default: "response".
    pub response_field: Option<String>,
    /// Prefix for generated correlation tokens. Default: "id_".
    pub token_prefix: Option<String>,
    pub cleanup: Option<CleanupConfig>,
    pub http: Option<HttpConfig>,
}

/// `[loader.cleanup]` table.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CleanupConfig {
    /// Extra delay before the injected artifact is removed. Default: 0.
    pub artifact_removal_delay_ms: Option<u64>,
    /// Delay between neutralizing a callback and deleting it. Default: 500.
    pub reclaim_grace_ms: Option<u64>,
}

/// `[loader.http]` table.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HttpConfig {
    pub user_agent: Option<String>,
    /// Connect timeout in milliseconds. Default: 10000.
    pub connect_timeout_ms: Option<u64>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid config value for `{field}`: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => Some(path),
            ConfigError::Invalid { .. } => None,
        }
    }
}

impl JsonpConfig {
    /// Load the user config, if there is one.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let Some(path) = config_path() else {
            return Ok(None);
        };
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(None);
        }
        Self::load_from(&path).map(Some)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| {
            tracing::warn!("Failed to read config at {:?}: {}", path, source);
            ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }
        })?;
        Self::parse(&content).map_err(|source| {
            tracing::warn!("Failed to parse config at {:?}: {}", path, source);
            ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// The `[loader]` table, or an empty one.
    #[must_use]
    pub fn loader(&self) -> LoaderConfig {
        self.loader.clone().unwrap_or_default()
    }
}

#[must_use]
pub fn config_path() -> Option<PathBuf> {
    if let Ok(path) = env::var(CONFIG_PATH_ENV)
        && !path.trim().is_empty()
    {
        return Some(PathBuf::from(path));
    }
    dirs::home_dir().map(|home| home.join(".jsonp").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn empty_config_parses() {
        let config = JsonpConfig::parse("").unwrap();
        assert!(config.loader.is_none());
        assert!(config.loader().timeout_ms.is_none());
    }

    #[test]
    fn parse_loader_tables() {
        let toml_str = r#"
[loader]
timeout_ms = 5000
param_name = "jsonp"
response_field = "data"
token_prefix = "cb_"

[loader.cleanup]
artifact_removal_delay_ms = 10
reclaim_grace_ms = 250

[loader.http]
user_agent = "test-agent/1.0"
connect_timeout_ms = 2000
"#;
        let config = JsonpConfig::parse(toml_str).unwrap();
        let loader = config.loader();
        assert_eq!(loader.timeout_ms, Some(5000));
        assert_eq!(loader.param_name.as_deref(), Some("jsonp"));
        assert_eq!(loader.response_field.as_deref(), Some("data"));
        assert_eq!(loader.token_prefix.as_deref(), Some("cb_"));
        let cleanup = loader.cleanup.unwrap();
        assert_eq!(cleanup.artifact_removal_delay_ms, Some(10));
        assert_eq!(cleanup.reclaim_grace_ms, Some(250));
        let http = loader.http.unwrap();
        assert_eq!(http.user_agent.as_deref(), Some("test-agent/1.0"));
        assert_eq!(http.connect_timeout_ms, Some(2000));
    }

    #[test]
    fn wrong_type_is_parse_error() {
        assert!(JsonpConfig::parse("[loader]\ntimeout_ms = \"soon\"").is_err());
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[loader]\ntimeout_ms = 1234").unwrap();
        let config = JsonpConfig::load_from(file.path()).unwrap();
        assert_eq!(config.loader().timeout_ms, Some(1234));
    }

    #[test]
    fn load_from_missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let err = JsonpConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
        assert_eq!(err.path(), Some(path.as_path()));
    }

    #[test]
    fn load_from_invalid_file_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[loader").unwrap();
        let err = JsonpConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
