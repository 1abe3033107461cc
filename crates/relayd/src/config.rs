//! Daemon configuration, loaded from TOML.
//!
//! Every field has a default, so an absent file or an empty one yields a
//! working configuration. The bind address can be overridden from the
//! environment (`RELAY_BIND`) or the command line.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::registry::DEFAULT_MAX_SESSIONS;
use crate::session::DEFAULT_OUTBOUND_BUFFER;

/// Default listen address.
pub const DEFAULT_BIND: &str = "127.0.0.1:5555";

/// Default maximum accepted line length in bytes.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 8192;

/// Environment variable that overrides `bind`.
pub const BIND_ENV: &str = "RELAY_BIND";

/// Relay daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelayConfig {
    /// Address to listen on (host:port).
    pub bind: String,
    /// Maximum number of registered members.
    pub max_sessions: usize,
    /// Longest accepted client line, in bytes.
    pub max_line_length: usize,
    /// Outgoing lines queued per member before it is considered dead.
    pub outbound_buffer: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            max_sessions: DEFAULT_MAX_SESSIONS,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
        }
    }
}

impl RelayConfig {
    /// Default config file location (`<config dir>/chatrelay/relayd.toml`).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("chatrelay").join("relayd.toml"))
    }

    /// Load config from a TOML file path. Returns `None` if the file doesn't exist.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&contents).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;
        Ok(Some(config))
    }

    /// Parses and validates config text.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Replaces `bind` when an override is given.
    #[must_use]
    pub fn with_bind(mut self, bind: Option<String>) -> Self {
        if let Some(bind) = bind {
            self.bind = bind;
        }
        self
    }

    /// Rejects values the daemon cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bind.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "bind",
                reason: "must not be empty".to_string(),
            });
        }
        for (field, value) in [
            ("max_sessions", self.max_sessions),
            ("max_line_length", self.max_line_length),
            ("outbound_buffer", self.outbound_buffer),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Errors that can occur when loading config.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.bind, "127.0.0.1:5555");
        assert_eq!(config.max_sessions, 100);
        assert_eq!(config.max_line_length, 8192);
        assert_eq!(config.outbound_buffer, 256);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(RelayConfig::from_toml("").unwrap(), RelayConfig::default());
    }

    #[test]
    fn test_partial_override() {
        let config = RelayConfig::from_toml("bind = \"0.0.0.0:7000\"\nmax_sessions = 3\n").unwrap();
        assert_eq!(config.bind, "0.0.0.0:7000");
        assert_eq!(config.max_sessions, 3);
        assert_eq!(config.outbound_buffer, DEFAULT_OUTBOUND_BUFFER);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = RelayConfig::from_toml("colour = \"blue\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_zero_values_rejected() {
        let err = RelayConfig::from_toml("outbound_buffer = 0").unwrap_err();
        assert!(err.to_string().contains("outbound_buffer"));
    }

    #[test]
    fn test_bind_override() {
        let config = RelayConfig::default().with_bind(Some("[::1]:9000".to_string()));
        assert_eq!(config.bind, "[::1]:9000");
        let config = RelayConfig::default().with_bind(None);
        assert_eq!(config.bind, DEFAULT_BIND);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = RelayConfig::load(&dir.path().join("nope.toml")).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relayd.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "max_line_length = 512").unwrap();

        let config = RelayConfig::load(&path).unwrap().unwrap();
        assert_eq!(config.max_line_length, 512);
    }

    #[test]
    fn test_parse_error_names_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "max_sessions = \"lots\"").unwrap();

        let err = RelayConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("broken.toml"));
    }
}
