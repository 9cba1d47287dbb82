use std::fs;
use std::path::{Path, PathBuf};

use livechat::{ClientConfig, DEFAULT_API_BASE};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AppError, Result};

/// Contents of `config.toml`.
///
/// ```toml
/// api_base = "https://api.live.bilibili.com"
///
/// [client]
/// heartbeat_interval_secs = 30
/// uid = 12345
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api_base: String,
    pub client: ClientConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            client: ClientConfig::default(),
        }
    }
}

impl AppConfig {
    /// `<config dir>/livechat/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("livechat").join("config.toml"))
    }

    /// Load from `path`, or from the default location.
    ///
    /// An explicit path must exist; a missing default file means defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match Self::default_path() {
                Some(path) => (path, false),
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            if explicit {
                return Err(AppError::ConfigNotFound(path));
            }
            debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)?;
        let config: Self =
            toml::from_str(&content).map_err(|source| AppError::ConfigParse {
                path: path.clone(),
                source,
            })?;
        config.client.validate()?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "api_base = \"http://127.0.0.1:8080\"\n\n[client]\nheartbeat_interval_secs = 10\nuid = 7"
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.api_base, "http://127.0.0.1:8080");
        assert_eq!(config.client.heartbeat_interval_secs, 10);
        assert_eq!(config.client.uid, Some(7));
        assert_eq!(config.client.verify_timeout_secs, 20);
    }

    #[test]
    fn test_missing_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.toml");
        assert!(matches!(
            AppConfig::load(Some(&path)),
            Err(AppError::ConfigNotFound(_))
        ));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[client]\nverify_timeout_secs = 0").unwrap();
        assert!(matches!(
            AppConfig::load(Some(file.path())),
            Err(AppError::LiveChat(_))
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "client = 3").unwrap();
        assert!(matches!(
            AppConfig::load(Some(file.path())),
            Err(AppError::ConfigParse { .. })
        ));
    }
}
