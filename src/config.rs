use crate::errors::*;
use crate::polling::LinearBackoff;
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_API: &str = "http://localhost:8000/api/v1";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: String,
    pub token: Option<String>,
    pub org: Option<String>,
    pub timeout_secs: u64,
    pub unmanaged: UnmanagedConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            api: DEFAULT_API.to_string(),
            token: None,
            org: None,
            timeout_secs: 60,
            unmanaged: UnmanagedConfig::default(),
        }
    }
}

/// Pacing of the depgraph resolution poll, which has no server supplied task.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct UnmanagedConfig {
    pub min_interval_ms: u64,
    pub max_interval_ms: u64,
    pub max_attempts: u32,
}

impl Default for UnmanagedConfig {
    fn default() -> Self {
        UnmanagedConfig {
            min_interval_ms: 1000,
            max_interval_ms: 10_000,
            max_attempts: 120,
        }
    }
}

impl UnmanagedConfig {
    pub fn backoff(&self) -> LinearBackoff {
        LinearBackoff {
            min_interval: Duration::from_millis(self.min_interval_ms),
            max_interval: Duration::from_millis(self.max_interval_ms),
            max_attempts: self.max_attempts,
        }
    }
}

pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("vulnfacts").join("config.toml"))
}

impl Config {
    /// Read the config file, a missing file means defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path.map(PathBuf::from).or_else(default_path) {
            Some(path) => path,
            None => return Ok(Config::default()),
        };

        let buf = match fs::read_to_string(&path) {
            Ok(buf) => buf,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!("No config file at {:?}, using defaults", path);
                return Ok(Config::default());
            }
            Err(err) => {
                return Err(err).with_context(|| anyhow!("Failed to read config file {:?}", path))
            }
        };

        let config = toml::from_str(&buf)
            .with_context(|| anyhow!("Failed to parse config file {:?}", path))?;
        debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Apply values given on the command line or through the environment.
    pub fn with_overrides(
        mut self,
        api: Option<String>,
        token: Option<String>,
        org: Option<String>,
    ) -> Self {
        if let Some(api) = api {
            self.api = api;
        }
        if token.is_some() {
            self.token = token;
        }
        if org.is_some() {
            self.org = org;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_default() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = Config::load(Some(&dir.path().join("config.toml")))?;
        assert_eq!(config, Config::default());
        Ok(())
    }

    #[test]
    fn test_partial_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "token = \"abc\"\norg = \"my-org\"\n\n[unmanaged]\nmax_attempts = 5\n",
        )?;

        let config = Config::load(Some(&path))?;
        assert_eq!(config.api, DEFAULT_API);
        assert_eq!(config.token.as_deref(), Some("abc"));
        assert_eq!(config.org.as_deref(), Some("my-org"));
        assert_eq!(config.timeout_secs, 60);
        assert_eq!(config.unmanaged.max_attempts, 5);
        assert_eq!(config.unmanaged.min_interval_ms, 1000);
        Ok(())
    }

    #[test]
    fn test_malformed_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.toml");
        fs::write(&path, "token = [")?;
        assert!(Config::load(Some(&path)).is_err());
        Ok(())
    }

    #[test]
    fn test_overrides() {
        let config = Config {
            token: Some("from-file".into()),
            org: Some("file-org".into()),
            ..Default::default()
        }
        .with_overrides(Some("https://example.com".into()), None, Some("flag-org".into()));
        assert_eq!(config.api, "https://example.com");
        assert_eq!(config.token.as_deref(), Some("from-file"));
        assert_eq!(config.org.as_deref(), Some("flag-org"));
    }
}
