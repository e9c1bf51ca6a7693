use super::duration::parse_setting;
use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use crate::site::DatabaseEngine;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Environment variable that overrides the data directory.
pub const HOME_ENV: &str = "PRESSBOX_HOME";

pub const CONFIG_FILE_NAME: &str = "config.yaml";

/// Application settings, read from `<data_dir>/config.yaml`.
///
/// Every field has a default, so a missing file (or an empty one) is a valid
/// configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Root of all pressbox state. Not read from YAML; set by [`AppConfig::load`].
    #[serde(skip)]
    pub data_dir: PathBuf,
    pub port_range_start: u16,
    pub port_scan_window: u16,
    pub php: PhpSettings,
    pub wordpress: WordPressSettings,
    pub database: DatabaseSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhpSettings {
    pub binary: PathBuf,
    /// Recorded on sites when the binary's version cannot be detected.
    pub version: String,
    pub readiness_retry: RetrySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WordPressSettings {
    pub version: String,
    pub download_url: String,
    pub sqlite_plugin_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub default_engine: DatabaseEngine,
    pub port: u16,
    pub root_user: String,
    pub root_password: String,
    /// Extra discovery roots, searched before the platform defaults.
    pub search_roots: Vec<PathBuf>,
    /// Skip the platform default roots entirely (useful for tests and CI).
    pub skip_default_roots: bool,
    pub connect_retry: RetrySettings,
}

/// Retry budget as written in YAML, e.g. `{ max_attempts: 10, initial_backoff: 500ms }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_backoff: String,
    pub max_backoff: String,
}

impl RetrySettings {
    fn from_policy(policy: RetryPolicy) -> Self {
        Self {
            max_attempts: policy.max_attempts,
            initial_backoff: format!("{}ms", policy.initial_backoff.as_millis()),
            max_backoff: format!("{}ms", policy.max_backoff.as_millis()),
        }
    }

    pub fn to_policy(&self, key: &str) -> Result<RetryPolicy> {
        Ok(RetryPolicy::new(
            self.max_attempts,
            parse_setting(&format!("{}.initial_backoff", key), &self.initial_backoff)?,
            parse_setting(&format!("{}.max_backoff", key), &self.max_backoff)?,
        ))
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self::from_policy(RetryPolicy::default())
    }
}

impl Default for PhpSettings {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("php"),
            version: "8.2".to_string(),
            readiness_retry: RetrySettings::from_policy(RetryPolicy::process_readiness()),
        }
    }
}

impl Default for WordPressSettings {
    fn default() -> Self {
        Self {
            version: "latest".to_string(),
            download_url: "https://wordpress.org".to_string(),
            sqlite_plugin_url:
                "https://downloads.wordpress.org/plugin/sqlite-database-integration.zip"
                    .to_string(),
        }
    }
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            default_engine: DatabaseEngine::Mysql,
            port: 3306,
            root_user: "root".to_string(),
            root_password: String::new(),
            search_roots: Vec::new(),
            skip_default_roots: false,
            connect_retry: RetrySettings::from_policy(RetryPolicy::database_connect()),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".pressbox"),
            port_range_start: 8000,
            port_scan_window: 1000,
            php: PhpSettings::default(),
            wordpress: WordPressSettings::default(),
            database: DatabaseSettings::default(),
        }
    }
}

impl AppConfig {
    /// Resolve the data directory: explicit argument, then `PRESSBOX_HOME`,
    /// then `~/.pressbox`.
    pub fn resolve_data_dir(explicit: Option<PathBuf>) -> Result<PathBuf> {
        if let Some(dir) = explicit {
            return Ok(dir);
        }
        if let Ok(dir) = std::env::var(HOME_ENV) {
            if !dir.trim().is_empty() {
                return Ok(PathBuf::from(dir));
            }
        }
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))?;
        Ok(home.join(".pressbox"))
    }

    /// Load `config.yaml` from `data_dir`, falling back to defaults when absent.
    pub fn load(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        let path = data_dir.join(CONFIG_FILE_NAME);
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| {
                Error::Config(format!("Failed to read '{}': {}", path.display(), e))
            })?;
            Self::parse(&content)?
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Self::default()
        };
        config.data_dir = data_dir;
        config.validate()?;
        Ok(config)
    }

    /// Defaults rooted at `data_dir`, without reading anything from disk.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    pub fn parse(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.port_range_start == 0 {
            return Err(Error::Config("port_range_start must be non-zero".to_string()));
        }
        if self.port_scan_window == 0 {
            return Err(Error::Config("port_scan_window must be non-zero".to_string()));
        }
        self.database_retry()?;
        self.php_readiness_retry()?;
        Ok(())
    }

    pub fn sites_dir(&self) -> PathBuf {
        self.data_dir.join("sites")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir.join("cache")
    }

    pub fn engines_dir(&self) -> PathBuf {
        self.data_dir.join("engines")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.data_dir.join(".lock")
    }

    pub fn database_retry(&self) -> Result<RetryPolicy> {
        self.database.connect_retry.to_policy("database.connect_retry")
    }

    pub fn php_readiness_retry(&self) -> Result<RetryPolicy> {
        self.php.readiness_retry.to_policy("php.readiness_retry")
    }

    /// Create the directory skeleton under `data_dir`.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [self.sites_dir(), self.cache_dir(), self.engines_dir()] {
            std::fs::create_dir_all(&dir).map_err(|e| {
                Error::Config(format!("Failed to create '{}': {}", dir.display(), e))
            })?;
        }
        Ok(())
    }
}
