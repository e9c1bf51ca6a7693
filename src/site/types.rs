use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// File inside every site root holding the persisted [`Site`] record.
pub const RECORD_FILE_NAME: &str = "pressbox-config.json";

/// Database backend a site is configured against.
///
/// `Mysql` and `Mariadb` need a discovered server engine; `Sqlite` is the
/// embedded fallback and needs nothing running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseEngine {
    Mysql,
    Mariadb,
    Sqlite,
}

impl DatabaseEngine {
    /// True for engines that run as a separate server process.
    pub fn is_networked(&self) -> bool {
        match self {
            DatabaseEngine::Mysql | DatabaseEngine::Mariadb => true,
            DatabaseEngine::Sqlite => false,
        }
    }
}

impl fmt::Display for DatabaseEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseEngine::Mysql => write!(f, "mysql"),
            DatabaseEngine::Mariadb => write!(f, "mariadb"),
            DatabaseEngine::Sqlite => write!(f, "sqlite"),
        }
    }
}

impl std::str::FromStr for DatabaseEngine {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mysql" => Ok(DatabaseEngine::Mysql),
            "mariadb" => Ok(DatabaseEngine::Mariadb),
            "sqlite" => Ok(DatabaseEngine::Sqlite),
            other => Err(crate::error::Error::Validation(format!(
                "unknown database engine '{}' (expected mysql, mariadb or sqlite)",
                other
            ))),
        }
    }
}

/// Lifecycle status of a site.
///
/// ```text
/// Provisioning ──► Stopped ──► Starting ──► Running ──► Stopping ──► Stopped
///                     ▲            │
///                     └── Error ◄──┘   (any state may enter Error)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteStatus {
    Stopped,
    Provisioning,
    Starting,
    Running,
    Stopping,
    Error,
}

impl SiteStatus {
    /// Check if a status transition is valid according to the state machine.
    ///
    /// ```
    /// use pressbox::site::SiteStatus;
    ///
    /// assert!(SiteStatus::Stopped.is_valid_transition(SiteStatus::Starting));
    /// assert!(SiteStatus::Error.is_valid_transition(SiteStatus::Starting));
    /// assert!(!SiteStatus::Stopped.is_valid_transition(SiteStatus::Running));
    /// ```
    pub fn is_valid_transition(&self, to: SiteStatus) -> bool {
        use SiteStatus::*;
        match (self, to) {
            (s1, s2) if *s1 == s2 => true,
            (_, Error) => true,
            (Provisioning, Stopped) => true,
            (Stopped, Starting) | (Error, Starting) => true,
            (Starting, Running) => true,
            (Running, Stopping) => true,
            (Stopping, Stopped) => true,
            (Error, Stopped) => true,
            _ => false,
        }
    }

    /// States that only exist while a lifecycle operation is in flight.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SiteStatus::Provisioning | SiteStatus::Starting | SiteStatus::Stopping
        )
    }
}

impl fmt::Display for SiteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SiteStatus::Stopped => write!(f, "stopped"),
            SiteStatus::Provisioning => write!(f, "provisioning"),
            SiteStatus::Starting => write!(f, "starting"),
            SiteStatus::Running => write!(f, "running"),
            SiteStatus::Stopping => write!(f, "stopping"),
            SiteStatus::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseConfig {
    pub engine: DatabaseEngine,
    pub name: String,
    pub user: String,
    /// Needed to reconnect, so it is persisted in the site record.
    pub password: String,
    /// Engine port written into `DB_HOST`; `None` for sqlite.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Engine root password; only held in memory, never written to disk.
    #[serde(skip)]
    pub root_password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminAccount {
    pub user: String,
    pub email: String,
    /// Only available on the value returned from create.
    #[serde(skip)]
    pub password: Option<String>,
}

/// On-disk locations of a site. Always derived, never taken from user input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SitePaths {
    pub root: PathBuf,
    pub wordpress_dir: PathBuf,
    pub database_dir: PathBuf,
    pub config_file: PathBuf,
}

impl SitePaths {
    /// Paths for a site whose root directory is `root`.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            wordpress_dir: root.clone(),
            database_dir: root.join("wp-content").join("database"),
            config_file: root.join("wp-config.php"),
            root,
        }
    }

    /// Paths for the site named `name` under `sites_dir`. `name` must already be validated.
    pub fn derive(sites_dir: &Path, name: &str) -> Self {
        Self::at(sites_dir.join(name))
    }

    pub fn record_file(&self) -> PathBuf {
        self.root.join(RECORD_FILE_NAME)
    }

    pub fn wp_content_dir(&self) -> PathBuf {
        self.wordpress_dir.join("wp-content")
    }
}

/// One managed WordPress instance.
///
/// Serialized (minus paths and in-memory secrets) as `pressbox-config.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Site {
    pub id: String,
    pub name: String,
    pub domain: String,
    pub port: u16,
    pub php_version: String,
    pub wordpress_version: String,
    pub database: DatabaseConfig,
    pub admin: AdminAccount,
    pub status: SiteStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    pub paths: SitePaths,
}

impl Site {
    pub fn url(&self) -> String {
        format!("http://localhost:{}", self.port)
    }

    /// Set the status and bump `updated_at`. Clears `last_error` unless entering `Error`.
    pub fn set_status(&mut self, status: SiteStatus) {
        self.status = status;
        if status != SiteStatus::Error {
            self.last_error = None;
        }
        self.touch();
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.status = SiteStatus::Error;
        self.last_error = Some(message.into());
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Input to site creation. Only `name` is required.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SiteConfig {
    pub name: String,
    pub domain: Option<String>,
    pub engine: Option<DatabaseEngine>,
    pub php_version: Option<String>,
    pub wordpress_version: Option<String>,
    pub admin_user: Option<String>,
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
}

impl SiteConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_engine(mut self, engine: DatabaseEngine) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_site() -> Site {
        let now = Utc::now();
        Site {
            id: "site-0123456789abcdef0123456789abcdef".to_string(),
            name: "demo".to_string(),
            domain: "demo.local".to_string(),
            port: 8001,
            php_version: "8.2.12".to_string(),
            wordpress_version: "6.4.2".to_string(),
            database: DatabaseConfig {
                engine: DatabaseEngine::Mysql,
                name: "wp_demo_012345".to_string(),
                user: "wp_demo_012345".to_string(),
                password: "s3cret".to_string(),
                port: Some(3306),
                root_password: Some("root-secret".to_string()),
                version: None,
            },
            admin: AdminAccount {
                user: "admin".to_string(),
                email: "admin@demo.local".to_string(),
                password: Some("admin-secret".to_string()),
            },
            status: SiteStatus::Stopped,
            last_error: None,
            created_at: now,
            updated_at: now,
            paths: SitePaths::derive(Path::new("/tmp/sites"), "demo"),
        }
    }

    #[test]
    fn record_uses_camel_case_and_omits_secrets() {
        let json = serde_json::to_string(&sample_site()).unwrap();
        assert!(json.contains("\"phpVersion\":\"8.2.12\""));
        assert!(json.contains("\"createdAt\""));
        assert!(json.contains("\"engine\":\"mysql\""));
        assert!(json.contains("\"password\":\"s3cret\""));
        assert!(!json.contains("root-secret"));
        assert!(!json.contains("admin-secret"));
        assert!(!json.contains("/tmp/sites"));
    }

    #[test]
    fn paths_are_derived_from_name() {
        let paths = SitePaths::derive(Path::new("/srv/sites"), "demo");
        assert_eq!(paths.root, PathBuf::from("/srv/sites/demo"));
        assert_eq!(paths.config_file, PathBuf::from("/srv/sites/demo/wp-config.php"));
        assert_eq!(
            paths.database_dir,
            PathBuf::from("/srv/sites/demo/wp-content/database")
        );
        assert_eq!(
            paths.record_file(),
            PathBuf::from("/srv/sites/demo/pressbox-config.json")
        );
    }

    #[test]
    fn engine_parses_case_insensitively() {
        assert_eq!("MySQL".parse::<DatabaseEngine>().unwrap(), DatabaseEngine::Mysql);
        assert_eq!("sqlite".parse::<DatabaseEngine>().unwrap(), DatabaseEngine::Sqlite);
        assert!("postgres".parse::<DatabaseEngine>().is_err());
    }

    #[test]
    fn status_transitions_follow_lifecycle() {
        use SiteStatus::*;
        assert!(Provisioning.is_valid_transition(Stopped));
        assert!(Starting.is_valid_transition(Running));
        assert!(Running.is_valid_transition(Stopping));
        assert!(Stopping.is_valid_transition(Stopped));
        assert!(Running.is_valid_transition(Error));
        assert!(Error.is_valid_transition(Stopped));

        assert!(!Stopped.is_valid_transition(Running));
        assert!(!Running.is_valid_transition(Stopped));
        assert!(!Stopping.is_valid_transition(Running));
        assert!(!Starting.is_valid_transition(Provisioning));
    }

    #[test]
    fn set_status_clears_error_message() {
        let mut site = sample_site();
        site.set_error("php exited");
        assert_eq!(site.status, SiteStatus::Error);
        assert_eq!(site.last_error.as_deref(), Some("php exited"));
        site.set_status(SiteStatus::Stopped);
        assert!(site.last_error.is_none());
    }
}
