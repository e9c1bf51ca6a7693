//! WordPress core provisioning: download, extract, configure.
//!
//! Archives are cached under `<data_dir>/cache`, one per WordPress version,
//! so only the first site of a given version needs the network.

mod archive;
mod wp_config;

pub use archive::{extract_zip, read_wordpress_version};
pub use wp_config::{
    is_guarded_dropin, is_sqlite_config, render_config, sqlite_dropin, Salts, SALT_KEYS,
    SQLITE_DB_FILE, SQLITE_PLUGIN_SLUG,
};

use crate::config::AppConfig;
use crate::error::{Error, ProvisioningStep, Result};
use crate::fsutil::atomic_write;
use crate::locks::KeyedLocks;
use crate::registry::SiteRegistry;
use crate::site::{DatabaseEngine, Site, SitePaths};
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Name of the top-level directory inside WordPress core archives.
const WORDPRESS_ARCHIVE_ROOT: &str = "wordpress";

static SHARED_HTTP_CLIENT: OnceLock<Client> = OnceLock::new();

fn http_client() -> &'static Client {
    SHARED_HTTP_CLIENT.get_or_init(|| {
        Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(300))
            .user_agent(concat!("pressbox/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("Failed to create shared HTTP client")
    })
}

fn step_error(step: ProvisioningStep, path: &Path, e: impl std::fmt::Display) -> Error {
    Error::provisioning(step, format!("{}: {}", path.display(), e))
}

pub struct WordPressProvisioner {
    cache_dir: PathBuf,
    download_url: String,
    sqlite_plugin_url: String,
    downloads: KeyedLocks,
}

impl WordPressProvisioner {
    pub fn new(
        cache_dir: impl Into<PathBuf>,
        download_url: impl Into<String>,
        sqlite_plugin_url: impl Into<String>,
    ) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            download_url: download_url.into().trim_end_matches('/').to_string(),
            sqlite_plugin_url: sqlite_plugin_url.into(),
            downloads: KeyedLocks::new(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.cache_dir(),
            config.wordpress.download_url.clone(),
            config.wordpress.sqlite_plugin_url.clone(),
        )
    }

    /// Cache location of the core archive for `version` (`latest` included).
    pub fn archive_path(&self, version: &str) -> PathBuf {
        self.cache_dir.join(format!("wordpress-{}.zip", version))
    }

    pub fn plugin_archive_path(&self) -> PathBuf {
        self.cache_dir.join(format!("{}.zip", SQLITE_PLUGIN_SLUG))
    }

    fn core_url(&self, version: &str) -> String {
        if version == "latest" {
            format!("{}/latest.zip", self.download_url)
        } else {
            format!("{}/wordpress-{}.zip", self.download_url, version)
        }
    }

    /// Path of the cached core archive for `version`, downloading it first if needed.
    ///
    /// A network failure is fatal; there is no site without WordPress core.
    pub async fn download(&self, version: &str) -> Result<PathBuf> {
        let archive = self.archive_path(version);
        self.fetch_cached(&self.core_url(version), &archive).await?;
        Ok(archive)
    }

    async fn fetch_cached(&self, url: &str, dest: &Path) -> Result<()> {
        let key = dest.to_string_lossy().to_string();
        let _guard = self.downloads.lock(&key).await;
        if dest.is_file() {
            debug!("Using cached {}", dest.display());
            return Ok(());
        }
        tokio::fs::create_dir_all(&self.cache_dir)
            .await
            .map_err(|e| step_error(ProvisioningStep::Download, &self.cache_dir, e))?;

        info!("Downloading {}", url);
        let partial = dest.with_extension("zip.part");
        let result = fetch_to(url, &partial).await;
        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e);
        }
        tokio::fs::rename(&partial, dest)
            .await
            .map_err(|e| step_error(ProvisioningStep::Download, dest, e))
    }

    /// Unpack core files into `dest`.
    pub async fn extract(&self, archive: &Path, dest: &Path) -> Result<()> {
        let archive = archive.to_path_buf();
        let dest = dest.to_path_buf();
        tokio::task::spawn_blocking(move || {
            extract_zip(&archive, &dest, Some(WORDPRESS_ARCHIVE_ROOT)).map(|_| ())
        })
        .await
        .map_err(|e| Error::provisioning(ProvisioningStep::Extract, e))?
    }

    /// Write `wp-config.php` for `site`; sqlite sites also get their drop-in setup.
    pub async fn write_config(&self, site: &Site, salts: &Salts) -> Result<()> {
        let content = render_config(site, salts);
        let path = site.paths.config_file.clone();
        tokio::task::spawn_blocking(move || {
            atomic_write(&path, content.as_bytes())
                .map_err(|e| step_error(ProvisioningStep::WriteConfig, &path, e))
        })
        .await
        .map_err(|e| Error::provisioning(ProvisioningStep::WriteConfig, e))??;
        if site.database.engine == DatabaseEngine::Sqlite {
            self.setup_sqlite(&site.paths).await?;
        }
        Ok(())
    }

    /// Database directory, plugin and `db.php` drop-in for the SQLite engine.
    ///
    /// Every artifact is checked before it is written, so this is safe to
    /// re-run after a partial attempt.
    pub async fn setup_sqlite(&self, paths: &SitePaths) -> Result<()> {
        let database_dir = paths.database_dir.clone();
        if !database_dir.is_dir() {
            tokio::fs::create_dir_all(&database_dir)
                .await
                .map_err(|e| step_error(ProvisioningStep::SqliteSetup, &database_dir, e))?;
        }

        let plugins_dir = paths.wp_content_dir().join("plugins");
        if !plugins_dir.join(SQLITE_PLUGIN_SLUG).join("load.php").is_file() {
            let plugin_archive = self.plugin_archive_path();
            self.fetch_cached(&self.sqlite_plugin_url, &plugin_archive)
                .await?;
            let dest = plugins_dir.clone();
            tokio::task::spawn_blocking(move || extract_zip(&plugin_archive, &dest, None))
                .await
                .map_err(|e| Error::provisioning(ProvisioningStep::SqliteSetup, e))??;
            debug!("Installed SQLite plugin into {}", plugins_dir.display());
        }

        let dropin = paths.wp_content_dir().join("db.php");
        let current = std::fs::read_to_string(&dropin).unwrap_or_default();
        if current != sqlite_dropin() {
            atomic_write(&dropin, sqlite_dropin().as_bytes())
                .map_err(|e| step_error(ProvisioningStep::SqliteSetup, &dropin, e))?;
        }
        Ok(())
    }

    /// Salts of the site's current config, if it has a complete set.
    pub fn read_salts(paths: &SitePaths) -> Option<Salts> {
        std::fs::read_to_string(&paths.config_file)
            .ok()
            .and_then(|c| Salts::parse(&c))
    }

    /// Switch `site` to the SQLite engine in place.
    ///
    /// The config is rewritten with the existing salts and the registry is
    /// updated in the same step; if the registry write fails the previous
    /// config is put back so the file and the record never disagree.
    /// Idempotent: artifacts already present are left alone.
    #[tracing::instrument(skip(self, site, registry), fields(site.id = %site.id))]
    pub async fn reconfigure_for_fallback(
        &self,
        site: &Site,
        registry: &SiteRegistry,
    ) -> Result<Site> {
        let config_file = site.paths.config_file.clone();
        let previous = tokio::fs::read_to_string(&config_file).await.ok();
        let salts = previous
            .as_deref()
            .and_then(Salts::parse)
            .unwrap_or_else(Salts::generate);

        let mut updated = site.clone();
        updated.database.engine = DatabaseEngine::Sqlite;
        updated.database.port = None;
        updated.database.version = None;
        updated.touch();

        self.setup_sqlite(&updated.paths).await?;

        let content = render_config(&updated, &salts);
        if previous.as_deref() != Some(content.as_str()) {
            atomic_write(&config_file, content.as_bytes())
                .map_err(|e| step_error(ProvisioningStep::WriteConfig, &config_file, e))?;
        }

        if let Err(e) = registry.upsert(&updated).await {
            if let Some(previous) = previous {
                if let Err(restore) = atomic_write(&config_file, previous.as_bytes()) {
                    tracing::error!(
                        "Failed to restore {} after registry error: {}",
                        config_file.display(),
                        restore
                    );
                }
            }
            return Err(e);
        }
        Ok(updated)
    }
}

async fn fetch_to(url: &str, dest: &Path) -> Result<()> {
    let download_error = |e: &dyn std::fmt::Display| {
        Error::provisioning(ProvisioningStep::Download, format!("{}: {}", url, e))
    };
    let mut response = http_client()
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| download_error(&e))?;

    let mut file = tokio::fs::File::create(dest)
        .await
        .map_err(|e| download_error(&e))?;
    while let Some(chunk) = response.chunk().await.map_err(|e| download_error(&e))? {
        file.write_all(&chunk).await.map_err(|e| download_error(&e))?;
    }
    file.sync_all().await.map_err(|e| download_error(&e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_names_follow_versions() {
        let p = WordPressProvisioner::new("/cache", "https://wordpress.org/", "https://x/p.zip");
        assert_eq!(p.archive_path("6.4.2"), PathBuf::from("/cache/wordpress-6.4.2.zip"));
        assert_eq!(p.core_url("latest"), "https://wordpress.org/latest.zip");
        assert_eq!(p.core_url("6.4.2"), "https://wordpress.org/wordpress-6.4.2.zip");
        assert_eq!(
            p.plugin_archive_path(),
            PathBuf::from("/cache/sqlite-database-integration.zip")
        );
    }

    #[tokio::test]
    async fn unreachable_download_is_a_download_error() {
        let dir = tempfile::tempdir().unwrap();
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let p = WordPressProvisioner::new(
            dir.path(),
            format!("http://127.0.0.1:{}", port),
            "http://127.0.0.1:1/p.zip",
        );
        let err = p.download("6.4.2").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Provisioning {
                step: ProvisioningStep::Download,
                ..
            }
        ));
        assert!(!p.archive_path("6.4.2").exists());
        assert!(!p.archive_path("6.4.2").with_extension("zip.part").exists());
    }

    #[tokio::test]
    async fn cached_archive_skips_network() {
        let dir = tempfile::tempdir().unwrap();
        let p = WordPressProvisioner::new(dir.path(), "http://127.0.0.1:1", "http://127.0.0.1:1/p.zip");
        std::fs::write(p.archive_path("6.4.2"), b"cached").unwrap();
        assert_eq!(p.download("6.4.2").await.unwrap(), p.archive_path("6.4.2"));
    }
}
