//! Persisted collection of site records.
//!
//! Each site directory under `sites/` holds its own `pressbox-config.json`.
//! The whole set is loaded once when the registry is opened and every
//! mutation is flushed immediately with write-temp-then-rename, so a crash
//! mid-write leaves either the old record or the new one, never a torn file.

mod lock;

pub use lock::DataDirLock;

use crate::error::{Error, Result};
use crate::fsutil::atomic_write;
use crate::locks::KeyedLocks;
use crate::site::{is_valid_site_id, validate_name, Site, SitePaths, SiteStatus};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Prefix of directories being deleted; ignored when loading.
const TRASH_PREFIX: &str = ".trash-";

pub struct SiteRegistry {
    sites_dir: PathBuf,
    sites: RwLock<HashMap<String, Site>>,
    write_locks: KeyedLocks,
    read_only: bool,
}

/// How records left mid-lifecycle by an earlier process are treated on load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Recovery {
    /// Reset to `stopped` and write back. Only for the data-dir lock holder.
    Persist,
    /// Reset to `stopped` in memory only: no process is serving them.
    InMemory,
    /// Report as recorded: a live process owns these records.
    AsRecorded,
}

impl SiteRegistry {
    /// Open the registry rooted at `sites_dir`, creating it if needed.
    ///
    /// The caller must hold the data directory lock. Sites left in a
    /// transient or running state by a previous process are reset to
    /// `stopped` on disk: nothing is assumed to still hold their ports.
    /// Unreadable records are skipped with a warning.
    pub fn load(sites_dir: impl Into<PathBuf>) -> Result<Self> {
        let sites_dir = sites_dir.into();
        fs::create_dir_all(&sites_dir).map_err(|e| {
            Error::Registry(format!(
                "Failed to create sites directory '{}': {}",
                sites_dir.display(),
                e
            ))
        })?;
        Self::open(sites_dir, Recovery::Persist, false)
    }

    /// Open the registry without writing anything, for callers that do not
    /// hold the data directory lock.
    ///
    /// When `owner_alive` is true another process is serving these sites and
    /// their recorded statuses are reported unchanged; otherwise leftovers
    /// from a dead process read as `stopped`. Mutations are refused.
    pub fn load_read_only(sites_dir: impl Into<PathBuf>, owner_alive: bool) -> Result<Self> {
        let recovery = if owner_alive {
            Recovery::AsRecorded
        } else {
            Recovery::InMemory
        };
        Self::open(sites_dir.into(), recovery, true)
    }

    fn open(sites_dir: PathBuf, recovery: Recovery, read_only: bool) -> Result<Self> {
        let mut sites = HashMap::new();
        let entries = match fs::read_dir(&sites_dir) {
            Ok(entries) => entries,
            Err(e) if read_only && e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::empty(sites_dir, read_only));
            }
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let dir_name = entry.file_name().to_string_lossy().to_string();
            if dir_name.starts_with('.') || !entry.path().is_dir() {
                continue;
            }
            let mut site = match read_record(&sites_dir, &dir_name) {
                Ok(Some(site)) => site,
                Ok(None) => {
                    debug!("Skipping '{}': no site record", dir_name);
                    continue;
                }
                Err(e) => {
                    warn!("Skipping unreadable site record in '{}': {}", dir_name, e);
                    continue;
                }
            };
            if sites.contains_key(&site.id) {
                warn!(
                    "Skipping '{}': duplicate site id {}",
                    dir_name, site.id
                );
                continue;
            }

            let stale = site.status.is_transient() || site.status == SiteStatus::Running;
            if stale && recovery != Recovery::AsRecorded {
                info!(
                    "Site '{}' was {} when last seen, marking stopped",
                    site.name, site.status
                );
                site.set_status(SiteStatus::Stopped);
                if recovery == Recovery::Persist {
                    if let Err(e) = write_record(&site) {
                        warn!("Failed to persist recovered status for '{}': {}", site.name, e);
                    }
                }
            }
            sites.insert(site.id.clone(), site);
        }

        debug!("Loaded {} site(s) from {}", sites.len(), sites_dir.display());
        let registry = Self::empty(sites_dir, read_only);
        *registry.sites.write() = sites;
        Ok(registry)
    }

    fn empty(sites_dir: PathBuf, read_only: bool) -> Self {
        Self {
            sites_dir,
            sites: RwLock::new(HashMap::new()),
            write_locks: KeyedLocks::new(),
            read_only,
        }
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(Error::StateConflict(
                "site registry was opened read-only".to_string(),
            ));
        }
        Ok(())
    }

    pub fn sites_dir(&self) -> &Path {
        &self.sites_dir
    }

    /// All sites, oldest first.
    pub fn list(&self) -> Vec<Site> {
        let mut sites: Vec<Site> = self.sites.read().values().cloned().collect();
        sites.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.name.cmp(&b.name)));
        sites
    }

    pub fn get(&self, id: &str) -> Result<Site> {
        self.sites
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::SiteNotFound(id.to_string()))
    }

    /// Look a site up by id, or by name (case-insensitive).
    pub fn find(&self, id_or_name: &str) -> Result<Site> {
        let sites = self.sites.read();
        if let Some(site) = sites.get(id_or_name) {
            return Ok(site.clone());
        }
        sites
            .values()
            .find(|s| s.name.eq_ignore_ascii_case(id_or_name))
            .cloned()
            .ok_or_else(|| Error::SiteNotFound(id_or_name.to_string()))
    }

    pub fn name_taken(&self, name: &str) -> bool {
        self.sites
            .read()
            .values()
            .any(|s| s.name.eq_ignore_ascii_case(name))
    }

    /// Persist `site` and make it visible to readers.
    ///
    /// The site directory must already exist. Writes for the same id are
    /// serialized; the in-memory copy changes only after the file is on disk.
    pub async fn upsert(&self, site: &Site) -> Result<()> {
        self.ensure_writable()?;
        if !is_valid_site_id(&site.id) {
            return Err(Error::Registry(format!("invalid site id '{}'", site.id)));
        }
        let _guard = self.write_locks.lock(&site.id).await;
        write_record(site)?;
        self.sites.write().insert(site.id.clone(), site.clone());
        Ok(())
    }

    /// Remove a site's directory and its registry entry together.
    ///
    /// The directory is first renamed to a hidden tombstone. If that rename
    /// fails the entry is kept and the error returned; once it succeeds the
    /// entry is dropped and the tombstone is removed best-effort.
    pub async fn remove(&self, id: &str) -> Result<()> {
        self.ensure_writable()?;
        let guard = self.write_locks.lock(id).await;
        let site = self.get(id)?;

        let tombstone = self.sites_dir.join(format!("{}{}", TRASH_PREFIX, site.id));
        if site.paths.root.exists() {
            fs::rename(&site.paths.root, &tombstone).map_err(|e| {
                Error::Registry(format!(
                    "Failed to remove site directory '{}': {}",
                    site.paths.root.display(),
                    e
                ))
            })?;
        } else {
            warn!(
                "Site directory '{}' is already gone",
                site.paths.root.display()
            );
        }

        self.sites.write().remove(id);
        drop(guard);
        self.write_locks.forget(id);

        if tombstone.exists() {
            if let Err(e) = fs::remove_dir_all(&tombstone) {
                warn!(
                    "Site '{}' unregistered but '{}' could not be removed: {}",
                    site.name,
                    tombstone.display(),
                    e
                );
            }
        }
        Ok(())
    }
}

fn read_record(sites_dir: &Path, dir_name: &str) -> Result<Option<Site>> {
    let paths = SitePaths::derive(sites_dir, dir_name);
    let record = paths.record_file();
    if !record.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&record)?;
    let mut site: Site = serde_json::from_str(&content)?;

    if !is_valid_site_id(&site.id) {
        return Err(Error::Registry(format!("invalid site id '{}'", site.id)));
    }
    if validate_name(&site.name)? != dir_name {
        return Err(Error::Registry(format!(
            "record name '{}' does not match directory '{}'",
            site.name, dir_name
        )));
    }
    site.paths = paths;
    Ok(Some(site))
}

fn write_record(site: &Site) -> Result<()> {
    let json = serde_json::to_string_pretty(site)?;
    let path = site.paths.record_file();
    atomic_write(&path, json.as_bytes()).map_err(|e| {
        Error::Registry(format!("Failed to write '{}': {}", path.display(), e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site::{generate_site_id, AdminAccount, DatabaseConfig, DatabaseEngine};
    use chrono::Utc;

    fn new_site(sites_dir: &Path, name: &str) -> Site {
        let now = Utc::now();
        let paths = SitePaths::derive(sites_dir, name);
        fs::create_dir_all(&paths.root).unwrap();
        Site {
            id: generate_site_id(),
            name: name.to_string(),
            domain: format!("{}.local", name),
            port: 8000,
            php_version: "8.2".to_string(),
            wordpress_version: "6.4.2".to_string(),
            database: DatabaseConfig {
                engine: DatabaseEngine::Sqlite,
                name: format!("wp_{}", name),
                user: format!("wp_{}", name),
                password: "pw".to_string(),
                port: None,
                root_password: None,
                version: None,
            },
            admin: AdminAccount {
                user: "admin".to_string(),
                email: "admin@example.com".to_string(),
                password: None,
            },
            status: SiteStatus::Stopped,
            last_error: None,
            created_at: now,
            updated_at: now,
            paths,
        }
    }

    #[tokio::test]
    async fn upsert_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SiteRegistry::load(dir.path()).unwrap();
        let site = new_site(dir.path(), "alpha");
        registry.upsert(&site).await.unwrap();
        assert!(site.paths.record_file().exists());
        assert!(!site.paths.record_file().with_extension("tmp").exists());

        let reloaded = SiteRegistry::load(dir.path()).unwrap();
        let got = reloaded.get(&site.id).unwrap();
        assert_eq!(got.name, "alpha");
        assert_eq!(got.paths, site.paths);
    }

    #[tokio::test]
    async fn running_sites_are_recovered_as_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SiteRegistry::load(dir.path()).unwrap();
        let mut running = new_site(dir.path(), "live");
        running.status = SiteStatus::Running;
        registry.upsert(&running).await.unwrap();
        let mut failed = new_site(dir.path(), "broken");
        failed.set_error("php exited");
        registry.upsert(&failed).await.unwrap();

        let reloaded = SiteRegistry::load(dir.path()).unwrap();
        assert_eq!(reloaded.get(&running.id).unwrap().status, SiteStatus::Stopped);
        assert_eq!(reloaded.get(&failed.id).unwrap().status, SiteStatus::Error);

        let on_disk = fs::read_to_string(running.paths.record_file()).unwrap();
        assert!(on_disk.contains("\"status\": \"stopped\""));
    }

    #[tokio::test]
    async fn read_only_load_leaves_records_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SiteRegistry::load(dir.path()).unwrap();
        let mut running = new_site(dir.path(), "live");
        running.status = SiteStatus::Running;
        registry.upsert(&running).await.unwrap();
        let before = fs::read_to_string(running.paths.record_file()).unwrap();

        let served = SiteRegistry::load_read_only(dir.path(), true).unwrap();
        assert_eq!(served.get(&running.id).unwrap().status, SiteStatus::Running);

        let orphaned = SiteRegistry::load_read_only(dir.path(), false).unwrap();
        assert_eq!(orphaned.get(&running.id).unwrap().status, SiteStatus::Stopped);

        assert_eq!(fs::read_to_string(running.paths.record_file()).unwrap(), before);
        assert!(matches!(
            served.upsert(&running).await,
            Err(Error::StateConflict(_))
        ));
        assert!(served.remove(&running.id).await.is_err());
        assert!(running.paths.root.exists());
    }

    #[test]
    fn read_only_load_of_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("sites");
        let registry = SiteRegistry::load_read_only(&missing, false).unwrap();
        assert!(registry.list().is_empty());
        assert!(!missing.exists());
    }

    #[tokio::test]
    async fn corrupt_and_hidden_entries_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SiteRegistry::load(dir.path()).unwrap();
        let good = new_site(dir.path(), "good");
        registry.upsert(&good).await.unwrap();

        let bad = dir.path().join("bad");
        fs::create_dir_all(&bad).unwrap();
        fs::write(bad.join(crate::site::RECORD_FILE_NAME), "{ not json").unwrap();
        let hidden = dir.path().join(".trash-site-x");
        fs::create_dir_all(&hidden).unwrap();
        fs::copy(good.paths.record_file(), hidden.join(crate::site::RECORD_FILE_NAME)).unwrap();

        let reloaded = SiteRegistry::load(dir.path()).unwrap();
        assert_eq!(reloaded.list().len(), 1);
    }

    #[tokio::test]
    async fn find_matches_id_or_name() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SiteRegistry::load(dir.path()).unwrap();
        let site = new_site(dir.path(), "Blog");
        registry.upsert(&site).await.unwrap();

        assert_eq!(registry.find(&site.id).unwrap().id, site.id);
        assert_eq!(registry.find("blog").unwrap().id, site.id);
        assert!(registry.name_taken("BLOG"));
        assert!(matches!(registry.find("nope"), Err(Error::SiteNotFound(_))));
    }

    #[tokio::test]
    async fn remove_deletes_directory_and_entry() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SiteRegistry::load(dir.path()).unwrap();
        let site = new_site(dir.path(), "gone");
        registry.upsert(&site).await.unwrap();

        registry.remove(&site.id).await.unwrap();
        assert!(registry.get(&site.id).is_err());
        assert!(!site.paths.root.exists());
        assert!(!dir.path().join(format!(".trash-{}", site.id)).exists());
    }

    #[tokio::test]
    async fn failed_directory_removal_keeps_entry() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SiteRegistry::load(dir.path()).unwrap();
        let site = new_site(dir.path(), "stuck");
        registry.upsert(&site).await.unwrap();

        // A non-empty directory at the tombstone path makes the rename fail.
        let blocker = dir.path().join(format!(".trash-{}", site.id));
        fs::create_dir_all(blocker.join("occupied")).unwrap();

        assert!(registry.remove(&site.id).await.is_err());
        assert!(registry.get(&site.id).is_ok());
        assert!(site.paths.root.exists());
    }
}
