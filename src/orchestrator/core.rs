use crate::config::AppConfig;
use crate::database::{DatabaseServerRecord, DatabaseServers, ServerEngine};
use crate::error::{Error, ProvisioningStep, Result};
use crate::locks::KeyedLocks;
use crate::port::PortAllocator;
use crate::provisioner::{read_wordpress_version, Salts, WordPressProvisioner};
use crate::registry::{DataDirLock, SiteRegistry};
use crate::retry::RetryPolicy;
use crate::site::{
    database_identifier, default_domain, generate_admin_password, generate_db_password,
    generate_site_id, validate_admin_user, validate_domain, validate_email, validate_name,
    AdminAccount, DatabaseConfig, Site, SiteConfig, SitePaths, SiteStatus,
};
use crate::supervisor::{detect_php_version, ProcessHandle, ProcessLauncher};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Prefix of directories that hold a site while it is being provisioned.
const STAGING_PREFIX: &str = ".staging-";

/// Coordinates the registry, port allocator, database servers, provisioner
/// and process supervisor into site lifecycle operations.
///
/// Only one lifecycle operation per site id runs at a time; operations on
/// different sites proceed in parallel.
pub struct Orchestrator {
    pub(super) config: AppConfig,
    pub(super) registry: Arc<SiteRegistry>,
    pub(super) ports: Arc<PortAllocator>,
    pub(super) databases: Arc<dyn DatabaseServers>,
    pub(super) provisioner: Arc<WordPressProvisioner>,
    pub(super) processes: Arc<dyn ProcessLauncher>,
    /// site id -> process currently serving it
    pub(super) handles: Arc<Mutex<HashMap<String, ProcessHandle>>>,
    pub(super) op_locks: Arc<KeyedLocks>,
    /// Serializes engine discovery, start and stop across sites.
    pub(super) engine_lock: tokio::sync::Mutex<()>,
    pub(super) db_retry: RetryPolicy,
    pub(super) exit_watcher: Option<JoinHandle<()>>,
    pub(super) _data_lock: Option<DataDirLock>,
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        if let Some(watcher) = self.exit_watcher.take() {
            watcher.abort();
        }
    }
}

/// Validate a transition and apply it.
pub(super) fn transition(site: &mut Site, to: SiteStatus) -> Result<()> {
    if !site.status.is_valid_transition(to) {
        return Err(Error::StateConflict(format!(
            "site '{}' cannot go from {} to {}",
            site.name, site.status, to
        )));
    }
    site.set_status(to);
    Ok(())
}

impl Orchestrator {
    pub fn builder() -> super::OrchestratorBuilder {
        super::OrchestratorBuilder::new()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn list(&self) -> Vec<Site> {
        self.registry.list()
    }

    /// Site by id or name.
    pub fn get(&self, id_or_name: &str) -> Result<Site> {
        self.registry.find(id_or_name)
    }

    /// Discovered database engines with their live status.
    pub async fn database_statuses(&self) -> Result<Vec<DatabaseServerRecord>> {
        self.databases.discover().await
    }

    /// Captured PHP server output of a running site.
    pub fn logs(&self, id: &str, tail: Option<usize>) -> Vec<String> {
        self.handles
            .lock()
            .get(id)
            .map(|h| self.processes.logs(h, tail))
            .unwrap_or_default()
    }

    pub fn is_serving(&self, id: &str) -> bool {
        self.handles
            .lock()
            .get(id)
            .is_some_and(|h| self.processes.is_alive(h))
    }

    /// Ports of running sites other than `except`.
    fn running_ports(&self, except: &str) -> HashSet<u16> {
        self.registry
            .list()
            .into_iter()
            .filter(|s| s.id != except && s.status == SiteStatus::Running)
            .map(|s| s.port)
            .collect()
    }

    /// Validate `config`, provision WordPress and register the site as stopped.
    ///
    /// Files are assembled in a hidden staging directory and renamed into
    /// place only when complete; the registry record is written last. Nothing
    /// is registered if any step fails.
    #[tracing::instrument(skip(self, config), fields(site.name = %config.name))]
    pub async fn create(&self, config: SiteConfig) -> Result<Site> {
        let name = validate_name(&config.name)?;
        let domain = match config.domain.as_deref() {
            Some(domain) => validate_domain(domain)?,
            None => default_domain(&name),
        };
        let admin_user = validate_admin_user(config.admin_user.as_deref().unwrap_or("admin"))?;
        let admin_email = match config.admin_email.as_deref() {
            Some(email) => validate_email(email)?,
            None => validate_email(&format!("admin@{}", domain))?,
        };
        let engine = config.engine.unwrap_or(self.config.database.default_engine);

        // Two creates of the same name must not both pass the uniqueness check.
        let name_key = format!("create:{}", name.to_lowercase());
        let _guard = self.op_locks.lock(&name_key).await;
        if self.registry.name_taken(&name) {
            return Err(Error::StateConflict(format!(
                "a site named '{}' already exists",
                name
            )));
        }
        let paths = SitePaths::derive(self.registry.sites_dir(), &name);
        if paths.root.exists() {
            return Err(Error::StateConflict(format!(
                "directory '{}' already exists",
                paths.root.display()
            )));
        }

        let taken: HashSet<u16> = self.registry.list().iter().map(|s| s.port).collect();
        let port = self.ports.allocate(&taken)?;

        let php_version = match config.php_version {
            Some(version) => version,
            None => detect_php_version(&self.config.php.binary)
                .await
                .unwrap_or_else(|| self.config.php.version.clone()),
        };

        let id = generate_site_id();
        let identifier = database_identifier(&name, &id);
        let now = Utc::now();
        let mut site = Site {
            id: id.clone(),
            name: name.clone(),
            domain,
            port,
            php_version,
            wordpress_version: config
                .wordpress_version
                .unwrap_or_else(|| self.config.wordpress.version.clone()),
            database: DatabaseConfig {
                engine,
                name: identifier.clone(),
                user: identifier,
                password: generate_db_password(),
                port: engine.is_networked().then_some(self.config.database.port),
                root_password: None,
                version: None,
            },
            admin: AdminAccount {
                user: admin_user,
                email: admin_email,
                password: Some(
                    config
                        .admin_password
                        .unwrap_or_else(generate_admin_password),
                ),
            },
            status: SiteStatus::Provisioning,
            last_error: None,
            created_at: now,
            updated_at: now,
            paths: paths.clone(),
        };

        let staging = self
            .registry
            .sites_dir()
            .join(format!("{}{}", STAGING_PREFIX, id));
        match self.provision_into(&staging, &site).await {
            Ok(version) => site.wordpress_version = version,
            Err(e) => {
                discard_dir(&staging).await;
                return Err(e);
            }
        }

        if let Err(e) = tokio::fs::rename(&staging, &paths.root).await {
            discard_dir(&staging).await;
            return Err(Error::provisioning(
                ProvisioningStep::Commit,
                format!("{}: {}", paths.root.display(), e),
            ));
        }

        transition(&mut site, SiteStatus::Stopped)?;
        if let Err(e) = self.registry.upsert(&site).await {
            discard_dir(&paths.root).await;
            return Err(e);
        }
        info!(
            "Created site '{}' ({}) with {} database on port {}",
            site.name, site.id, site.database.engine, site.port
        );
        Ok(site)
    }

    /// Download, extract and configure WordPress in `staging`.
    ///
    /// Returns the WordPress version actually unpacked.
    async fn provision_into(&self, staging: &Path, site: &Site) -> Result<String> {
        let archive = self.provisioner.download(&site.wordpress_version).await?;
        self.provisioner.extract(&archive, staging).await?;
        let version = read_wordpress_version(staging).unwrap_or_else(|| site.wordpress_version.clone());

        let mut staged = site.clone();
        staged.paths = SitePaths::at(staging);
        self.provisioner
            .write_config(&staged, &Salts::generate())
            .await?;
        Ok(version)
    }

    /// Start a site's PHP server, ensuring its database first.
    ///
    /// A networked database that cannot be reached switches the site to
    /// SQLite instead of failing. A PHP server that does not come up leaves
    /// the site in `error`.
    #[tracing::instrument(skip(self))]
    pub async fn start(&self, id: &str) -> Result<Site> {
        let site = self.registry.find(id)?;
        let _guard = self.op_locks.lock(&site.id).await;
        let mut site = self.registry.get(&site.id)?;

        if site.status == SiteStatus::Running {
            if self.is_serving(&site.id) {
                debug!("Site '{}' is already running", site.name);
                return Ok(site);
            }
            // Running without a live process: the exit has not been processed yet.
            site.set_status(SiteStatus::Stopped);
        }

        transition(&mut site, SiteStatus::Starting)?;
        self.registry.upsert(&site).await?;

        match self.start_locked(&mut site).await {
            Ok(()) => Ok(site),
            Err(e) => {
                self.ports.release_site(&site.id);
                site.set_error(e.to_string());
                if let Err(persist) = self.registry.upsert(&site).await {
                    warn!("Failed to record error for '{}': {}", site.name, persist);
                }
                Err(e)
            }
        }
    }

    async fn start_locked(&self, site: &mut Site) -> Result<()> {
        if site.database.engine.is_networked() {
            match self.ensure_database(site).await {
                Ok(record) => self.sync_database_server(site, &record).await?,
                Err(reason) => {
                    warn!(
                        "{} unavailable for site '{}', falling back to SQLite: {}",
                        site.database.engine, site.name, reason
                    );
                    *site = self
                        .provisioner
                        .reconfigure_for_fallback(site, &self.registry)
                        .await?;
                }
            }
        }

        let port = self
            .ports
            .reserve(&site.id, site.port, &self.running_ports(&site.id))?;
        if port != site.port {
            info!("Port {} is busy, site '{}' moves to {}", site.port, site.name, port);
            site.port = port;
        }

        let handle = self.processes.spawn(site).await?;
        self.handles.lock().insert(site.id.clone(), handle.clone());

        transition(site, SiteStatus::Running)?;
        if let Err(e) = self.registry.upsert(site).await {
            self.handles.lock().remove(&site.id);
            if let Err(term) = self.processes.terminate(&handle).await {
                warn!("Failed to stop PHP server {}: {}", handle, term);
            }
            return Err(e);
        }
        info!("Site '{}' running at {}", site.name, site.url());
        Ok(())
    }

    /// Record the engine serving the site, rewriting the config if its port moved.
    async fn sync_database_server(&self, site: &mut Site, record: &DatabaseServerRecord) -> Result<()> {
        let port_moved = site.database.port != Some(record.listen_port);
        let version = Some(record.version.clone());
        if !port_moved && site.database.version == version {
            return Ok(());
        }
        site.database.version = version;
        if port_moved {
            debug!("Database port for '{}' is now {}", site.name, record.listen_port);
            site.database.port = Some(record.listen_port);
            let salts =
                WordPressProvisioner::read_salts(&site.paths).unwrap_or_else(Salts::generate);
            self.provisioner.write_config(site, &salts).await?;
        }
        self.registry.upsert(site).await
    }

    /// Stop a site's PHP server. Database engines keep running.
    #[tracing::instrument(skip(self))]
    pub async fn stop(&self, id: &str) -> Result<Site> {
        let site = self.registry.find(id)?;
        let _guard = self.op_locks.lock(&site.id).await;
        let site = self.registry.get(&site.id)?;
        self.stop_locked(site).await
    }

    pub(super) async fn stop_locked(&self, mut site: Site) -> Result<Site> {
        if site.status == SiteStatus::Stopped {
            return Ok(site);
        }
        if site.status == SiteStatus::Running {
            transition(&mut site, SiteStatus::Stopping)?;
            self.registry.upsert(&site).await?;
        }

        let handle = self.handles.lock().remove(&site.id);
        if let Some(handle) = handle {
            if let Err(e) = self.processes.terminate(&handle).await {
                site.set_error(format!("failed to stop PHP server: {}", e));
                self.registry.upsert(&site).await?;
                return Err(e);
            }
        }
        self.ports.release_site(&site.id);

        transition(&mut site, SiteStatus::Stopped)?;
        self.registry.upsert(&site).await?;
        info!("Site '{}' stopped", site.name);
        Ok(site)
    }

    /// Stop every site this orchestrator is serving.
    pub async fn stop_all(&self) -> Vec<(String, Error)> {
        let ids: Vec<String> = self.handles.lock().keys().cloned().collect();
        let mut failures = Vec::new();
        for id in ids {
            if let Err(e) = self.stop(&id).await {
                failures.push((id, e));
            }
        }
        failures
    }

    /// Remove a site's directory and registry entry.
    ///
    /// A running site is refused unless `force`, which stops it first. If the
    /// directory cannot be removed the site stays registered.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, id: &str, force: bool) -> Result<()> {
        let site = self.registry.find(id)?;
        let guard = self.op_locks.lock(&site.id).await;
        let site = self.registry.get(&site.id)?;

        let site = match site.status {
            SiteStatus::Stopped | SiteStatus::Error if !self.handles.lock().contains_key(&site.id) => site,
            _ if force => self.stop_locked(site).await?,
            status => {
                return Err(Error::StateConflict(format!(
                    "site '{}' is {} (running sites must be stopped before deletion)",
                    site.name, status
                )))
            }
        };

        self.registry.remove(&site.id).await?;
        self.ports.release_site(&site.id);
        self.processes.forget(&site.id);
        drop(guard);
        self.op_locks.forget(&site.id);
        info!(
            "Deleted site '{}'; database '{}' is left in place",
            site.name, site.database.name
        );
        Ok(())
    }

    /// Start an installed engine outside any site lifecycle.
    pub async fn start_engine(&self, engine: ServerEngine) -> Result<DatabaseServerRecord> {
        let record = self.bring_up_engine(engine, None).await?;
        self.db_retry
            .run("database connectivity", || self.databases.probe(&record))
            .await?;
        Ok(record)
    }

    /// Ask running instances of `engine` to shut down.
    ///
    /// Sites using the engine keep their status; their next database access fails.
    pub async fn stop_engine(&self, engine: ServerEngine) -> Result<Vec<DatabaseServerRecord>> {
        let _guard = self.engine_lock.lock().await;
        let running: Vec<DatabaseServerRecord> = self
            .databases
            .discover()
            .await?
            .into_iter()
            .filter(|r| r.engine == engine && r.is_running)
            .collect();
        for record in &running {
            self.databases.stop(record).await?;
        }
        Ok(running)
    }
}

async fn discard_dir(dir: &Path) {
    if dir.exists() {
        if let Err(e) = tokio::fs::remove_dir_all(dir).await {
            warn!("Failed to clean up '{}': {}", dir.display(), e);
        }
    }
}
