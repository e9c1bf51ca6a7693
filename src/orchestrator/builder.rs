use super::monitor::ExitWatcher;
use super::Orchestrator;
use crate::config::AppConfig;
use crate::database::{DatabaseServerManager, DatabaseServers};
use crate::error::{Error, Result};
use crate::locks::KeyedLocks;
use crate::port::PortAllocator;
use crate::provisioner::WordPressProvisioner;
use crate::registry::{DataDirLock, SiteRegistry};
use crate::retry::RetryPolicy;
use crate::supervisor::{ProcessLauncher, ProcessSupervisor};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Builder for constructing an `Orchestrator` with a fluent API.
///
/// Only the configuration is required. The database servers and process
/// launcher default to the real host-backed implementations and can be
/// replaced, which is how tests run without MySQL or PHP installed.
///
/// # Example
///
/// ```no_run
/// use pressbox::{AppConfig, Orchestrator};
///
/// # async fn example() -> Result<(), pressbox::Error> {
/// let config = AppConfig::load(AppConfig::resolve_data_dir(None)?)?;
/// let orchestrator = Orchestrator::builder().config(config).build().await?;
/// for site in orchestrator.list() {
///     println!("{} {}", site.name, site.status);
/// }
/// # Ok(())
/// # }
/// ```
pub struct OrchestratorBuilder {
    config: Option<AppConfig>,
    databases: Option<Arc<dyn DatabaseServers>>,
    processes: Option<Arc<dyn ProcessLauncher>>,
    db_retry: Option<RetryPolicy>,
    lock_data_dir: bool,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            databases: None,
            processes: None,
            db_retry: None,
            lock_data_dir: true,
        }
    }

    /// Set the configuration. Required.
    pub fn config(mut self, config: AppConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use `databases` instead of discovering engines on the host.
    pub fn database_servers(mut self, databases: Arc<dyn DatabaseServers>) -> Self {
        self.databases = Some(databases);
        self
    }

    /// Use `processes` instead of spawning real PHP servers.
    pub fn process_launcher(mut self, processes: Arc<dyn ProcessLauncher>) -> Self {
        self.processes = Some(processes);
        self
    }

    /// Override `database.connect_retry` from the configuration.
    pub fn database_retry(mut self, policy: RetryPolicy) -> Self {
        self.db_retry = Some(policy);
        self
    }

    /// Whether to take the exclusive lock on the data directory (default: true).
    ///
    /// Read-only commands such as `list` skip it so they work while another
    /// process is serving sites. Without the lock the registry is opened
    /// read-only and recorded statuses are never rewritten.
    pub fn lock_data_dir(mut self, lock: bool) -> Self {
        self.lock_data_dir = lock;
        self
    }

    /// Create the data directory layout, load the registry and start the
    /// exit watcher.
    ///
    /// Must be called inside a Tokio runtime.
    pub async fn build(self) -> Result<Orchestrator> {
        let config = self
            .config
            .ok_or_else(|| Error::Config("config is required".to_string()))?;
        config.validate()?;
        config.ensure_dirs()?;

        let data_lock = if self.lock_data_dir {
            Some(DataDirLock::acquire(&config.lock_file())?)
        } else {
            None
        };

        let registry = if data_lock.is_some() {
            SiteRegistry::load(config.sites_dir())?
        } else {
            let owner_alive = DataDirLock::holder(&config.lock_file()).is_some();
            SiteRegistry::load_read_only(config.sites_dir(), owner_alive)?
        };
        let registry = Arc::new(registry);
        let ports = Arc::new(PortAllocator::new(
            config.port_range_start,
            config.port_scan_window,
        ));
        let databases = match self.databases {
            Some(databases) => databases,
            None => Arc::new(DatabaseServerManager::from_config(&config)),
        };
        let processes = match self.processes {
            Some(processes) => processes,
            None => Arc::new(ProcessSupervisor::from_config(&config)?),
        };
        let db_retry = match self.db_retry {
            Some(policy) => policy,
            None => config.database_retry()?,
        };
        let handles = Arc::new(Mutex::new(HashMap::new()));
        let op_locks = Arc::new(KeyedLocks::new());

        let exit_watcher = ExitWatcher {
            registry: registry.clone(),
            ports: ports.clone(),
            handles: handles.clone(),
            op_locks: op_locks.clone(),
        }
        .spawn(processes.subscribe_exits());

        Ok(Orchestrator {
            provisioner: Arc::new(WordPressProvisioner::from_config(&config)),
            config,
            registry,
            ports,
            databases,
            processes,
            handles,
            op_locks,
            engine_lock: tokio::sync::Mutex::new(()),
            db_retry,
            exit_watcher: Some(exit_watcher),
            _data_lock: data_lock,
        })
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
