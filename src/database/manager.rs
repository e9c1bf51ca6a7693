use super::client::{self, ServerCredentials};
use super::discovery::{
    default_search_roots, scan_installations, DatabaseServerRecord, Installation, ServerEngine,
};
use crate::config::AppConfig;
use crate::error::{validate_pid, Error, Result};
use crate::site::DatabaseConfig;
use async_trait::async_trait;
use nix::sys::signal::{self, Signal};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// How long a freshly spawned engine must survive before `start` reports success.
const EARLY_EXIT_WINDOW: Duration = Duration::from_millis(300);

/// Operations on host database servers.
///
/// Engines are a shared host resource: `start` is "ensure running" from the
/// caller's point of view, and `stop` never escalates past SIGTERM.
#[async_trait]
pub trait DatabaseServers: Send + Sync {
    /// Installed engines with their live status. Finding none is `Ok(vec![])`.
    async fn discover(&self) -> Result<Vec<DatabaseServerRecord>>;

    /// Refresh `is_running`/`pid`/`listen_port` for one record.
    async fn status(&self, record: &DatabaseServerRecord) -> Result<DatabaseServerRecord>;

    /// Spawn the engine without waiting for it to accept connections.
    async fn start(&self, record: &DatabaseServerRecord) -> Result<DatabaseServerRecord>;

    /// Send SIGTERM to the engine's pid. Best-effort.
    async fn stop(&self, record: &DatabaseServerRecord) -> Result<()>;

    /// One connection attempt with the configured root credentials.
    async fn probe(&self, record: &DatabaseServerRecord) -> Result<()>;

    /// Create the site's database and user if absent and verify access.
    async fn ensure_site_database(
        &self,
        record: &DatabaseServerRecord,
        db: &DatabaseConfig,
    ) -> Result<()>;
}

/// Real implementation backed by the filesystem, `sysinfo` and the MySQL protocol.
#[derive(Debug, Clone)]
pub struct DatabaseServerManager {
    search_roots: Vec<PathBuf>,
    engines_dir: PathBuf,
    default_port: u16,
    root_user: String,
    root_password: String,
}

impl DatabaseServerManager {
    pub fn new(
        search_roots: Vec<PathBuf>,
        engines_dir: PathBuf,
        default_port: u16,
        root_user: impl Into<String>,
        root_password: impl Into<String>,
    ) -> Self {
        Self {
            search_roots,
            engines_dir,
            default_port,
            root_user: root_user.into(),
            root_password: root_password.into(),
        }
    }

    /// Configured roots first, then the platform defaults unless disabled.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut roots = config.database.search_roots.clone();
        if !config.database.skip_default_roots {
            roots.extend(default_search_roots());
        }
        Self::new(
            roots,
            config.engines_dir(),
            config.database.port,
            config.database.root_user.clone(),
            config.database.root_password.clone(),
        )
    }

    pub fn search_roots(&self) -> &[PathBuf] {
        &self.search_roots
    }

    /// `<engines>/<engine>-<version>/`, holding data, socket, pid file and log.
    pub fn engine_dir(&self, record: &DatabaseServerRecord) -> PathBuf {
        self.engines_dir.join(record.label())
    }

    fn root_credentials(&self, record: &DatabaseServerRecord) -> ServerCredentials {
        ServerCredentials::local(record.listen_port, &self.root_user, &self.root_password)
    }

    #[tracing::instrument(skip(self, record), fields(engine = %record.label()))]
    async fn initialize_data_dir(&self, record: &DatabaseServerRecord, data_dir: &Path) -> Result<()> {
        if data_dir.exists() {
            // Leftover from an interrupted initialization; initializers refuse non-empty dirs.
            std::fs::remove_dir_all(data_dir)?;
        }
        if let Some(parent) = data_dir.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let basedir = format!("--basedir={}", record.install_path.display());
        let datadir = format!("--datadir={}", data_dir.display());
        let mut cmd = match record.engine {
            ServerEngine::Mysql => {
                let mut cmd = Command::new(&record.executable_path);
                cmd.args(["--no-defaults", "--initialize-insecure", &basedir, &datadir]);
                cmd
            }
            ServerEngine::Mariadb => {
                let tool = install_db_tool(&record.install_path).ok_or_else(|| {
                    Error::DatabaseConnection(format!(
                        "{}: no mariadb-install-db or mysql_install_db found",
                        record.label()
                    ))
                })?;
                let mut cmd = Command::new(tool);
                cmd.args([
                    "--no-defaults",
                    &basedir,
                    &datadir,
                    "--auth-root-authentication-method=normal",
                ]);
                cmd
            }
        };

        info!("Initializing data directory {}", data_dir.display());
        let output = cmd
            .current_dir(&record.install_path)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                Error::DatabaseConnection(format!("{}: cannot run initializer: {}", record.label(), e))
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
            return Err(Error::DatabaseConnection(format!(
                "{}: data directory initialization failed ({}): {}",
                record.label(),
                output.status,
                tail.into_iter().rev().collect::<Vec<_>>().join(" | ")
            )));
        }
        Ok(())
    }
}

fn install_db_tool(install: &Path) -> Option<PathBuf> {
    ["mariadb-install-db", "mysql_install_db"]
        .iter()
        .flat_map(|name| [install.join("bin").join(name), install.join("scripts").join(name)])
        .find(|p| p.is_file())
}

/// `--port=3307`, `--port 3307`, `-P3307` or `-P 3307`.
pub fn listen_port_from_args<S: AsRef<str>>(args: &[S]) -> Option<u16> {
    let mut iter = args.iter().map(|a| a.as_ref());
    while let Some(arg) = iter.next() {
        let value = if let Some(v) = arg.strip_prefix("--port=") {
            Some(v.to_string())
        } else if arg == "--port" || arg == "-P" {
            iter.next().map(str::to_string)
        } else {
            arg.strip_prefix("-P").map(str::to_string)
        };
        if let Some(port) = value.and_then(|v| v.parse::<u16>().ok()) {
            return Some(port);
        }
    }
    None
}

fn same_executable(exe: &Path, target: &Path) -> bool {
    exe == target
        || std::fs::canonicalize(exe)
            .map(|c| c == target)
            .unwrap_or(false)
}

/// Attach live process status to each installation.
///
/// An installation counts as running only when a process whose executable
/// path is exactly its server binary exists; an open port is not enough.
fn match_processes(installs: Vec<Installation>, default_port: u16) -> Vec<DatabaseServerRecord> {
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::All,
        true,
        ProcessRefreshKind::everything(),
    );

    installs
        .into_iter()
        .map(|inst| {
            let target = std::fs::canonicalize(&inst.executable_path)
                .unwrap_or_else(|_| inst.executable_path.clone());
            let process = system.processes().values().find(|p| {
                p.exe()
                    .map(|exe| same_executable(exe, &target))
                    .unwrap_or(false)
            });
            let (pid, listen_port) = match process {
                Some(p) => {
                    let args: Vec<String> = p
                        .cmd()
                        .iter()
                        .map(|s| s.to_string_lossy().to_string())
                        .collect();
                    (
                        Some(p.pid().as_u32()),
                        listen_port_from_args(&args).unwrap_or(default_port),
                    )
                }
                None => (None, default_port),
            };
            DatabaseServerRecord {
                engine: inst.engine,
                version: inst.version,
                install_path: inst.install_path,
                executable_path: inst.executable_path,
                pid,
                listen_port,
                is_running: pid.is_some(),
            }
        })
        .collect()
}

#[async_trait]
impl DatabaseServers for DatabaseServerManager {
    async fn discover(&self) -> Result<Vec<DatabaseServerRecord>> {
        let roots = self.search_roots.clone();
        let default_port = self.default_port;
        tokio::task::spawn_blocking(move || match_processes(scan_installations(&roots), default_port))
            .await
            .map_err(|e| Error::DatabaseConnection(format!("discovery task failed: {}", e)))
    }

    async fn status(&self, record: &DatabaseServerRecord) -> Result<DatabaseServerRecord> {
        let install = Installation {
            engine: record.engine,
            version: record.version.clone(),
            install_path: record.install_path.clone(),
            executable_path: record.executable_path.clone(),
        };
        let default_port = self.default_port;
        let mut refreshed = tokio::task::spawn_blocking(move || match_processes(vec![install], default_port))
            .await
            .map_err(|e| Error::DatabaseConnection(format!("status task failed: {}", e)))?;
        refreshed
            .pop()
            .ok_or_else(|| Error::DatabaseConnection(format!("{} disappeared", record.label())))
    }

    #[tracing::instrument(skip(self, record), fields(engine = %record.label()))]
    async fn start(&self, record: &DatabaseServerRecord) -> Result<DatabaseServerRecord> {
        if record.is_running {
            return Ok(record.clone());
        }
        let engine_dir = self.engine_dir(record);
        let data_dir = engine_dir.join("data");
        if !data_dir.join("mysql").is_dir() {
            self.initialize_data_dir(record, &data_dir).await?;
        }

        let log_path = engine_dir.join("server.log");
        let log = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        let mut cmd = Command::new(&record.executable_path);
        cmd.arg("--no-defaults")
            .arg(format!("--basedir={}", record.install_path.display()))
            .arg(format!("--datadir={}", data_dir.display()))
            .arg(format!("--port={}", record.listen_port))
            .arg("--bind-address=127.0.0.1")
            .arg(format!("--socket={}", engine_dir.join("mysqld.sock").display()))
            .arg(format!("--pid-file={}", engine_dir.join("mysqld.pid").display()));
        if record.engine == ServerEngine::Mysql {
            cmd.arg("--mysqlx=OFF");
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log))
            .kill_on_drop(false);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| {
            Error::DatabaseConnection(format!("failed to spawn {}: {}", record.label(), e))
        })?;
        let pid = child.id().ok_or_else(|| {
            Error::DatabaseConnection(format!("{} exited immediately", record.label()))
        })?;

        tokio::time::sleep(EARLY_EXIT_WINDOW).await;
        if let Ok(Some(status)) = child.try_wait() {
            return Err(Error::DatabaseConnection(format!(
                "{} exited during startup ({}); see {}",
                record.label(),
                status,
                log_path.display()
            )));
        }

        // Reap the engine if it ever exits while we are alive.
        let label = record.label();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => debug!("Database engine {} exited: {}", label, status),
                Err(e) => debug!("Failed to wait for database engine {}: {}", label, e),
            }
        });

        info!("Started {} (PID {}) on port {}", record.label(), pid, record.listen_port);
        Ok(DatabaseServerRecord {
            pid: Some(pid),
            is_running: true,
            ..record.clone()
        })
    }

    async fn stop(&self, record: &DatabaseServerRecord) -> Result<()> {
        let Some(pid) = record.pid else {
            debug!("{} is not running, nothing to stop", record.label());
            return Ok(());
        };
        let nix_pid = validate_pid(pid, &record.label())?;
        match signal::kill(nix_pid, Signal::SIGTERM) {
            Ok(()) => {
                info!("Sent SIGTERM to {} (PID {})", record.label(), pid);
                Ok(())
            }
            Err(nix::errno::Errno::ESRCH) => Ok(()),
            Err(e) => {
                warn!("Failed to signal {} (PID {}): {}", record.label(), pid, e);
                Err(Error::DatabaseConnection(format!(
                    "cannot stop {}: {}",
                    record.label(),
                    e
                )))
            }
        }
    }

    async fn probe(&self, record: &DatabaseServerRecord) -> Result<()> {
        client::ping(&self.root_credentials(record)).await
    }

    async fn ensure_site_database(
        &self,
        record: &DatabaseServerRecord,
        db: &DatabaseConfig,
    ) -> Result<()> {
        let mut root = self.root_credentials(record);
        if let Some(password) = &db.root_password {
            root.password = password.clone();
        }
        client::ensure_site_database(&root, db).await
    }
}
