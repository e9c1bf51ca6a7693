//! Shared fixtures: fake database servers, a fake PHP launcher, and a data
//! directory whose download cache is pre-seeded so nothing touches the network.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use pressbox::site::DatabaseConfig;
use pressbox::{
    AppConfig, DatabaseServerRecord, DatabaseServers, Error, Orchestrator, ProcessExit,
    ProcessHandle, ProcessLauncher, Result, RetryPolicy, ServerEngine, Site,
};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;

pub const WORDPRESS_VERSION: &str = "6.4.2";

/// Database servers that exist only in memory.
#[derive(Default)]
pub struct FakeDatabases {
    records: Mutex<Vec<DatabaseServerRecord>>,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub probe_fails: AtomicBool,
    pub start_delay: Mutex<Duration>,
    pub connect_delay: Mutex<Duration>,
    connects_in_flight: AtomicUsize,
    pub max_connects_in_flight: AtomicUsize,
    pub site_databases: Mutex<Vec<String>>,
    next_pid: AtomicU32,
}

impl FakeDatabases {
    pub fn none() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// One installed, stopped MySQL server.
    pub fn with_stopped_mysql() -> Arc<Self> {
        let fake = Self::default();
        fake.records.lock().push(DatabaseServerRecord {
            engine: ServerEngine::Mysql,
            version: "8.0.36".to_string(),
            install_path: PathBuf::from("/opt/mysql/8.0.36"),
            executable_path: PathBuf::from("/opt/mysql/8.0.36/bin/mysqld"),
            pid: None,
            listen_port: 3306,
            is_running: false,
        });
        Arc::new(fake)
    }

    pub fn is_running(&self) -> bool {
        self.records.lock().iter().any(|r| r.is_running)
    }

    fn update(&self, record: &DatabaseServerRecord, running: bool) -> DatabaseServerRecord {
        let mut records = self.records.lock();
        let stored = records
            .iter_mut()
            .find(|r| r.executable_path == record.executable_path)
            .expect("record was discovered");
        stored.is_running = running;
        stored.pid = running.then(|| 5000 + self.next_pid.fetch_add(1, Ordering::SeqCst));
        stored.clone()
    }
}

#[async_trait]
impl DatabaseServers for FakeDatabases {
    async fn discover(&self) -> Result<Vec<DatabaseServerRecord>> {
        Ok(self.records.lock().clone())
    }

    async fn status(&self, record: &DatabaseServerRecord) -> Result<DatabaseServerRecord> {
        self.records
            .lock()
            .iter()
            .find(|r| r.executable_path == record.executable_path)
            .cloned()
            .ok_or_else(|| Error::DatabaseConnection("gone".to_string()))
    }

    async fn start(&self, record: &DatabaseServerRecord) -> Result<DatabaseServerRecord> {
        let delay = *self.start_delay.lock();
        tokio::time::sleep(delay).await;
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(self.update(record, true))
    }

    async fn stop(&self, record: &DatabaseServerRecord) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.update(record, false);
        Ok(())
    }

    async fn probe(&self, record: &DatabaseServerRecord) -> Result<()> {
        let in_flight = self.connects_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_connects_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        let delay = *self.connect_delay.lock();
        tokio::time::sleep(delay).await;
        self.connects_in_flight.fetch_sub(1, Ordering::SeqCst);

        let running = self.status(record).await?.is_running;
        if running && !self.probe_fails.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::DatabaseConnection(format!(
                "cannot connect to {}",
                record.label()
            )))
        }
    }

    async fn ensure_site_database(
        &self,
        _record: &DatabaseServerRecord,
        db: &DatabaseConfig,
    ) -> Result<()> {
        let mut databases = self.site_databases.lock();
        if !databases.contains(&db.name) {
            databases.push(db.name.clone());
        }
        Ok(())
    }
}

/// PHP servers that exist only in memory.
pub struct FakeLauncher {
    alive: Mutex<HashMap<ProcessHandle, u16>>,
    pub spawns: AtomicUsize,
    pub fail_spawn: AtomicBool,
    pub spawn_delay: Mutex<Duration>,
    pub forgotten: Mutex<Vec<String>>,
    next_pid: AtomicU32,
    exits: broadcast::Sender<ProcessExit>,
}

impl FakeLauncher {
    pub fn new() -> Arc<Self> {
        let (exits, _) = broadcast::channel(16);
        Arc::new(Self {
            alive: Mutex::new(HashMap::new()),
            spawns: AtomicUsize::new(0),
            fail_spawn: AtomicBool::new(false),
            spawn_delay: Mutex::new(Duration::ZERO),
            forgotten: Mutex::new(Vec::new()),
            next_pid: AtomicU32::new(20_000),
            exits,
        })
    }

    pub fn alive_for(&self, site_id: &str) -> usize {
        self.alive
            .lock()
            .keys()
            .filter(|h| h.site_id() == site_id)
            .count()
    }

    pub fn ports_in_use(&self) -> Vec<u16> {
        self.alive.lock().values().copied().collect()
    }

    /// Simulate the server for `site_id` dying on its own.
    pub fn crash(&self, site_id: &str) {
        let handle = {
            let mut alive = self.alive.lock();
            let handle = alive.keys().find(|h| h.site_id() == site_id).cloned();
            if let Some(handle) = &handle {
                alive.remove(handle);
            }
            handle
        };
        if let Some(handle) = handle {
            let _ = self.exits.send(ProcessExit {
                handle,
                expected: false,
                code: Some(255),
            });
        }
    }
}

#[async_trait]
impl ProcessLauncher for FakeLauncher {
    async fn spawn(&self, site: &Site) -> Result<ProcessHandle> {
        let delay = *self.spawn_delay.lock();
        tokio::time::sleep(delay).await;
        if self.fail_spawn.load(Ordering::SeqCst) {
            return Err(Error::ProcessSpawn {
                site: site.name.clone(),
                reason: "php: command not found".to_string(),
            });
        }
        assert!(
            site.paths.wordpress_dir.join("index.php").is_file(),
            "spawned without WordPress files"
        );
        self.spawns.fetch_add(1, Ordering::SeqCst);
        let handle = ProcessHandle::new(site.id.clone(), self.next_pid.fetch_add(1, Ordering::SeqCst));
        self.alive.lock().insert(handle.clone(), site.port);
        Ok(handle)
    }

    fn is_alive(&self, handle: &ProcessHandle) -> bool {
        self.alive.lock().contains_key(handle)
    }

    async fn terminate(&self, handle: &ProcessHandle) -> Result<()> {
        if self.alive.lock().remove(handle).is_some() {
            let _ = self.exits.send(ProcessExit {
                handle: handle.clone(),
                expected: true,
                code: Some(0),
            });
        }
        Ok(())
    }

    fn subscribe_exits(&self) -> broadcast::Receiver<ProcessExit> {
        self.exits.subscribe()
    }

    fn logs(&self, _handle: &ProcessHandle, _tail: Option<usize>) -> Vec<String> {
        Vec::new()
    }

    fn forget(&self, site_id: &str) {
        self.forgotten.lock().push(site_id.to_string());
    }
}

pub fn build_zip(path: &Path, files: &[(&str, &str)]) {
    let file = std::fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();
    for (name, content) in files {
        zip.start_file(*name, options).unwrap();
        zip.write_all(content.as_bytes()).unwrap();
    }
    zip.finish().unwrap();
}

/// A data directory with WordPress core and the SQLite plugin already cached.
pub struct Harness {
    pub dir: TempDir,
    pub config: AppConfig,
    pub databases: Arc<FakeDatabases>,
    pub launcher: Arc<FakeLauncher>,
}

impl Harness {
    pub fn new(databases: Arc<FakeDatabases>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::with_data_dir(dir.path().join("home"));
        config.port_range_start = 38_000;
        config.port_scan_window = 500;
        config.php.version = "8.2".to_string();
        // Unroutable: any download attempt fails fast.
        config.wordpress.download_url = "http://127.0.0.1:1".to_string();
        config.wordpress.sqlite_plugin_url = "http://127.0.0.1:1/plugin.zip".to_string();
        config.ensure_dirs().unwrap();

        build_zip(
            &config
                .cache_dir()
                .join(format!("wordpress-{}.zip", config.wordpress.version)),
            &[
                ("wordpress/index.php", "<?php require __DIR__ . '/wp-blog-header.php';"),
                ("wordpress/wp-settings.php", "<?php"),
                (
                    "wordpress/wp-includes/version.php",
                    "<?php\n$wp_version = '6.4.2';\n",
                ),
                ("wordpress/wp-content/index.php", "<?php"),
            ],
        );
        build_zip(
            &config.cache_dir().join("sqlite-database-integration.zip"),
            &[
                ("sqlite-database-integration/load.php", "<?php"),
                ("sqlite-database-integration/wp-includes/sqlite/db.php", "<?php"),
            ],
        );

        Self {
            dir,
            config,
            databases,
            launcher: FakeLauncher::new(),
        }
    }

    pub async fn orchestrator(&self) -> Orchestrator {
        Orchestrator::builder()
            .config(self.config.clone())
            .database_servers(self.databases.clone())
            .process_launcher(self.launcher.clone())
            .database_retry(RetryPolicy::new(
                3,
                Duration::from_millis(5),
                Duration::from_millis(10),
            ))
            .build()
            .await
            .unwrap()
    }

    /// A second orchestrator over the same data directory that does not
    /// take the data directory lock, like `pressbox list`.
    pub async fn reader(&self) -> Orchestrator {
        Orchestrator::builder()
            .config(self.config.clone())
            .database_servers(self.databases.clone())
            .process_launcher(FakeLauncher::new())
            .lock_data_dir(false)
            .build()
            .await
            .unwrap()
    }

    pub fn read_config(&self, site: &Site) -> String {
        std::fs::read_to_string(self.config.sites_dir().join(&site.name).join("wp-config.php"))
            .unwrap()
    }

    pub fn read_record(&self, site: &Site) -> serde_json::Value {
        let path = self
            .config
            .sites_dir()
            .join(&site.name)
            .join("pressbox-config.json");
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
