use super::{LogBuffer, ProcessExit, ProcessHandle, ProcessLauncher};
use crate::config::AppConfig;
use crate::error::{validate_pid, Error, Result};
use crate::port::is_port_listening;
use crate::retry::RetryPolicy;
use crate::site::Site;
use async_trait::async_trait;
use nix::sys::signal::{self, killpg, Signal};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::{broadcast, watch};

/// Time between SIGTERM and SIGKILL.
const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// How long a single readiness probe waits for a TCP connect.
const PROBE_TIMEOUT: Duration = Duration::from_millis(250);

/// Lines of output quoted in a spawn error.
const ERROR_LOG_LINES: usize = 5;

struct Tracked {
    stopping: Arc<AtomicBool>,
    exited: watch::Receiver<bool>,
    logs: LogBuffer,
}

impl Tracked {
    fn has_exited(&self) -> bool {
        *self.exited.borrow()
    }
}

/// Runs `php -S localhost:<port> -t <wordpress dir>` for each started site.
pub struct ProcessSupervisor {
    php_binary: PathBuf,
    readiness: RetryPolicy,
    grace_period: Duration,
    processes: Arc<Mutex<HashMap<ProcessHandle, Tracked>>>,
    exits: broadcast::Sender<ProcessExit>,
}

impl ProcessSupervisor {
    pub fn new(php_binary: impl Into<PathBuf>, readiness: RetryPolicy) -> Self {
        let (exits, _) = broadcast::channel(64);
        Self {
            php_binary: php_binary.into(),
            readiness,
            grace_period: DEFAULT_GRACE_PERIOD,
            processes: Arc::new(Mutex::new(HashMap::new())),
            exits,
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Ok(Self::new(
            config.php.binary.clone(),
            config.php_readiness_retry()?,
        ))
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    fn tracked(&self, handle: &ProcessHandle) -> Option<(Arc<AtomicBool>, watch::Receiver<bool>)> {
        self.processes
            .lock()
            .get(handle)
            .map(|t| (t.stopping.clone(), t.exited.clone()))
    }

    /// Drop bookkeeping for exited processes of `site_id`.
    fn forget_exited(&self, site_id: &str) {
        self.processes
            .lock()
            .retain(|h, t| h.site_id() != site_id || !t.has_exited());
    }

    fn spawn_error(site: &Site, reason: impl Into<String>) -> Error {
        Error::ProcessSpawn {
            site: site.name.clone(),
            reason: reason.into(),
        }
    }

    async fn wait_until_ready(&self, site: &Site, exited: watch::Receiver<bool>) -> Result<()> {
        let port = site.port;
        let probe = self.readiness.run("PHP server readiness", || async move {
            if is_port_listening(port, PROBE_TIMEOUT).await {
                Ok(())
            } else {
                Err(Self::spawn_error(
                    site,
                    format!("nothing is listening on localhost:{}", port),
                ))
            }
        });
        tokio::select! {
            result = probe => result,
            _ = wait_for_exit(exited) => Err(Self::spawn_error(site, "process exited during startup")),
        }
    }

    async fn signal_and_wait(&self, handle: &ProcessHandle, mut exited: watch::Receiver<bool>) -> Result<()> {
        let pid = validate_pid(handle.pid(), handle.site_id())?;
        if *exited.borrow() {
            return Ok(());
        }

        // The server runs in its own process group; signal the group so
        // worker processes (PHP_CLI_SERVER_WORKERS) go with it.
        if killpg(pid, Signal::SIGTERM)
            .or_else(|_| signal::kill(pid, Signal::SIGTERM))
            .is_err()
        {
            tracing::debug!("PHP server {} already gone", handle);
            return Ok(());
        }

        let graceful = tokio::time::timeout(self.grace_period, wait_for_exit(exited.clone())).await;
        if graceful.is_err() {
            tracing::warn!(
                "PHP server {} did not exit after SIGTERM (grace period: {:?}), sending SIGKILL",
                handle,
                self.grace_period
            );
            let _ = killpg(pid, Signal::SIGKILL).or_else(|_| signal::kill(pid, Signal::SIGKILL));
            let _ = tokio::time::timeout(Duration::from_secs(2), exited.wait_for(|e| *e)).await;
        }
        Ok(())
    }
}

async fn wait_for_exit(mut exited: watch::Receiver<bool>) {
    // A closed channel means the waiter task is gone, which only happens after exit.
    let _ = exited.wait_for(|e| *e).await;
}

#[async_trait]
impl ProcessLauncher for ProcessSupervisor {
    #[tracing::instrument(skip(self, site), fields(site.id = %site.id, port = site.port))]
    async fn spawn(&self, site: &Site) -> Result<ProcessHandle> {
        self.forget_exited(&site.id);
        let docroot = &site.paths.wordpress_dir;
        if !docroot.join("index.php").is_file() {
            return Err(Self::spawn_error(
                site,
                format!("{} does not contain WordPress", docroot.display()),
            ));
        }

        let mut cmd = Command::new(&self.php_binary);
        cmd.arg("-S")
            .arg(format!("localhost:{}", site.port))
            .arg("-t")
            .arg(docroot)
            .current_dir(docroot)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .process_group(0);

        let mut child = cmd.spawn().map_err(|e| {
            Self::spawn_error(site, format!("cannot run {}: {}", self.php_binary.display(), e))
        })?;
        let pid = child
            .id()
            .ok_or_else(|| Self::spawn_error(site, "process exited before its PID was read"))?;
        let handle = ProcessHandle::new(site.id.clone(), pid);
        tracing::debug!("Spawned PHP server {}", handle);

        let logs = LogBuffer::default();
        if let Some(stdout) = child.stdout.take() {
            logs.capture(&site.id, "stdout", stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            logs.capture(&site.id, "stderr", stderr);
        }

        let stopping = Arc::new(AtomicBool::new(false));
        let (exited_tx, exited_rx) = watch::channel(false);
        self.processes.lock().insert(
            handle.clone(),
            Tracked {
                stopping: stopping.clone(),
                exited: exited_rx.clone(),
                logs: logs.clone(),
            },
        );

        let exits = self.exits.clone();
        let waiter_handle = handle.clone();
        tokio::spawn(async move {
            let code = match child.wait().await {
                Ok(status) => status.code(),
                Err(e) => {
                    tracing::warn!("Failed to wait for PHP server {}: {}", waiter_handle, e);
                    None
                }
            };
            let expected = stopping.load(Ordering::SeqCst);
            let _ = exited_tx.send(true);
            if expected {
                tracing::debug!("PHP server {} exited (code {:?})", waiter_handle, code);
            } else {
                tracing::warn!("PHP server {} exited unexpectedly (code {:?})", waiter_handle, code);
            }
            // No receivers is fine; nobody is watching this site.
            let _ = exits.send(ProcessExit {
                handle: waiter_handle,
                expected,
                code,
            });
        });

        if let Err(e) = self.wait_until_ready(site, exited_rx.clone()).await {
            if let Some((stopping, _)) = self.tracked(&handle) {
                stopping.store(true, Ordering::SeqCst);
            }
            if let Err(term) = self.signal_and_wait(&handle, exited_rx).await {
                tracing::warn!("Failed to stop PHP server {}: {}", handle, term);
            }
            self.processes.lock().remove(&handle);
            let output = logs.tail(Some(ERROR_LOG_LINES));
            return Err(match (e, output.is_empty()) {
                (Error::ProcessSpawn { site, reason }, false) => Error::ProcessSpawn {
                    site,
                    reason: format!("{}; last output: {}", reason, output.join(" | ")),
                },
                (e, _) => e,
            });
        }

        tracing::info!("PHP server for '{}' listening on localhost:{}", site.name, site.port);
        Ok(handle)
    }

    fn is_alive(&self, handle: &ProcessHandle) -> bool {
        self.processes
            .lock()
            .get(handle)
            .is_some_and(|t| !t.has_exited())
    }

    #[tracing::instrument(skip(self), fields(site.id = %handle.site_id()))]
    async fn terminate(&self, handle: &ProcessHandle) -> Result<()> {
        let Some((stopping, exited)) = self.tracked(handle) else {
            return Ok(());
        };
        stopping.store(true, Ordering::SeqCst);
        let result = self.signal_and_wait(handle, exited).await;
        if result.is_ok() {
            self.processes.lock().remove(handle);
        }
        result
    }

    fn subscribe_exits(&self) -> broadcast::Receiver<ProcessExit> {
        self.exits.subscribe()
    }

    fn logs(&self, handle: &ProcessHandle, tail: Option<usize>) -> Vec<String> {
        self.processes
            .lock()
            .get(handle)
            .map(|t| t.logs.tail(tail))
            .unwrap_or_default()
    }

    fn forget(&self, site_id: &str) {
        self.processes.lock().retain(|h, _| h.site_id() != site_id);
    }
}

/// Version reported by `php -r 'echo PHP_VERSION;'`, if the binary runs.
pub async fn detect_php_version(binary: &Path) -> Option<String> {
    let output = Command::new(binary)
        .args(["-r", "echo PHP_VERSION;"])
        .stdin(Stdio::null())
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if version.is_empty() {
        None
    } else {
        Some(version)
    }
}
