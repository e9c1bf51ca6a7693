//! Supervision of the PHP built-in development server, one process per
//! running site.
//!
//! `spawn` resolves only once the server accepts connections. Unexpected
//! exits are reported on a broadcast channel instead of through callbacks,
//! so the orchestrator decides what an exit means for the site.

mod log_capture;
mod process;

pub use log_capture::{LogBuffer, DEFAULT_MAX_LOG_LINES};
pub use process::{detect_php_version, ProcessSupervisor};

use crate::error::Result;
use crate::site::Site;
use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one spawned process of one site.
///
/// Each handle carries a process-unique serial, so a handle from an earlier
/// run never matches a later process even if the OS reuses the pid.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcessHandle {
    site_id: String,
    pid: u32,
    serial: u64,
}

impl ProcessHandle {
    pub fn new(site_id: impl Into<String>, pid: u32) -> Self {
        Self {
            site_id: site_id.into(),
            pid,
            serial: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl fmt::Display for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (PID {})", self.site_id, self.pid)
    }
}

/// A supervised process has exited.
#[derive(Debug, Clone)]
pub struct ProcessExit {
    pub handle: ProcessHandle,
    /// True when the exit followed `terminate` or a failed readiness check.
    pub expected: bool,
    pub code: Option<i32>,
}

/// Launches and tracks per-site server processes.
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// Start the server for `site` and wait until it accepts connections.
    async fn spawn(&self, site: &Site) -> Result<ProcessHandle>;

    fn is_alive(&self, handle: &ProcessHandle) -> bool;

    /// Stop the process behind `handle`. Unknown or exited handles are a no-op.
    async fn terminate(&self, handle: &ProcessHandle) -> Result<()>;

    fn subscribe_exits(&self) -> broadcast::Receiver<ProcessExit>;

    /// Captured output, optionally only the last `tail` lines.
    fn logs(&self, handle: &ProcessHandle, tail: Option<usize>) -> Vec<String>;

    /// Drop all bookkeeping for `site_id`, e.g. after the site is deleted.
    fn forget(&self, site_id: &str);
}
