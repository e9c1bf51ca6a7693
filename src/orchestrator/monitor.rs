//! Reacts to PHP servers that exit without being asked to.

use crate::locks::KeyedLocks;
use crate::port::PortAllocator;
use crate::registry::SiteRegistry;
use crate::supervisor::{ProcessExit, ProcessHandle};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, warn};

/// State the watcher shares with the orchestrator.
pub(super) struct ExitWatcher {
    pub registry: Arc<SiteRegistry>,
    pub ports: Arc<PortAllocator>,
    pub handles: Arc<Mutex<HashMap<String, ProcessHandle>>>,
    pub op_locks: Arc<KeyedLocks>,
}

impl ExitWatcher {
    pub fn spawn(self, mut exits: broadcast::Receiver<ProcessExit>) -> JoinHandle<()> {
        let watcher = Arc::new(self);
        tokio::spawn(async move {
            loop {
                match exits.recv().await {
                    Ok(exit) if exit.expected => {}
                    Ok(exit) => {
                        // The site's operation lock may be held by a start in
                        // progress; don't hold up other exits behind it.
                        let watcher = watcher.clone();
                        tokio::spawn(async move { watcher.handle_crash(exit).await });
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("Exit watcher missed {} process exit event(s)", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Mark the site `error` if `exit` is for the process currently serving it.
    async fn handle_crash(&self, exit: ProcessExit) {
        let site_id = exit.handle.site_id().to_string();
        let _guard = self.op_locks.lock(&site_id).await;
        {
            let mut handles = self.handles.lock();
            if handles.get(&site_id) != Some(&exit.handle) {
                return;
            }
            handles.remove(&site_id);
        }
        self.ports.release_site(&site_id);

        let mut site = match self.registry.get(&site_id) {
            Ok(site) => site,
            Err(_) => return,
        };
        let message = match exit.code {
            Some(code) => format!("PHP server exited unexpectedly with code {}", code),
            None => "PHP server was killed by a signal".to_string(),
        };
        warn!("Site '{}': {}", site.name, message);
        site.set_error(message);
        if let Err(e) = self.registry.upsert(&site).await {
            error!("Failed to record crash of site '{}': {}", site.name, e);
        }
    }
}
