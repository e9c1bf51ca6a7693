use crate::error::{validate_pid_for_check, Error, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing::debug;

/// Advisory lock on `<data_dir>/.lock`, held for the lifetime of the value.
///
/// Two control processes managing the same data directory would each keep
/// their own view of running sites, so the second one is refused.
#[derive(Debug)]
pub struct DataDirLock {
    _file: Option<File>,
}

impl DataDirLock {
    pub fn acquire(lock_path: &Path) -> Result<Self> {
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path)
            .map_err(|e| {
                Error::Registry(format!(
                    "Failed to open lock file '{}': {}",
                    lock_path.display(),
                    e
                ))
            })?;

        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {
                let _ = file.set_len(0);
                let _ = writeln!(file, "{}", std::process::id());
                debug!("Acquired data directory lock {:?}", lock_path);
                Ok(Self { _file: Some(file) })
            }
            Err(e) => {
                let owner = std::fs::read_to_string(lock_path)
                    .ok()
                    .and_then(|s| s.trim().parse::<u32>().ok());
                match owner {
                    // Another handle in this same process; it already holds the lock.
                    Some(pid) if pid == std::process::id() => {
                        debug!("Data directory lock already held by this process");
                        Ok(Self { _file: None })
                    }
                    Some(pid) if owner_alive(pid) => Err(Error::StateConflict(format!(
                        "another pressbox process (PID {}) is managing {}",
                        pid,
                        lock_path.parent().unwrap_or(lock_path).display()
                    ))),
                    _ => Err(Error::StateConflict(format!(
                        "data directory is locked ({}): {}",
                        lock_path.display(),
                        e
                    ))),
                }
            }
        }
    }

    /// PID of the live process holding the lock at `lock_path`, if any.
    ///
    /// Only tries a shared lock for a moment, so read-only callers can
    /// tell whether site statuses on disk are being kept current.
    pub fn holder(lock_path: &Path) -> Option<u32> {
        let file = OpenOptions::new().read(true).open(lock_path).ok()?;
        if FileExt::try_lock_shared(&file).is_ok() {
            let _ = FileExt::unlock(&file);
            return None;
        }
        std::fs::read_to_string(lock_path)
            .ok()
            .and_then(|s| s.trim().parse::<u32>().ok())
            .filter(|pid| owner_alive(*pid))
    }
}

fn owner_alive(pid: u32) -> bool {
    match validate_pid_for_check(pid) {
        Some(pid) => nix::sys::signal::kill(pid, None).is_ok(),
        None => false,
    }
}
