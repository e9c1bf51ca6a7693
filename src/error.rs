// Allow unused_assignments at module level because thiserror's generated code
// for struct variants triggers false positive warnings - the fields ARE used
// in the Display impl but rustc's lint pass doesn't see this.
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::fmt;
use std::io;
use thiserror::Error;

/// Step of site provisioning that failed, so a download failure reads
/// differently from a disk-full failure while extracting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningStep {
    Download,
    Extract,
    WriteConfig,
    SqliteSetup,
    Commit,
}

impl fmt::Display for ProvisioningStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvisioningStep::Download => write!(f, "download"),
            ProvisioningStep::Extract => write!(f, "extract"),
            ProvisioningStep::WriteConfig => write!(f, "write config"),
            ProvisioningStep::SqliteSetup => write!(f, "sqlite setup"),
            ProvisioningStep::Commit => write!(f, "commit"),
        }
    }
}

#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    #[error("Invalid site configuration: {0}")]
    #[diagnostic(
        code(pressbox::validation),
        help("Site names may only contain letters, digits, '-' and '_'")
    )]
    Validation(String),

    #[error("Provisioning failed during {step}: {reason}")]
    #[diagnostic(code(pressbox::provisioning))]
    Provisioning {
        step: ProvisioningStep,
        reason: String,
    },

    #[error("Port allocation failed: {0}")]
    #[diagnostic(
        code(pressbox::port::allocation_failed),
        help("Stop other sites or raise `port_scan_window` in config.yaml")
    )]
    PortAllocation(String),

    #[error("Database connection failed: {0}")]
    #[diagnostic(code(pressbox::database::connection))]
    DatabaseConnection(String),

    #[error("PHP server for site '{site}' failed to start: {reason}")]
    #[diagnostic(
        code(pressbox::process::spawn_failed),
        help("Check that `php` is installed and on PATH, or set `php.binary` in config.yaml")
    )]
    ProcessSpawn { site: String, reason: String },

    #[error("Operation rejected: {0}")]
    #[diagnostic(code(pressbox::state::conflict))]
    StateConflict(String),

    #[error("Site not found: {0}")]
    #[diagnostic(
        code(pressbox::site::not_found),
        help("List registered sites with `pressbox list`")
    )]
    SiteNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Site registry error: {0}")]
    Registry(String),

    #[error("Invalid PID {pid}: {reason}")]
    InvalidPid { pid: u32, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn provisioning(step: ProvisioningStep, reason: impl fmt::Display) -> Self {
        Error::Provisioning {
            step,
            reason: reason.to_string(),
        }
    }

    /// Returns a helpful suggestion for resolving this error, if available.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Error::Provisioning {
                step: ProvisioningStep::Download,
                ..
            } => Some(
                "WordPress core could not be downloaded. Check your internet connection; \
                 once an archive is cached in ~/.pressbox/cache, creation works offline."
                    .to_string(),
            ),
            Error::Provisioning { .. } => Some(
                "Check free disk space and permissions on the pressbox data directory.".to_string(),
            ),
            Error::PortAllocation(_) => Some(
                "No free port was found. Stop some sites or raise `port_scan_window`.".to_string(),
            ),
            Error::ProcessSpawn { site, .. } => Some(format!(
                "Verify `php -v` works, then retry with: pressbox up {}",
                site
            )),
            Error::StateConflict(msg) if msg.contains("running") => Some(
                "Stop the site first, or pass --force to stop and delete it.".to_string(),
            ),
            Error::SiteNotFound(_) => Some("Run `pressbox list` to see registered sites.".to_string()),
            Error::Config(_) | Error::Yaml(_) => {
                Some("Check ~/.pressbox/config.yaml for typos.".to_string())
            }
            Error::Registry(_) => Some(
                "A site record could not be written. Check permissions on ~/.pressbox/sites."
                    .to_string(),
            ),
            _ => None,
        }
    }

    /// Formats the error with its suggestion (if any) for user-friendly display.
    pub fn with_suggestion(&self) -> String {
        match self.suggestion() {
            Some(suggestion) => format!("{}\n\nHint: {}", self, suggestion),
            None => self.to_string(),
        }
    }
}

/// Validates and converts a u32 PID to nix::unistd::Pid safely.
/// Returns Err for PID 0 (process group), PID 1 (init), or values > i32::MAX.
pub fn validate_pid(pid: u32, owner: &str) -> Result<nix::unistd::Pid> {
    if pid == 0 {
        return Err(Error::InvalidPid {
            pid,
            reason: format!(
                "PID 0 is invalid for '{}' (refers to process group, not a process)",
                owner
            ),
        });
    }
    if pid == 1 {
        return Err(Error::InvalidPid {
            pid,
            reason: format!("refusing to signal PID 1 (init) for '{}'", owner),
        });
    }
    if pid > i32::MAX as u32 {
        return Err(Error::InvalidPid {
            pid,
            reason: format!("PID {} exceeds i32::MAX for '{}'", pid, owner),
        });
    }
    Ok(nix::unistd::Pid::from_raw(pid as i32))
}

/// Same as validate_pid but allows PID 1 for read-only existence checks.
pub fn validate_pid_for_check(pid: u32) -> Option<nix::unistd::Pid> {
    if pid == 0 || pid > i32::MAX as u32 {
        return None;
    }
    Some(nix::unistd::Pid::from_raw(pid as i32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_pid_rejects_zero_and_init() {
        assert!(validate_pid(0, "demo").is_err());
        assert!(validate_pid(1, "demo").is_err());
        assert!(validate_pid(u32::MAX, "demo").is_err());
        assert_eq!(validate_pid(4242, "demo").unwrap().as_raw(), 4242);
    }

    #[test]
    fn validate_pid_for_check_allows_init() {
        assert!(validate_pid_for_check(1).is_some());
        assert!(validate_pid_for_check(0).is_none());
    }

    #[test]
    fn provisioning_error_names_the_step() {
        let err = Error::provisioning(ProvisioningStep::Download, "connection refused");
        assert_eq!(
            err.to_string(),
            "Provisioning failed during download: connection refused"
        );
        assert!(err.suggestion().unwrap().contains("internet"));
    }

    #[test]
    fn state_conflict_hint_mentions_force() {
        let err = Error::StateConflict("site 'demo' is running".to_string());
        assert!(err.with_suggestion().contains("--force"));
    }
}
