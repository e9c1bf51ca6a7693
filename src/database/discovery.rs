//! Filesystem discovery of installed MySQL/MariaDB servers.
//!
//! Two layouts are recognised under each search root:
//!
//! - `<root>/<Engine> <version>` (also `<engine>-<version>...` tarball dirs)
//! - `<root>/<engine>/<version>` (Homebrew Cellar style, including `mysql@8.0/8.0.36`)
//!
//! A candidate only counts if it contains the engine's server executable
//! in `bin/` or directly in the install directory.

use crate::site::DatabaseEngine;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, trace};

/// Database server technology that runs as its own process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerEngine {
    Mysql,
    Mariadb,
}

impl ServerEngine {
    /// The networked engine a site asks for; `None` for sqlite.
    pub fn for_site(engine: DatabaseEngine) -> Option<Self> {
        match engine {
            DatabaseEngine::Mysql => Some(ServerEngine::Mysql),
            DatabaseEngine::Mariadb => Some(ServerEngine::Mariadb),
            DatabaseEngine::Sqlite => None,
        }
    }

    /// Server binaries, most specific first.
    pub fn executable_names(&self) -> &'static [&'static str] {
        match self {
            ServerEngine::Mysql => &["mysqld"],
            ServerEngine::Mariadb => &["mariadbd", "mysqld"],
        }
    }

    fn dir_prefix(&self) -> &'static str {
        match self {
            ServerEngine::Mysql => "mysql",
            ServerEngine::Mariadb => "mariadb",
        }
    }

    const ALL: [ServerEngine; 2] = [ServerEngine::Mysql, ServerEngine::Mariadb];
}

impl fmt::Display for ServerEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_prefix())
    }
}

impl std::str::FromStr for ServerEngine {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mysql" => Ok(ServerEngine::Mysql),
            "mariadb" => Ok(ServerEngine::Mariadb),
            other => Err(crate::error::Error::Validation(format!(
                "unknown database server '{}' (expected mysql or mariadb)",
                other
            ))),
        }
    }
}

/// A discovered database server installation plus its live status.
///
/// Ephemeral: rebuilt on every query, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseServerRecord {
    pub engine: ServerEngine,
    pub version: String,
    pub install_path: PathBuf,
    pub executable_path: PathBuf,
    pub pid: Option<u32>,
    pub listen_port: u16,
    pub is_running: bool,
}

impl DatabaseServerRecord {
    /// Short label used in logs and for the engine's data directory name.
    pub fn label(&self) -> String {
        format!("{}-{}", self.engine, self.version)
    }
}

/// An installation found on disk, before any process matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Installation {
    pub engine: ServerEngine,
    pub version: String,
    pub install_path: PathBuf,
    pub executable_path: PathBuf,
}

static VERSION_REGEX: OnceLock<Regex> = OnceLock::new();

fn version_regex() -> &'static Regex {
    VERSION_REGEX
        .get_or_init(|| Regex::new(r"\d+(?:\.\d+)+").expect("static regex pattern is valid"))
}

/// Dotted numeric version inside `raw`, or `raw` itself when there is none.
pub fn parse_version(raw: &str) -> String {
    version_regex()
        .find(raw)
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| raw.trim().to_string())
}

/// Platform package-manager install roots.
pub fn default_search_roots() -> Vec<PathBuf> {
    let mut roots = Vec::new();
    if cfg!(target_os = "macos") {
        roots.push(PathBuf::from("/opt/homebrew/Cellar"));
        roots.push(PathBuf::from("/usr/local/Cellar"));
        roots.push(PathBuf::from("/usr/local"));
        roots.push(PathBuf::from("/Applications"));
    } else {
        roots.push(PathBuf::from("/opt"));
        roots.push(PathBuf::from("/usr/local"));
        roots.push(PathBuf::from("/home/linuxbrew/.linuxbrew/Cellar"));
    }
    if let Some(home) = dirs::home_dir() {
        roots.push(home.join(".local").join("opt"));
    }
    roots
}

fn find_executable(install: &Path, engine: ServerEngine) -> Option<PathBuf> {
    engine.executable_names().iter().find_map(|name| {
        [install.join("bin").join(name), install.join(name)]
            .into_iter()
            .find(|p| p.is_file())
    })
}

/// `"MySQL 8.0"`, `"mariadb-10.11.6-linux-systemd-x86_64"` -> engine + rest.
fn split_engine_prefix(dir_name: &str) -> Option<(ServerEngine, &str)> {
    let lower = dir_name.to_ascii_lowercase();
    ServerEngine::ALL.into_iter().find_map(|engine| {
        let prefix = engine.dir_prefix();
        let rest = lower.strip_prefix(prefix)?;
        match rest.chars().next() {
            Some(' ') | Some('-') => Some((engine, &dir_name[prefix.len() + 1..])),
            _ => None,
        }
    })
}

/// `"mysql"`, `"mysql@8.0"`, `"MariaDB"` -> engine root directory.
fn engine_root(dir_name: &str) -> Option<ServerEngine> {
    let lower = dir_name.to_ascii_lowercase();
    let base = lower.split('@').next().unwrap_or(&lower);
    ServerEngine::ALL
        .into_iter()
        .find(|engine| base == engine.dir_prefix())
}

fn subdirs(dir: &Path) -> Vec<(String, PathBuf)> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut dirs: Vec<(String, PathBuf)> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .map(|e| (e.file_name().to_string_lossy().to_string(), e.path()))
        .collect();
    dirs.sort();
    dirs
}

/// Scan `roots` for installations. Missing or unreadable roots are skipped;
/// finding nothing is a valid result.
pub fn scan_installations(roots: &[PathBuf]) -> Vec<Installation> {
    let mut seen = HashSet::new();
    let mut found = Vec::new();
    let mut push = |engine: ServerEngine, version: String, install: PathBuf| {
        let Some(executable) = find_executable(&install, engine) else {
            trace!("No {} server binary in {}", engine, install.display());
            return;
        };
        let key = fs::canonicalize(&executable).unwrap_or_else(|_| executable.clone());
        if seen.insert(key) {
            found.push(Installation {
                engine,
                version,
                install_path: install,
                executable_path: executable,
            });
        }
    };

    for root in roots {
        for (name, path) in subdirs(root) {
            if let Some((engine, rest)) = split_engine_prefix(&name) {
                push(engine, parse_version(rest), path);
            } else if let Some(engine) = engine_root(&name) {
                for (version_dir, version_path) in subdirs(&path) {
                    push(engine, parse_version(&version_dir), version_path);
                }
            }
        }
    }

    debug!("Discovered {} database installation(s)", found.len());
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_binary(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "#!/bin/sh\n").unwrap();
    }

    #[test]
    fn version_parsing_keeps_raw_name_when_unparseable() {
        assert_eq!(parse_version("8.0.36"), "8.0.36");
        assert_eq!(parse_version("8.0.36_1"), "8.0.36");
        assert_eq!(parse_version("10.11.6-linux-systemd-x86_64"), "10.11.6");
        assert_eq!(parse_version("nightly"), "nightly");
        assert_eq!(parse_version("8"), "8");
    }

    #[test]
    fn finds_both_layouts() {
        let root = tempfile::tempdir().unwrap();
        fake_binary(&root.path().join("MySQL 8.0").join("bin").join("mysqld"));
        fake_binary(&root.path().join("mariadb").join("10.11.6").join("bin").join("mariadbd"));
        fake_binary(&root.path().join("mysql@5.7").join("5.7.44").join("mysqld"));

        let found = scan_installations(&[root.path().to_path_buf()]);
        assert_eq!(found.len(), 3);

        let mysql8 = found.iter().find(|i| i.version == "8.0").unwrap();
        assert_eq!(mysql8.engine, ServerEngine::Mysql);
        assert!(mysql8.executable_path.ends_with("bin/mysqld"));

        let maria = found.iter().find(|i| i.engine == ServerEngine::Mariadb).unwrap();
        assert_eq!(maria.version, "10.11.6");

        assert!(found.iter().any(|i| i.version == "5.7.44"));
    }

    #[test]
    fn directories_without_a_server_binary_are_ignored() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("MySQL 8.0").join("bin")).unwrap();
        fake_binary(&root.path().join("mysql").join("8.1.0").join("bin").join("mysql"));
        fs::create_dir_all(root.path().join("mysqlfoo").join("1.0").join("bin")).unwrap();

        assert!(scan_installations(&[root.path().to_path_buf()]).is_empty());
    }

    #[test]
    fn missing_roots_are_not_an_error() {
        let found = scan_installations(&[PathBuf::from("/definitely/not/here")]);
        assert!(found.is_empty());
    }

    #[test]
    fn duplicate_roots_are_deduplicated() {
        let root = tempfile::tempdir().unwrap();
        fake_binary(&root.path().join("mysql").join("8.0.36").join("bin").join("mysqld"));
        let roots = vec![root.path().to_path_buf(), root.path().to_path_buf()];
        assert_eq!(scan_installations(&roots).len(), 1);
    }

    #[test]
    fn unparseable_version_dir_is_kept_verbatim() {
        let root = tempfile::tempdir().unwrap();
        fake_binary(&root.path().join("MariaDB").join("current").join("bin").join("mysqld"));
        let found = scan_installations(&[root.path().to_path_buf()]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].version, "current");
        assert_eq!(found[0].engine, ServerEngine::Mariadb);
    }
}
