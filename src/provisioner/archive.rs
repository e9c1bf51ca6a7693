//! Zip extraction for WordPress core and plugin archives.

use crate::error::{Error, ProvisioningStep, Result};
use regex::Regex;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, warn};
use zip::ZipArchive;

/// Maximum number of entries accepted from one archive.
const MAX_FILE_COUNT: usize = 20_000;

fn extract_error(archive: &Path, e: impl std::fmt::Display) -> Error {
    Error::provisioning(
        ProvisioningStep::Extract,
        format!("{}: {}", archive.display(), e),
    )
}

/// Relative output path for an entry, with `strip_prefix` removed.
///
/// `None` for entries that would land outside the destination, and for the
/// stripped prefix directory itself.
fn entry_path(name: &str, strip_prefix: Option<&str>) -> Option<PathBuf> {
    let path = Path::new(name);
    if path
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return None;
    }
    let path = match strip_prefix {
        Some(prefix) => path.strip_prefix(prefix).ok()?,
        None => path,
    };
    if path.as_os_str().is_empty() {
        None
    } else {
        Some(path.to_path_buf())
    }
}

/// Extract `archive` into `dest`, dropping a leading `strip_prefix` directory.
///
/// Blocking; callers run it on the blocking pool. Returns the number of files written.
pub fn extract_zip(archive: &Path, dest: &Path, strip_prefix: Option<&str>) -> Result<usize> {
    let file = fs::File::open(archive).map_err(|e| extract_error(archive, e))?;
    let mut zip = ZipArchive::new(file).map_err(|e| extract_error(archive, e))?;
    if zip.len() == 0 {
        return Err(extract_error(archive, "archive is empty"));
    }
    if zip.len() > MAX_FILE_COUNT {
        return Err(extract_error(
            archive,
            format!("too many entries ({} > {})", zip.len(), MAX_FILE_COUNT),
        ));
    }

    fs::create_dir_all(dest).map_err(|e| extract_error(archive, e))?;
    let mut written = 0;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(|e| extract_error(archive, e))?;
        let name = entry.name().to_string();
        let Some(relative) = entry_path(&name, strip_prefix) else {
            let is_prefix_dir = strip_prefix.is_some_and(|p| name.trim_end_matches('/') == p);
            if !is_prefix_dir {
                warn!("Skipping archive entry with unsafe or unexpected path: {}", name);
            }
            continue;
        };
        let out_path = dest.join(&relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path).map_err(|e| extract_error(archive, e))?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(|e| extract_error(archive, e))?;
        }
        let mut out = fs::File::create(&out_path).map_err(|e| extract_error(archive, e))?;
        io::copy(&mut entry, &mut out).map_err(|e| extract_error(archive, e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                let _ = fs::set_permissions(&out_path, fs::Permissions::from_mode(mode));
            }
        }
        written += 1;
    }
    debug!("Extracted {} files from {} into {}", written, archive.display(), dest.display());
    Ok(written)
}

static WP_VERSION: OnceLock<Regex> = OnceLock::new();

/// `$wp_version` from `wp-includes/version.php`, if present.
pub fn read_wordpress_version(wordpress_dir: &Path) -> Option<String> {
    let content = fs::read_to_string(wordpress_dir.join("wp-includes").join("version.php")).ok()?;
    let re = WP_VERSION.get_or_init(|| {
        Regex::new(r#"\$wp_version\s*=\s*['"]([^'"]+)['"]"#).expect("static regex pattern is valid")
    });
    re.captures(&content).map(|c| c[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn build_zip(path: &Path, files: &[(&str, &str)]) {
        let file = fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        for (name, content) in files {
            if name.ends_with('/') {
                zip.add_directory(*name, options).unwrap();
            } else {
                zip.start_file(*name, options).unwrap();
                zip.write_all(content.as_bytes()).unwrap();
            }
        }
        zip.finish().unwrap();
    }

    #[test]
    fn strips_wordpress_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("wp.zip");
        build_zip(
            &archive,
            &[
                ("wordpress/", ""),
                ("wordpress/index.php", "<?php"),
                ("wordpress/wp-includes/version.php", "<?php\n$wp_version = '6.4.2';\n"),
            ],
        );
        let dest = dir.path().join("site");
        assert_eq!(extract_zip(&archive, &dest, Some("wordpress")).unwrap(), 2);
        assert!(dest.join("index.php").exists());
        assert!(!dest.join("wordpress").exists());
        assert_eq!(read_wordpress_version(&dest).as_deref(), Some("6.4.2"));
    }

    #[test]
    fn traversal_entries_are_skipped() {
        assert_eq!(entry_path("../evil.php", None), None);
        assert_eq!(entry_path("/etc/passwd", None), None);
        assert_eq!(entry_path("a/../../b", None), None);
        assert_eq!(entry_path("wordpress/", Some("wordpress")), None);
        assert_eq!(
            entry_path("wordpress/wp-load.php", Some("wordpress")),
            Some(PathBuf::from("wp-load.php"))
        );
        assert_eq!(entry_path("other/wp-load.php", Some("wordpress")), None);
    }

    #[test]
    fn corrupt_archive_is_an_extract_error() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("bad.zip");
        fs::write(&archive, "not a zip").unwrap();
        let err = extract_zip(&archive, &dir.path().join("out"), None).unwrap_err();
        assert!(matches!(
            err,
            Error::Provisioning {
                step: ProvisioningStep::Extract,
                ..
            }
        ));
    }

    #[test]
    fn missing_version_file_gives_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read_wordpress_version(dir.path()), None);
    }
}
