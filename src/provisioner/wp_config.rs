//! `wp-config.php` generation.
//!
//! Rendering is a pure function of the site and its salts, so a config
//! rewritten for fallback is byte-identical to one generated directly for a
//! sqlite site with the same salts.

use crate::site::{generate_salt, DatabaseEngine, Site};
use regex::Regex;
use std::fmt::Write as _;
use std::sync::OnceLock;

pub const SALT_KEYS: [&str; 8] = [
    "AUTH_KEY",
    "SECURE_AUTH_KEY",
    "LOGGED_IN_KEY",
    "NONCE_KEY",
    "AUTH_SALT",
    "SECURE_AUTH_SALT",
    "LOGGED_IN_SALT",
    "NONCE_SALT",
];

/// Relative to the site root; `DB_DIR` is built from `__DIR__` so the config
/// stays valid when the site directory moves.
pub const SQLITE_DB_DIR: &str = "wp-content/database/";
pub const SQLITE_DB_FILE: &str = ".ht.sqlite";
pub const SQLITE_PLUGIN_SLUG: &str = "sqlite-database-integration";

/// The eight authentication keys and salts, in `SALT_KEYS` order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Salts(Vec<String>);

impl Salts {
    /// Eight independently generated values.
    pub fn generate() -> Self {
        Self(SALT_KEYS.iter().map(|_| generate_salt()).collect())
    }

    /// Recover the salts from an existing config; `None` unless all eight are present.
    pub fn parse(config: &str) -> Option<Self> {
        static DEFINE: OnceLock<Regex> = OnceLock::new();
        let re = DEFINE.get_or_init(|| {
            Regex::new(r"define\(\s*'([A-Z_]+)',\s*'((?:[^'\\]|\\.)*)'\s*\);")
                .expect("static regex pattern is valid")
        });
        let found: Vec<(String, String)> = re
            .captures_iter(config)
            .map(|c| (c[1].to_string(), php_unquote(&c[2])))
            .collect();
        SALT_KEYS
            .iter()
            .map(|key| {
                found
                    .iter()
                    .find(|(k, _)| k == key)
                    .map(|(_, v)| v.clone())
            })
            .collect::<Option<Vec<_>>>()
            .map(Self)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        SALT_KEYS.iter().copied().zip(self.0.iter().map(String::as_str))
    }
}

/// Body of a PHP single-quoted string literal.
fn php_quote(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

fn php_unquote(value: &str) -> String {
    value.replace("\\'", "'").replace("\\\\", "\\")
}

fn define(out: &mut String, key: &str, value: &str) {
    let _ = writeln!(out, "define( '{}', '{}' );", key, php_quote(value));
}

/// Render `wp-config.php` for `site` according to its database engine.
pub fn render_config(site: &Site, salts: &Salts) -> String {
    let db = &site.database;
    let mut out = String::new();
    out.push_str("<?php\n");
    let _ = writeln!(out, "/**\n * WordPress configuration for '{}'.\n *\n * Generated by pressbox.\n */\n", site.name);

    match db.engine {
        DatabaseEngine::Mysql | DatabaseEngine::Mariadb => {
            define(&mut out, "DB_NAME", &db.name);
            define(&mut out, "DB_USER", &db.user);
            define(&mut out, "DB_PASSWORD", &db.password);
            define(
                &mut out,
                "DB_HOST",
                &format!("127.0.0.1:{}", db.port.unwrap_or(3306)),
            );
        }
        DatabaseEngine::Sqlite => {
            define(&mut out, "DB_ENGINE", "sqlite");
            let _ = writeln!(out, "define( 'DB_DIR', __DIR__ . '/{}' );", SQLITE_DB_DIR);
            define(&mut out, "DB_FILE", SQLITE_DB_FILE);
            define(&mut out, "DB_NAME", &db.name);
            define(&mut out, "DB_USER", "");
            define(&mut out, "DB_PASSWORD", "");
            define(&mut out, "DB_HOST", "localhost");
        }
    }
    define(&mut out, "DB_CHARSET", "utf8mb4");
    define(&mut out, "DB_COLLATE", "");
    out.push('\n');

    for (key, value) in salts.iter() {
        define(&mut out, key, value);
    }

    out.push_str(
        "\n$table_prefix = 'wp_';\n\n\
         define( 'WP_DEBUG', false );\n\n\
         if ( ! defined( 'ABSPATH' ) ) {\n\
         \tdefine( 'ABSPATH', __DIR__ . '/' );\n\
         }\n\n\
         require_once ABSPATH . 'wp-settings.php';\n",
    );
    out
}

/// `wp-content/db.php`: hands the database layer to the SQLite plugin.
///
/// Inert unless `wp-config.php` selects SQLite, so a site whose config
/// names a MySQL server keeps talking to it even with the file present.
pub fn sqlite_dropin() -> String {
    format!(
        "<?php\n\
         /**\n * SQLite database drop-in installed by pressbox.\n */\n\n\
         if ( defined( 'DB_ENGINE' ) && 'sqlite' === DB_ENGINE ) {{\n\
         \tdefine( 'SQLITE_DB_DROPIN_VERSION', '1.0.0' );\n\n\
         \t$sqlite_plugin_dir = __DIR__ . '/plugins/{slug}';\n\
         \tif ( file_exists( $sqlite_plugin_dir . '/wp-includes/sqlite/db.php' ) ) {{\n\
         \t\trequire_once $sqlite_plugin_dir . '/wp-includes/sqlite/db.php';\n\
         \t}}\n\
         }}\n",
        slug = SQLITE_PLUGIN_SLUG
    )
}

/// True if `dropin` only takes effect for SQLite configs.
pub fn is_guarded_dropin(dropin: &str) -> bool {
    dropin.contains("if ( defined( 'DB_ENGINE' ) && 'sqlite' === DB_ENGINE ) {")
}

/// True if `config` selects the SQLite engine.
pub fn is_sqlite_config(config: &str) -> bool {
    config.contains("define( 'DB_ENGINE', 'sqlite' );")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site::{AdminAccount, DatabaseConfig, SitePaths, SiteStatus};
    use chrono::Utc;

    fn site(engine: DatabaseEngine) -> Site {
        let now = Utc::now();
        Site {
            id: "site-00000000000000000000000000000001".to_string(),
            name: "demo".to_string(),
            domain: "demo.local".to_string(),
            port: 8001,
            php_version: "8.2".to_string(),
            wordpress_version: "6.4.2".to_string(),
            database: DatabaseConfig {
                engine,
                name: "wp_demo_000000".to_string(),
                user: "wp_demo_000000".to_string(),
                password: "pa'ss\\word".to_string(),
                port: Some(3307),
                root_password: None,
                version: None,
            },
            admin: AdminAccount {
                user: "admin".to_string(),
                email: "admin@demo.local".to_string(),
                password: None,
            },
            status: SiteStatus::Stopped,
            last_error: None,
            created_at: now,
            updated_at: now,
            paths: SitePaths::default(),
        }
    }

    #[test]
    fn mysql_variant_has_connection_constants() {
        let config = render_config(&site(DatabaseEngine::Mysql), &Salts::generate());
        assert!(config.contains("define( 'DB_HOST', '127.0.0.1:3307' );"));
        assert!(config.contains("define( 'DB_PASSWORD', 'pa\\'ss\\\\word' );"));
        assert!(!is_sqlite_config(&config));
        assert!(config.ends_with("require_once ABSPATH . 'wp-settings.php';\n"));
    }

    #[test]
    fn sqlite_variant_selects_engine_and_directory() {
        let config = render_config(&site(DatabaseEngine::Sqlite), &Salts::generate());
        assert!(is_sqlite_config(&config));
        assert!(config.contains("define( 'DB_DIR', __DIR__ . '/wp-content/database/' );"));
        assert!(!config.contains("3307"));
    }

    #[test]
    fn salts_round_trip_through_config() {
        let salts = Salts::generate();
        let config = render_config(&site(DatabaseEngine::Mysql), &salts);
        assert_eq!(Salts::parse(&config), Some(salts));
    }

    #[test]
    fn salts_differ_between_generations() {
        let a = Salts::generate();
        let b = Salts::generate();
        assert_ne!(a, b);
        let values: std::collections::HashSet<&str> = a.iter().map(|(_, v)| v).collect();
        assert_eq!(values.len(), SALT_KEYS.len());
    }

    #[test]
    fn partial_salts_are_not_parsed() {
        assert_eq!(Salts::parse("define( 'AUTH_KEY', 'x' );"), None);
    }

    #[test]
    fn dropin_points_at_plugin() {
        assert!(sqlite_dropin().contains("/plugins/sqlite-database-integration"));
    }

    #[test]
    fn dropin_only_loads_for_sqlite_configs() {
        let dropin = sqlite_dropin();
        assert!(is_guarded_dropin(&dropin));
        let guard = dropin.find("'sqlite' === DB_ENGINE").unwrap();
        let require = dropin.find("require_once").unwrap();
        assert!(guard < require);
        // Every statement after the opening tag sits inside the guard.
        let body = &dropin[dropin.find("if ( defined").unwrap()..];
        assert!(body.trim_end().ends_with('}'));
        assert!(!is_guarded_dropin("<?php require_once 'db.php';"));
    }
}
