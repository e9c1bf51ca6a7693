//! MySQL protocol client used for connectivity probes and per-site setup.

use crate::error::{Error, Result};
use crate::site::DatabaseConfig;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::{Connection, Executor};
use std::time::Duration;
use tracing::debug;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Where and as whom to connect.
#[derive(Debug, Clone)]
pub struct ServerCredentials {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

impl ServerCredentials {
    pub fn local(port: u16, user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port,
            user: user.into(),
            password: password.into(),
        }
    }

    fn options(&self) -> MySqlConnectOptions {
        MySqlConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
    }
}

fn connection_error(what: &str, creds: &ServerCredentials, e: impl std::fmt::Display) -> Error {
    Error::DatabaseConnection(format!(
        "{} {}@{}:{}: {}",
        what, creds.user, creds.host, creds.port, e
    ))
}

async fn connect(creds: &ServerCredentials, options: MySqlConnectOptions) -> Result<MySqlConnection> {
    match tokio::time::timeout(CONNECT_TIMEOUT, MySqlConnection::connect_with(&options)).await {
        Ok(Ok(conn)) => Ok(conn),
        Ok(Err(e)) => Err(connection_error("cannot connect as", creds, e)),
        Err(_) => Err(connection_error("timed out connecting as", creds, "no response")),
    }
}

/// Connect and ping once.
pub async fn ping(creds: &ServerCredentials) -> Result<()> {
    let mut conn = connect(creds, creds.options()).await?;
    conn.ping()
        .await
        .map_err(|e| connection_error("ping failed for", creds, e))?;
    let _ = conn.close().await;
    Ok(())
}

/// Identifiers are generated as `[a-z0-9_]`; anything else is refused rather than quoted.
fn checked_identifier(ident: &str) -> Result<&str> {
    if !ident.is_empty()
        && ident.len() <= 64
        && ident
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        Ok(ident)
    } else {
        Err(Error::Validation(format!(
            "unsafe database identifier '{}'",
            ident
        )))
    }
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}

/// Statements creating the database and user if absent and granting access.
pub fn site_setup_statements(db: &DatabaseConfig) -> Result<Vec<String>> {
    let name = checked_identifier(&db.name)?;
    let user = checked_identifier(&db.user)?;
    let password = quote_literal(&db.password);

    let mut statements = vec![format!(
        "CREATE DATABASE IF NOT EXISTS `{}` CHARACTER SET utf8mb4 COLLATE utf8mb4_unicode_ci",
        name
    )];
    for host in ["localhost", "%"] {
        statements.push(format!(
            "CREATE USER IF NOT EXISTS '{}'@'{}' IDENTIFIED BY {}",
            user, host, password
        ));
        statements.push(format!(
            "GRANT ALL PRIVILEGES ON `{}`.* TO '{}'@'{}'",
            name, user, host
        ));
    }
    statements.push("FLUSH PRIVILEGES".to_string());
    Ok(statements)
}

/// Create the site's database and user if absent, then check that the
/// site's own credentials can reach its database.
pub async fn ensure_site_database(root: &ServerCredentials, db: &DatabaseConfig) -> Result<()> {
    let statements = site_setup_statements(db)?;
    let mut conn = connect(root, root.options()).await?;
    for sql in &statements {
        conn.execute(sql.as_str())
            .await
            .map_err(|e| connection_error("setup statement failed for", root, e))?;
    }
    let _ = conn.close().await;
    debug!("Database '{}' ready for user '{}'", db.name, db.user);

    let site_creds = ServerCredentials {
        host: root.host.clone(),
        port: root.port,
        user: db.user.clone(),
        password: db.password.clone(),
    };
    let mut conn = connect(&site_creds, site_creds.options().database(&db.name)).await?;
    conn.ping()
        .await
        .map_err(|e| connection_error("ping failed for", &site_creds, e))?;
    let _ = conn.close().await;
    Ok(())
}
