use super::Orchestrator;
use crate::database::{DatabaseServerRecord, ServerEngine};
use crate::error::{Error, Result};
use crate::site::Site;
use tracing::{debug, info};

/// Pick the engine record to use for `wanted`.
///
/// A running instance of the exact engine wins over an installed one. MySQL
/// sites accept MariaDB when no MySQL installation exists, since MariaDB
/// speaks the same protocol and WordPress supports both.
pub(crate) fn select_engine(
    records: &[DatabaseServerRecord],
    wanted: ServerEngine,
) -> Option<DatabaseServerRecord> {
    let compatible = |engine: ServerEngine| {
        engine == wanted || (wanted == ServerEngine::Mysql && engine == ServerEngine::Mariadb)
    };
    let rank = |r: &DatabaseServerRecord| match (r.engine == wanted, r.is_running) {
        (true, true) => 0,
        (true, false) => 1,
        (false, true) => 2,
        (false, false) => 3,
    };
    records
        .iter()
        .filter(|r| compatible(r.engine))
        .min_by_key(|r| rank(r))
        .cloned()
}

impl Orchestrator {
    /// Discover `wanted` and start it unless it is already running.
    ///
    /// Runs under the engine lock so concurrent callers start an engine at
    /// most once and later callers find it running. The lock is released
    /// before returning; connectivity checks happen outside it.
    pub(super) async fn bring_up_engine(
        &self,
        wanted: ServerEngine,
        site_name: Option<&str>,
    ) -> Result<DatabaseServerRecord> {
        let _engine_guard = self.engine_lock.lock().await;
        let records = self.databases.discover().await?;
        let record = select_engine(&records, wanted).ok_or_else(|| {
            Error::DatabaseConnection(format!("no {} installation found", wanted))
        })?;

        if record.is_running {
            debug!(
                "{} already running on port {}, skipping start",
                record.label(),
                record.listen_port
            );
            return Ok(record);
        }
        match site_name {
            Some(name) => info!("Starting {} for site '{}'", record.label(), name),
            None => info!("Starting {}", record.label()),
        }
        self.databases.start(&record).await
    }

    /// Make sure the site's engine is running and its database exists.
    ///
    /// Only discovery and start are serialized across sites; each site
    /// waits for connectivity and creates its database independently. Any
    /// error means the engine is unusable for this start.
    #[tracing::instrument(skip(self, site), fields(site.id = %site.id))]
    pub(super) async fn ensure_database(&self, site: &Site) -> Result<DatabaseServerRecord> {
        let wanted = ServerEngine::for_site(site.database.engine).ok_or_else(|| {
            Error::DatabaseConnection(format!(
                "{} does not use a database server",
                site.database.engine
            ))
        })?;

        let record = self.bring_up_engine(wanted, Some(&site.name)).await?;
        self.db_retry
            .run("database connectivity", || self.databases.probe(&record))
            .await?;
        self.databases
            .ensure_site_database(&record, &site.database)
            .await?;
        Ok(record)
    }
}
