//! Host database servers (MySQL/MariaDB) as discovered resources.
//!
//! Nothing here installs an engine. Installed servers are found on disk,
//! matched to live processes, started on demand with a data directory owned
//! by pressbox, and probed over the MySQL protocol.

pub mod client;
mod discovery;
mod manager;

pub use discovery::{
    default_search_roots, parse_version, scan_installations, DatabaseServerRecord, Installation,
    ServerEngine,
};
pub use manager::{listen_port_from_args, DatabaseServerManager, DatabaseServers};
