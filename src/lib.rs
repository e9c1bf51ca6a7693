#![allow(unused_assignments)]

//! # pressbox
//!
//! Local WordPress environments without a container runtime.
//!
//! ## Features
//!
//! - **Site Registry**: one `pressbox-config.json` per site, crash-safe writes, recovery on load
//! - **Port Allocation**: OS-verified ports for PHP servers, reserved per site while starting
//! - **Database Discovery**: finds installed MySQL/MariaDB servers and starts them on demand
//! - **SQLite Fallback**: sites whose database server is unavailable switch to SQLite and still start
//! - **Process Supervision**: one PHP development server per running site, crash detection included
//!
//! ## Quick Start
//!
//! ```no_run
//! use pressbox::{AppConfig, DatabaseEngine, Orchestrator, SiteConfig};
//!
//! # async fn example() -> Result<(), pressbox::Error> {
//! let config = AppConfig::load(AppConfig::resolve_data_dir(None)?)?;
//! let orchestrator = Orchestrator::builder().config(config).build().await?;
//!
//! let site = orchestrator
//!     .create(SiteConfig::new("demo").with_engine(DatabaseEngine::Mysql))
//!     .await?;
//! let site = orchestrator.start(&site.id).await?;
//! println!("{} is running at {}", site.name, site.url());
//!
//! orchestrator.stop(&site.id).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency Model
//!
//! - Lifecycle methods take `&self`; the orchestrator can be shared behind an `Arc`
//! - `start`, `stop` and `delete` on the same site are serialized
//! - Database engines are shared: stopping a site never stops its engine

pub mod config;
pub mod database;
pub mod error;
pub mod fsutil;
pub mod locks;
pub mod orchestrator;
pub mod port;
pub mod provisioner;
pub mod registry;
pub mod retry;
pub mod site;
pub mod supervisor;

// Re-export commonly used types
pub use config::AppConfig;
pub use database::{DatabaseServerManager, DatabaseServerRecord, DatabaseServers, ServerEngine};
pub use error::{Error, ProvisioningStep, Result};
pub use orchestrator::{Orchestrator, OrchestratorBuilder};
pub use registry::SiteRegistry;
pub use retry::RetryPolicy;
pub use site::{DatabaseEngine, Site, SiteConfig, SiteStatus};
pub use supervisor::{ProcessExit, ProcessHandle, ProcessLauncher, ProcessSupervisor};
