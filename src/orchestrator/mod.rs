//! Site lifecycle: create, start, stop, delete.
//!
//! - `core` - the [`Orchestrator`] facade and lifecycle operations
//! - `database` - engine selection and the ensure-running sequence
//! - `monitor` - marks sites `error` when their PHP server dies
//! - `builder` - wiring of the default or injected collaborators

mod builder;
mod core;
mod database;
mod monitor;

pub use builder::OrchestratorBuilder;
pub use core::Orchestrator;
