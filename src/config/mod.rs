//! Application configuration.
//!
//! - `settings` - [`AppConfig`] and its YAML sections
//! - `duration` - human-readable duration strings used by retry settings

mod duration;
mod settings;

pub use duration::*;
pub use settings::*;
