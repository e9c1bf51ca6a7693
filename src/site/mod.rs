//! Site data model.

mod secret;
mod types;
mod validation;

pub use secret::*;
pub use types::*;
pub use validation::*;
