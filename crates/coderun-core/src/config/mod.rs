//! Engine configuration
//!
//! Everything has a default so the server runs without a config file; a YAML
//! file can override any subset of fields.

pub mod loader;
pub mod types;

pub use loader::ConfigLoader;
pub use types::*;
