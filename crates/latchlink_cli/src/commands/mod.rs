//! CLI command implementations.

pub mod check_config;
pub mod default_config;
pub mod simulate;
pub mod version;
