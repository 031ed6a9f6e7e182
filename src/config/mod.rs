//! Configuration module for the TSDF server
//!
//! Configuration files are YAML or TOML with four optional sections (`server`,
//! `map`, `integrator`, `mesh`); every missing option takes its default.

pub mod config;
pub mod params;

pub use config::{ConfigCorrection, ConfigError, ConfigLoader, TsdfServerConfig};
pub use params::{IntegratorParams, MapParams, MeshParams, ServerParams};
