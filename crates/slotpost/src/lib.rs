//! Runtime for the scheduled retro gaming poster: configuration loading and
//! the HTTP collaborators behind the `assembly` traits.

pub mod clients;
pub mod config;

pub use config::{AppConfig, ConfigError};
