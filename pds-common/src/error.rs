//! Common error types for PDS

use thiserror::Error;

/// Common result type for PDS operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the PDS crates
#[derive(Error, Debug)]
pub enum Error {
    /// TOML parse error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),
}
