//! Error types for the core crate
//!
//! Configuration and target validation failures.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid device target: {0}")]
    InvalidTarget(String),
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
