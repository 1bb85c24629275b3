//! Errors shared by the snippet crates
//!
//! Library code returns these; the store and geolocation layers log them and
//! fall back to a degraded mode instead of surfacing them to the host.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Opening, initializing or querying the block list database
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Config file, catalog file or database directory access
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Catalog or stored value is not valid JSON
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Unparseable TOML or a value that fails validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// Catalog payload has the wrong shape
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Database file opened but failed its integrity check
    #[error("Internal error: {0}")]
    Internal(String),
}
