//! # Snippets Common Library
//!
//! Shared code for the snippet delivery workspace:
//! - Error types
//! - Configuration loading and root folder resolution
//! - Database initialization (block list collection, cached settings)
//! - Completion signals for fire-and-forget work
//! - Time and correlation id helpers

pub mod completion;
pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod time;
pub mod uuid_utils;

pub use completion::Completion;
pub use config::{BlockAction, ClientConfig};
pub use error::{Error, Result};
