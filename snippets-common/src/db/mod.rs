//! Database initialization and shared queries

pub mod init;

pub use init::*;
