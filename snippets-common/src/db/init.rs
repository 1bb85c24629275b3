//! Database initialization
//!
//! Opens (or creates) the durable store backing the block list and the
//! cross-session settings cache. Schema upgrades are driven by the
//! `schema_version` table so an older file is brought forward in place.

use crate::{Error, Result};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::{debug, info};

/// Current schema version
pub const SCHEMA_VERSION: i64 = 1;

/// Open the database at `db_path`, creating it and its schema if needed
///
/// Fails when the file exists but is not a usable SQLite database; callers
/// decide whether to discard it.
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // A non-database file only fails on first access, so probe it here
    let check: String = sqlx::query_scalar("PRAGMA quick_check")
        .fetch_one(&pool)
        .await?;
    if check != "ok" {
        pool.close().await;
        return Err(Error::Internal(format!("Database integrity check failed: {}", check)));
    }

    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&pool)
        .await?;

    create_schema_version_table(&pool).await?;
    let version = current_schema_version(&pool).await?;
    if version < SCHEMA_VERSION {
        upgrade_schema(&pool, version).await?;
    }

    Ok(pool)
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Highest applied schema version, 0 for a fresh database
pub async fn current_schema_version(pool: &SqlitePool) -> Result<i64> {
    let version: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
        .fetch_one(pool)
        .await?;
    Ok(version.unwrap_or(0))
}

async fn upgrade_schema(pool: &SqlitePool, from: i64) -> Result<()> {
    info!("Upgrading database schema from v{} to v{}", from, SCHEMA_VERSION);

    let mut tx = pool.begin().await?;

    if from < 1 {
        create_block_list_table(&mut tx).await?;
        create_settings_table(&mut tx).await?;
    }

    sqlx::query("INSERT OR REPLACE INTO schema_version (version) VALUES (?)")
        .bind(SCHEMA_VERSION)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

/// Create the block list collection
///
/// One row per blocked id. `seq` orders entries by when they were blocked;
/// `value` is opaque to the schema.
async fn create_block_list_table(tx: &mut sqlx::SqliteConnection) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS block_list (
            block_id TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            seq INTEGER NOT NULL
        )
        "#,
    )
    .execute(&mut *tx)
    .await?;

    Ok(())
}

/// Create the settings table
///
/// Key-value pairs that must survive across sessions (cached geolocation).
async fn create_settings_table(tx: &mut sqlx::SqliteConnection) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(&mut *tx)
    .await?;

    Ok(())
}

/// Read a setting, `None` when absent or NULL
pub async fn get_setting(pool: &SqlitePool, key: &str) -> Result<Option<String>> {
    let value: Option<Option<String>> =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await?;
    Ok(value.flatten())
}

/// Insert or replace a setting
pub async fn set_setting(pool: &SqlitePool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        "INSERT OR REPLACE INTO settings (key, value, updated_at) VALUES (?, ?, CURRENT_TIMESTAMP)",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;

    debug!(key = key, "Setting updated");
    Ok(())
}

/// Remove a setting if present
pub async fn delete_setting(pool: &SqlitePool, key: &str) -> Result<()> {
    sqlx::query("DELETE FROM settings WHERE key = ?")
        .bind(key)
        .execute(pool)
        .await?;
    Ok(())
}
