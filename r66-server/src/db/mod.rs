//! Database layer
//!
//! One sqlite pool shared by every table wrapper. `SqlitePool` is reference
//! counted, so the wrappers clone it freely.

pub mod aliases;
pub mod business;
pub mod config;
pub mod hosts;
pub mod jobs;
pub mod roles;
pub mod rules;
pub mod sql;

#[cfg(test)]
pub mod testing;

use std::io;
use std::path::{Path, PathBuf};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

pub use aliases::{AliasDb, AliasRecord};
pub use business::BusinessDb;
pub use config::ConfigDb;
pub use hosts::{HostDb, HostRecord};
pub use jobs::DbJobStore;
pub use roles::{Role, RoleDb, RoleRecord};
pub use rules::{RuleDb, RuleRecord};

use crate::constants::{DATA_DIR_NAME, DATABASE_FILENAME, ERR_DATA_DIR};

/// Table wrappers over one pool
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
    pub config: ConfigDb,
    pub hosts: HostDb,
    pub rules: RuleDb,
    pub business: BusinessDb,
    pub aliases: AliasDb,
    pub roles: RoleDb,
}

impl Database {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            config: ConfigDb::new(pool.clone()),
            hosts: HostDb::new(pool.clone()),
            rules: RuleDb::new(pool.clone()),
            business: BusinessDb::new(pool.clone()),
            aliases: AliasDb::new(pool.clone()),
            roles: RoleDb::new(pool.clone()),
            pool,
        }
    }

    /// Job store backed by this database
    pub fn jobs(&self) -> DbJobStore {
        DbJobStore::new(self.pool.clone())
    }
}

/// Platform default database path, creating its directory
///
/// # Errors
///
/// Returns an error if the platform data directory is unknown or cannot be
/// created.
pub fn default_database_path() -> io::Result<PathBuf> {
    let dir = dirs::data_dir()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, ERR_DATA_DIR))?
        .join(DATA_DIR_NAME);
    std::fs::create_dir_all(&dir)?;
    Ok(dir.join(DATABASE_FILENAME))
}

/// Open (creating if needed) the database file and run migrations
///
/// # Errors
///
/// Returns an error if the file cannot be opened or a migration fails.
pub async fn init_db(path: &Path) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    Ok(pool)
}

/// In-memory database for configuration tables when running without a file
///
/// A single connection that never expires, so the data lives as long as the
/// pool.
///
/// # Errors
///
/// Returns an error if a migration fails.
pub async fn init_memory_db() -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::new().in_memory(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    Ok(pool)
}
