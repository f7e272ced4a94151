//! Runtime settings changed through administrative commands

use std::io;

use r66_common::packet::BandwidthLimits;
use sqlx::SqlitePool;

use super::sql::{SQL_GET_CONFIG, SQL_SET_CONFIG};
use crate::constants::{
    CONFIG_KEY_READ_GLOBAL, CONFIG_KEY_READ_SESSION, CONFIG_KEY_WRITE_GLOBAL,
    CONFIG_KEY_WRITE_SESSION,
};

/// Database interface for persisted runtime settings
#[derive(Clone)]
pub struct ConfigDb {
    pool: SqlitePool,
}

impl ConfigDb {
    /// Create a new ConfigDb instance
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn get_u64(&self, key: &str) -> Option<u64> {
        sqlx::query_scalar::<_, String>(SQL_GET_CONFIG)
            .bind(key)
            .fetch_one(&self.pool)
            .await
            .ok()
            .and_then(|v| v.parse().ok())
    }

    async fn set_value(&self, key: &str, value: &str) -> io::Result<()> {
        sqlx::query(SQL_SET_CONFIG)
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await
            .map_err(|e| io::Error::other(e.to_string()))?;

        Ok(())
    }

    /// Get the bandwidth limits saved by the last `BandwidthSet`
    ///
    /// Returns `None` unless all four values are stored and valid, so a
    /// partially written set never overrides the configuration file.
    pub async fn get_bandwidth(&self) -> Option<BandwidthLimits> {
        Some(BandwidthLimits {
            write_global: self.get_u64(CONFIG_KEY_WRITE_GLOBAL).await?,
            read_global: self.get_u64(CONFIG_KEY_READ_GLOBAL).await?,
            write_session: self.get_u64(CONFIG_KEY_WRITE_SESSION).await?,
            read_session: self.get_u64(CONFIG_KEY_READ_SESSION).await?,
        })
    }

    /// Save bandwidth limits
    ///
    /// # Errors
    ///
    /// Returns an error if the database update fails.
    pub async fn set_bandwidth(&self, limits: &BandwidthLimits) -> io::Result<()> {
        self.set_value(CONFIG_KEY_WRITE_GLOBAL, &limits.write_global.to_string())
            .await?;
        self.set_value(CONFIG_KEY_READ_GLOBAL, &limits.read_global.to_string())
            .await?;
        self.set_value(CONFIG_KEY_WRITE_SESSION, &limits.write_session.to_string())
            .await?;
        self.set_value(CONFIG_KEY_READ_SESSION, &limits.read_session.to_string())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::create_test_db;

    #[tokio::test]
    async fn test_bandwidth_absent_by_default() {
        let db = ConfigDb::new(create_test_db().await);
        assert_eq!(db.get_bandwidth().await, None);
    }

    #[tokio::test]
    async fn test_bandwidth_roundtrip() {
        let db = ConfigDb::new(create_test_db().await);
        let limits = BandwidthLimits {
            write_global: 1000,
            read_global: 2000,
            write_session: 100,
            read_session: 0,
        };
        db.set_bandwidth(&limits).await.unwrap();
        assert_eq!(db.get_bandwidth().await, Some(limits));

        let updated = BandwidthLimits {
            write_global: 0,
            ..limits
        };
        db.set_bandwidth(&updated).await.unwrap();
        assert_eq!(db.get_bandwidth().await, Some(updated));
    }
}
