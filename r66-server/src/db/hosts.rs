//! Partner host database operations

use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;

use crate::db::sql;

/// A partner host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRecord {
    pub host_id: String,
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub ssl: bool,
    /// Hex digest of the shared secret this host authenticates with
    pub host_key: String,
    #[serde(default)]
    pub admin: bool,
    /// Host only connects to us, we never connect to it
    #[serde(default)]
    pub client: bool,
    #[serde(default)]
    pub proxified: bool,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// Row type for host queries
type HostRow = (String, String, i64, bool, String, bool, bool, bool, bool);

impl From<HostRow> for HostRecord {
    fn from(row: HostRow) -> Self {
        Self {
            host_id: row.0,
            address: row.1,
            port: u16::try_from(row.2).unwrap_or(0),
            ssl: row.3,
            host_key: row.4,
            admin: row.5,
            client: row.6,
            proxified: row.7,
            active: row.8,
        }
    }
}

/// Database access for hosts
#[derive(Clone)]
pub struct HostDb {
    pool: SqlitePool,
}

impl HostDb {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn list(&self) -> Result<Vec<HostRecord>, sqlx::Error> {
        let rows: Vec<HostRow> = sqlx::query_as(sql::SQL_SELECT_HOSTS)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(HostRecord::from).collect())
    }

    pub async fn get(&self, host_id: &str) -> Result<Option<HostRecord>, sqlx::Error> {
        let row: Option<HostRow> = sqlx::query_as(sql::SQL_SELECT_HOST)
            .bind(host_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(HostRecord::from))
    }

    pub async fn upsert(&self, host: &HostRecord) -> Result<(), sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        upsert_host(&mut conn, host).await
    }

    /// Delete a host; returns true if it existed
    pub async fn delete(&self, host_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(sql::SQL_DELETE_HOST)
            .bind(host_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Load a set of hosts in one transaction, optionally purging first
    ///
    /// On failure nothing changes.
    pub async fn replace_all(&self, hosts: &[HostRecord], purge: bool) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        if purge {
            sqlx::query(sql::SQL_DELETE_ALL_HOSTS)
                .execute(&mut *tx)
                .await?;
        }
        for host in hosts {
            upsert_host(&mut tx, host).await?;
        }
        tx.commit().await
    }
}

async fn upsert_host(
    conn: &mut sqlx::SqliteConnection,
    host: &HostRecord,
) -> Result<(), sqlx::Error> {
    sqlx::query(sql::SQL_UPSERT_HOST)
        .bind(&host.host_id)
        .bind(&host.address)
        .bind(host.port as i64)
        .bind(host.ssl)
        .bind(&host.host_key)
        .bind(host.admin)
        .bind(host.client)
        .bind(host.proxified)
        .bind(host.active)
        .execute(conn)
        .await?;
    Ok(())
}
