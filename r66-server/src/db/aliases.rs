//! Host alias database operations

use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;

use crate::db::sql;

/// An alternative name for a host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasRecord {
    pub alias: String,
    pub host_id: String,
}

/// Database access for aliases
#[derive(Clone)]
pub struct AliasDb {
    pool: SqlitePool,
}

impl AliasDb {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn list(&self) -> Result<Vec<AliasRecord>, sqlx::Error> {
        let rows: Vec<(String, String)> = sqlx::query_as(sql::SQL_SELECT_ALIASES)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(alias, host_id)| AliasRecord { alias, host_id })
            .collect())
    }

    /// Host id behind a name: the alias target, or the name itself
    pub async fn resolve(&self, name: &str) -> Result<String, sqlx::Error> {
        let target: Option<String> = sqlx::query_scalar(sql::SQL_RESOLVE_ALIAS)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(target.unwrap_or_else(|| name.to_string()))
    }

    /// Load a set of aliases in one transaction
    pub async fn replace_all(
        &self,
        aliases: &[AliasRecord],
        purge: bool,
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        if purge {
            sqlx::query(sql::SQL_DELETE_ALL_ALIASES)
                .execute(&mut *tx)
                .await?;
        }
        for alias in aliases {
            sqlx::query(sql::SQL_UPSERT_ALIAS)
                .bind(&alias.alias)
                .bind(&alias.host_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await
    }
}
