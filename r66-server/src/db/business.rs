//! Business partner database operations

use sqlx::sqlite::SqlitePool;

use crate::db::sql;

/// Database access for the business partner list
#[derive(Clone)]
pub struct BusinessDb {
    pool: SqlitePool,
}

impl BusinessDb {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn list(&self) -> Result<Vec<String>, sqlx::Error> {
        let rows: Vec<(String,)> = sqlx::query_as(sql::SQL_SELECT_BUSINESS)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(h,)| h).collect())
    }

    /// Load a set of business partners in one transaction
    pub async fn replace_all(&self, hosts: &[String], purge: bool) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        if purge {
            sqlx::query(sql::SQL_DELETE_ALL_BUSINESS)
                .execute(&mut *tx)
                .await?;
        }
        for host in hosts {
            sqlx::query(sql::SQL_INSERT_BUSINESS)
                .bind(host)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::create_test_db;

    #[tokio::test]
    async fn test_replace_all_ignores_duplicates() {
        let db = BusinessDb::new(create_test_db().await);
        let hosts = vec!["hostA".to_string(), "hostB".to_string()];
        db.replace_all(&hosts, false).await.unwrap();
        db.replace_all(&hosts, false).await.unwrap();
        assert_eq!(db.list().await.unwrap(), hosts);

        db.replace_all(&[], true).await.unwrap();
        assert!(db.list().await.unwrap().is_empty());
    }
}
