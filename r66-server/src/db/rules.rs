//! Transfer rule database operations

use r66_common::packet::TransferMode;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;

use crate::db::sql;

/// A transfer rule
///
/// Partners name a rule in every request; it fixes the mode and the
/// directories used on this side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleRecord {
    pub rule_id: String,
    pub mode: TransferMode,
    /// Hosts allowed to use the rule; empty allows every host
    #[serde(default)]
    pub host_ids: Vec<String>,
    #[serde(default)]
    pub recv_path: String,
    #[serde(default)]
    pub send_path: String,
    #[serde(default)]
    pub archive_path: String,
    #[serde(default)]
    pub work_path: String,
}

impl RuleRecord {
    /// Whether `host_id` may use this rule
    pub fn allows(&self, host_id: &str) -> bool {
        self.host_ids.is_empty() || self.host_ids.iter().any(|h| h == host_id)
    }
}

/// Row type for rule queries
type RuleRow = (String, i64, String, String, String, String, String);

impl From<RuleRow> for RuleRecord {
    fn from(row: RuleRow) -> Self {
        Self {
            rule_id: row.0,
            mode: u8::try_from(row.1)
                .ok()
                .and_then(TransferMode::from_u8)
                .unwrap_or(TransferMode::Unknown),
            host_ids: row
                .2
                .split(',')
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .map(String::from)
                .collect(),
            recv_path: row.3,
            send_path: row.4,
            archive_path: row.5,
            work_path: row.6,
        }
    }
}

/// Database access for rules
#[derive(Clone)]
pub struct RuleDb {
    pool: SqlitePool,
}

impl RuleDb {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn list(&self) -> Result<Vec<RuleRecord>, sqlx::Error> {
        let rows: Vec<RuleRow> = sqlx::query_as(sql::SQL_SELECT_RULES)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(RuleRecord::from).collect())
    }

    pub async fn get(&self, rule_id: &str) -> Result<Option<RuleRecord>, sqlx::Error> {
        let row: Option<RuleRow> = sqlx::query_as(sql::SQL_SELECT_RULE)
            .bind(rule_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(RuleRecord::from))
    }

    pub async fn upsert(&self, rule: &RuleRecord) -> Result<(), sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        upsert_rule(&mut conn, rule).await
    }

    /// Load a set of rules in one transaction, optionally purging first
    ///
    /// On failure nothing changes.
    pub async fn replace_all(&self, rules: &[RuleRecord], purge: bool) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        if purge {
            sqlx::query(sql::SQL_DELETE_ALL_RULES)
                .execute(&mut *tx)
                .await?;
        }
        for rule in rules {
            upsert_rule(&mut tx, rule).await?;
        }
        tx.commit().await
    }
}

async fn upsert_rule(
    conn: &mut sqlx::SqliteConnection,
    rule: &RuleRecord,
) -> Result<(), sqlx::Error> {
    sqlx::query(sql::SQL_UPSERT_RULE)
        .bind(&rule.rule_id)
        .bind(rule.mode as u8 as i64)
        .bind(rule.host_ids.join(","))
        .bind(&rule.recv_path)
        .bind(&rule.send_path)
        .bind(&rule.archive_path)
        .bind(&rule.work_path)
        .execute(conn)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::create_test_db;

    fn rule(id: &str, hosts: &[&str]) -> RuleRecord {
        RuleRecord {
            rule_id: id.to_string(),
            mode: TransferMode::Send,
            host_ids: hosts.iter().map(|h| h.to_string()).collect(),
            recv_path: "in".into(),
            send_path: "out".into(),
            archive_path: String::new(),
            work_path: String::new(),
        }
    }

    #[tokio::test]
    async fn test_roundtrip_host_list() {
        let db = RuleDb::new(create_test_db().await);
        let r = rule("r1", &["hostA", "hostB"]);
        db.upsert(&r).await.unwrap();
        assert_eq!(db.get("r1").await.unwrap(), Some(r));
        assert!(db.get("missing").await.unwrap().is_none());
    }

    #[test]
    fn test_allows() {
        assert!(rule("open", &[]).allows("anyone"));
        let closed = rule("closed", &["hostA"]);
        assert!(closed.allows("hostA"));
        assert!(!closed.allows("hostB"));
    }

    #[test]
    fn test_mode_serialized_as_number() {
        let json = serde_json::to_value(rule("r1", &[])).unwrap();
        assert_eq!(json["mode"], 1);
    }
}
