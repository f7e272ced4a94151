//! Administrative roles granted to hosts

use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;
use strum::AsRefStr;

use crate::db::sql;

/// Role a host may hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr, Serialize, Deserialize)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    NoAccess,
    ReadOnly,
    Transfer,
    Rule,
    Host,
    Limit,
    System,
    LogControl,
    ConfigAdmin,
    Partner,
    FullAdmin,
}

impl Role {
    /// Convert role to string for database storage
    pub fn as_str(&self) -> &str {
        self.as_ref()
    }

    /// Parse a stored role name
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "NOACCESS" => Some(Self::NoAccess),
            "READONLY" => Some(Self::ReadOnly),
            "TRANSFER" => Some(Self::Transfer),
            "RULE" => Some(Self::Rule),
            "HOST" => Some(Self::Host),
            "LIMIT" => Some(Self::Limit),
            "SYSTEM" => Some(Self::System),
            "LOGCONTROL" => Some(Self::LogControl),
            "CONFIGADMIN" => Some(Self::ConfigAdmin),
            "PARTNER" => Some(Self::Partner),
            "FULLADMIN" => Some(Self::FullAdmin),
            _ => None,
        }
    }

    /// Whether holding `self` grants `needed`
    pub fn grants(&self, needed: Role) -> bool {
        *self == needed || *self == Self::FullAdmin
    }
}

/// A role granted to a host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRecord {
    pub host_id: String,
    pub role: Role,
}

/// Database access for roles
#[derive(Clone)]
pub struct RoleDb {
    pool: SqlitePool,
}

impl RoleDb {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Every grant; unknown stored names are skipped
    pub async fn list(&self) -> Result<Vec<RoleRecord>, sqlx::Error> {
        let rows: Vec<(String, String)> = sqlx::query_as(sql::SQL_SELECT_ROLES)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|(host_id, role)| {
                Role::parse(&role).map(|role| RoleRecord { host_id, role })
            })
            .collect())
    }

    /// Roles held by one host
    pub async fn for_host(&self, host_id: &str) -> Result<Vec<Role>, sqlx::Error> {
        let rows: Vec<(String,)> = sqlx::query_as(sql::SQL_SELECT_HOST_ROLES)
            .bind(host_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().filter_map(|(r,)| Role::parse(&r)).collect())
    }

    /// Whether `host_id` holds a role granting `needed`
    pub async fn has_role(&self, host_id: &str, needed: Role) -> Result<bool, sqlx::Error> {
        Ok(self
            .for_host(host_id)
            .await?
            .iter()
            .any(|r| r.grants(needed)))
    }

    /// Load a set of grants in one transaction
    pub async fn replace_all(&self, roles: &[RoleRecord], purge: bool) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        if purge {
            sqlx::query(sql::SQL_DELETE_ALL_ROLES)
                .execute(&mut *tx)
                .await?;
        }
        for record in roles {
            sqlx::query(sql::SQL_INSERT_ROLE)
                .bind(&record.host_id)
                .bind(record.role.as_str())
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

    #[test]
    fn test_role_names() {
        assert_eq!(Role::ConfigAdmin.as_str(), "CONFIGADMIN");
        assert_eq!(Role::LogControl.as_str(), "LOGCONTROL");
        assert_eq!(Role::parse("fulladmin"), Some(Role::FullAdmin));
        assert_eq!(Role::parse("root"), None);
    }

    #[test]
    fn test_full_admin_grants_everything() {
        assert!(Role::FullAdmin.grants(Role::ConfigAdmin));
        assert!(Role::LogControl.grants(Role::LogControl));
        assert!(!Role::LogControl.grants(Role::ConfigAdmin));
    }

    #[tokio::test]
    async fn test_has_role() {
        let db = RoleDb::new(create_test_db().await);
        db.replace_all(
            &[
                RoleRecord {
                    host_id: "hostB".into(),
                    role: Role::LogControl,
                },
                RoleRecord {
                    host_id: "hostC".into(),
                    role: Role::FullAdmin,
                },
            ],
            false,
        )
        .await
        .unwrap();

        assert!(db.has_role("hostB", Role::LogControl).await.unwrap());
        assert!(!db.has_role("hostB", Role::ConfigAdmin).await.unwrap());
        assert!(db.has_role("hostC", Role::ConfigAdmin).await.unwrap());
        assert!(!db.has_role("hostD", Role::LogControl).await.unwrap());
        assert_eq!(db.list().await.unwrap().len(), 2);
    }
}
