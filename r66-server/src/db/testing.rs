//! Test helpers for database modules

use sqlx::sqlite::SqlitePool;

/// Fresh migrated in-memory database
pub async fn create_test_db() -> SqlitePool {
    super::init_memory_db()
        .await
        .expect("Failed to create test database")
}
