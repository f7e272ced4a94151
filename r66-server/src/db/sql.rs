//! SQL query constants for database operations
//!
//! This module contains all SQL queries used by the database layer.
//! Each query is documented with its parameters and special behaviors.

// ========================================================================
// Configuration Query Operations
// ========================================================================

/// Get a configuration value by key
///
/// **Parameters:**
/// 1. `key: &str` - Configuration key to look up
///
/// **Returns:** `(value: String)`
pub const SQL_GET_CONFIG: &str = "SELECT value FROM config WHERE key = ?";

/// Set a configuration value (insert or replace)
///
/// **Parameters:**
/// 1. `key: &str` - Configuration key
/// 2. `value: &str` - New configuration value
pub const SQL_SET_CONFIG: &str = "INSERT OR REPLACE INTO config (key, value) VALUES (?, ?)";

// ========================================================================
// Job Query Operations
// ========================================================================

/// Column list shared by every job SELECT, in [`JobRow`](super::jobs) order
macro_rules! job_columns {
    () => {
        "special_id, requester, requested, owner, rule_id, mode, direction, \
         global_step, global_last_step, rank, block_size, updated_info, error_code, \
         filename, original_filename, file_info, original_size, start_ts, stop_ts, \
         next_run_at, retry_count, last_error"
    };
}

/// Insert a job unless its key already exists
///
/// **Parameters:** every job column in [`job_columns!`] order (22 values)
///
/// **Note:** Uses `INSERT OR IGNORE`; `rows_affected() == 0` means the key
/// was already taken.
pub const SQL_INSERT_JOB: &str = concat!(
    "INSERT OR IGNORE INTO jobs (",
    job_columns!(),
    ") VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
);

/// Get one job by key
///
/// **Parameters:**
/// 1. `requester: &str`
/// 2. `requested: &str`
/// 3. `special_id: i64`
pub const SQL_SELECT_JOB: &str = concat!(
    "SELECT ",
    job_columns!(),
    " FROM jobs WHERE requester = ? AND requested = ? AND special_id = ?"
);

/// Overwrite the mutable fields of a job
///
/// **Parameters:**
/// 1. `owner` 2. `rule_id` 3. `mode` 4. `direction` 5. `global_step`
/// 6. `global_last_step` 7. `rank` 8. `block_size` 9. `updated_info`
/// 10. `error_code` 11. `filename` 12. `original_filename` 13. `file_info`
/// 14. `original_size` 15. `start_ts` 16. `stop_ts` 17. `next_run_at`
/// 18. `retry_count` 19. `last_error` 20. `requester` 21. `requested`
/// 22. `special_id`
pub const SQL_UPDATE_JOB: &str = "UPDATE jobs SET owner = ?, rule_id = ?, mode = ?, \
     direction = ?, global_step = ?, global_last_step = ?, rank = ?, block_size = ?, \
     updated_info = ?, error_code = ?, filename = ?, original_filename = ?, file_info = ?, \
     original_size = ?, start_ts = ?, stop_ts = ?, next_run_at = ?, retry_count = ?, \
     last_error = ? WHERE requester = ? AND requested = ? AND special_id = ?";

/// Claim a job for execution
///
/// **Parameters:**
/// 1. `requester: &str`
/// 2. `requested: &str`
/// 3. `special_id: i64`
///
/// **Note:** Conditional on `updated_info = 'TOSUBMIT'`; exactly one caller
/// sees `rows_affected() == 1`.
pub const SQL_CLAIM_JOB: &str = "UPDATE jobs SET updated_info = 'RUNNING' \
     WHERE requester = ? AND requested = ? AND special_id = ? AND updated_info = 'TOSUBMIT'";

/// Jobs due for dispatch
///
/// **Parameters:**
/// 1. `owner: &str` - Local host id (owner and requester)
/// 2. `now: i64` - Current time in milliseconds
/// 3. `limit: i64`
pub const SQL_SELECT_RUNNABLE_JOBS: &str = concat!(
    "SELECT ",
    job_columns!(),
    " FROM jobs WHERE updated_info = 'TOSUBMIT' AND next_run_at <= ?2 \
     AND owner = ?1 AND requester = ?1 ORDER BY next_run_at LIMIT ?3"
);

/// Jobs matching a log filter, oldest first
///
/// **Parameters:**
/// 1. `start: i64` - Lower start bound in milliseconds
/// 2. `stop: i64` - Upper start bound in milliseconds
/// 3. `rule_id: Option<&str>` - NULL matches any rule
/// 4. `host_id: Option<&str>` - Requester or requested; NULL matches any
/// 5. `updated_info: Option<&str>` - NULL matches any status
pub const SQL_SELECT_JOBS_MATCHING: &str = concat!(
    "SELECT ",
    job_columns!(),
    " FROM jobs WHERE start_ts >= ?1 AND start_ts <= ?2 \
     AND (?3 IS NULL OR rule_id = ?3) \
     AND (?4 IS NULL OR requester = ?4 OR requested = ?4) \
     AND (?5 IS NULL OR updated_info = ?5) \
     ORDER BY start_ts"
);

/// Jobs left running or interrupted by a previous run
///
/// **Parameters:** None
pub const SQL_SELECT_UNFINISHED_JOBS: &str = concat!(
    "SELECT ",
    job_columns!(),
    " FROM jobs WHERE updated_info IN ('RUNNING', 'INTERRUPTED')"
);

/// Delete one job
///
/// **Parameters:**
/// 1. `requester: &str`
/// 2. `requested: &str`
/// 3. `special_id: i64`
pub const SQL_DELETE_JOB: &str =
    "DELETE FROM jobs WHERE requester = ? AND requested = ? AND special_id = ?";

// ========================================================================
// Host Query Operations
// ========================================================================

/// **Returns:** `(host_id, address, port, ssl, host_key, admin, client, proxified, active)`
pub const SQL_SELECT_HOSTS: &str = "SELECT host_id, address, port, ssl, host_key, admin, \
     client, proxified, active FROM hosts ORDER BY host_id";

/// **Parameters:**
/// 1. `host_id: &str`
pub const SQL_SELECT_HOST: &str = "SELECT host_id, address, port, ssl, host_key, admin, \
     client, proxified, active FROM hosts WHERE host_id = ?";

/// Insert or replace a host
///
/// **Parameters:** `host_id, address, port, ssl, host_key, admin, client, proxified, active`
pub const SQL_UPSERT_HOST: &str = "INSERT OR REPLACE INTO hosts (host_id, address, port, \
     ssl, host_key, admin, client, proxified, active) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)";

/// **Parameters:**
/// 1. `host_id: &str`
pub const SQL_DELETE_HOST: &str = "DELETE FROM hosts WHERE host_id = ?";

pub const SQL_DELETE_ALL_HOSTS: &str = "DELETE FROM hosts";

// ========================================================================
// Rule Query Operations
// ========================================================================

/// **Returns:** `(rule_id, mode, host_ids, recv_path, send_path, archive_path, work_path)`
pub const SQL_SELECT_RULES: &str = "SELECT rule_id, mode, host_ids, recv_path, send_path, \
     archive_path, work_path FROM rules ORDER BY rule_id";

/// **Parameters:**
/// 1. `rule_id: &str`
pub const SQL_SELECT_RULE: &str = "SELECT rule_id, mode, host_ids, recv_path, send_path, \
     archive_path, work_path FROM rules WHERE rule_id = ?";

/// Insert or replace a rule
///
/// **Parameters:** `rule_id, mode, host_ids, recv_path, send_path, archive_path, work_path`
///
/// **Note:** `host_ids` is a comma-separated list; empty allows every host.
pub const SQL_UPSERT_RULE: &str = "INSERT OR REPLACE INTO rules (rule_id, mode, host_ids, \
     recv_path, send_path, archive_path, work_path) VALUES (?, ?, ?, ?, ?, ?, ?)";

pub const SQL_DELETE_ALL_RULES: &str = "DELETE FROM rules";

// ========================================================================
// Business, Alias and Role Query Operations
// ========================================================================

/// **Returns:** `(host_id)`
pub const SQL_SELECT_BUSINESS: &str = "SELECT host_id FROM business ORDER BY host_id";

/// **Parameters:**
/// 1. `host_id: &str`
pub const SQL_INSERT_BUSINESS: &str = "INSERT OR IGNORE INTO business (host_id) VALUES (?)";

pub const SQL_DELETE_ALL_BUSINESS: &str = "DELETE FROM business";

/// **Returns:** `(alias, host_id)`
pub const SQL_SELECT_ALIASES: &str = "SELECT alias, host_id FROM aliases ORDER BY alias";

/// **Parameters:**
/// 1. `alias: &str`
///
/// **Returns:** `(host_id)`
pub const SQL_RESOLVE_ALIAS: &str = "SELECT host_id FROM aliases WHERE alias = ?";

/// **Parameters:**
/// 1. `alias: &str`
/// 2. `host_id: &str`
pub const SQL_UPSERT_ALIAS: &str = "INSERT OR REPLACE INTO aliases (alias, host_id) VALUES (?, ?)";

pub const SQL_DELETE_ALL_ALIASES: &str = "DELETE FROM aliases";

/// **Returns:** `(host_id, role)`
pub const SQL_SELECT_ROLES: &str = "SELECT host_id, role FROM roles ORDER BY host_id, role";

/// **Parameters:**
/// 1. `host_id: &str`
///
/// **Returns:** `(role)`
pub const SQL_SELECT_HOST_ROLES: &str = "SELECT role FROM roles WHERE host_id = ?";

/// **Parameters:**
/// 1. `host_id: &str`
/// 2. `role: &str`
pub const SQL_INSERT_ROLE: &str = "INSERT OR IGNORE INTO roles (host_id, role) VALUES (?, ?)";

pub const SQL_DELETE_ALL_ROLES: &str = "DELETE FROM roles";
