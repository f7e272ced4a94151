//! Server configuration
//!
//! Loaded once at startup from an optional JSON file; every field has a
//! default so an empty object is a valid configuration. Command-line
//! arguments override the host id and base directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use r66_common::digest::DigestAlgo;
use r66_common::packet::BandwidthLimits;
use r66_common::{DEFAULT_BLOCK_SIZE, DEFAULT_FIELD_SEPARATOR};
use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::{R66Error, Result};

/// Server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host id announced on plain connections
    pub host_id: String,
    /// Host id announced on TLS connections (defaults to `host_id`)
    pub ssl_host_id: Option<String>,
    /// Shared secret for this host; partners announce its digest
    pub host_secret: String,
    /// Base directory; the other directories are relative to it
    pub base_dir: PathBuf,
    pub in_dir: PathBuf,
    pub out_dir: PathBuf,
    pub work_dir: PathBuf,
    pub arch_dir: PathBuf,
    pub config_dir: PathBuf,
    pub block_size: u32,
    pub delay_commander_ms: u64,
    pub delay_retry_ms: u64,
    pub max_retries: u32,
    pub runner_thread: usize,
    pub restart_window_secs: u64,
    /// Blocks subtracted from the persisted rank when resuming
    pub rank_rewind: u32,
    pub write_global: u64,
    pub read_global: u64,
    pub write_session: u64,
    pub read_session: u64,
    pub check_interval_ms: u64,
    /// Load average above which new sessions are refused (0 disables)
    pub cpu_limit: f64,
    /// Active sessions above which new sessions are refused (0 disables)
    pub channel_limit: usize,
    pub max_connections_per_ip: usize,
    pub bad_auth_threshold: u32,
    pub blacklist_secs: u64,
    pub digest: DigestAlgo,
    pub field_separator: String,
    /// This host sits behind a proxy
    pub proxified: bool,
    /// Protocol version announced instead of this release's, for partners
    /// that only speak an older dialect
    pub announced_version: Option<String>,
    pub cache_capacity: usize,
    pub cache_ttl_secs: u64,
    pub timeout_con_ms: u64,
    pub connect_retries: u32,
    pub connect_retry_delay_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host_id: "r66server".to_string(),
            ssl_host_id: None,
            host_secret: String::new(),
            base_dir: PathBuf::from("."),
            in_dir: PathBuf::from("in"),
            out_dir: PathBuf::from("out"),
            work_dir: PathBuf::from("work"),
            arch_dir: PathBuf::from("arch"),
            config_dir: PathBuf::from("conf"),
            block_size: DEFAULT_BLOCK_SIZE,
            delay_commander_ms: DEFAULT_DELAY_COMMANDER_MS,
            delay_retry_ms: DEFAULT_DELAY_RETRY_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            runner_thread: DEFAULT_RUNNER_THREAD,
            restart_window_secs: DEFAULT_RESTART_WINDOW_SECS,
            rank_rewind: 0,
            write_global: DEFAULT_GLOBAL_BANDWIDTH,
            read_global: DEFAULT_GLOBAL_BANDWIDTH,
            write_session: DEFAULT_SESSION_BANDWIDTH,
            read_session: DEFAULT_SESSION_BANDWIDTH,
            check_interval_ms: DEFAULT_CHECK_INTERVAL_MS,
            cpu_limit: DEFAULT_CPU_LIMIT,
            channel_limit: 0,
            max_connections_per_ip: DEFAULT_MAX_CONNECTIONS_PER_IP,
            bad_auth_threshold: DEFAULT_BAD_AUTH_THRESHOLD,
            blacklist_secs: DEFAULT_BLACKLIST_SECS,
            digest: DigestAlgo::default(),
            field_separator: DEFAULT_FIELD_SEPARATOR.to_string(),
            proxified: false,
            announced_version: None,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            timeout_con_ms: DEFAULT_TIMEOUT_CON_MS,
            connect_retries: DEFAULT_CONNECT_RETRIES,
            connect_retry_delay_ms: RETRY_IN_MS,
        }
    }
}

impl ServerConfig {
    /// Load a configuration file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid JSON.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.host_id.trim().is_empty() {
            return Err(R66Error::IncorrectCommand("host_id must not be empty".into()));
        }
        if self.field_separator.is_empty() {
            return Err(R66Error::IncorrectCommand(
                "field_separator must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Worker pool size clamped to the supported range
    pub fn runner_thread(&self) -> usize {
        self.runner_thread.clamp(MIN_RUNNER_THREAD, MAX_RUNNER_THREAD)
    }

    /// Host id announced on a connection
    pub fn local_host_id(&self, tls: bool) -> &str {
        match (&self.ssl_host_id, tls) {
            (Some(id), true) => id,
            _ => &self.host_id,
        }
    }

    fn resolve(&self, dir: &Path) -> PathBuf {
        if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            self.base_dir.join(dir)
        }
    }

    /// Directory named by a rule, or `default` when the rule leaves it empty
    pub fn rule_dir(&self, dir: &str, default: PathBuf) -> PathBuf {
        if dir.is_empty() {
            default
        } else {
            self.resolve(Path::new(dir))
        }
    }

    /// Directory receiving incoming files
    pub fn in_path(&self) -> PathBuf {
        self.resolve(&self.in_dir)
    }

    /// Directory holding files to send
    pub fn out_path(&self) -> PathBuf {
        self.resolve(&self.out_dir)
    }

    /// Directory for partial files
    pub fn work_path(&self) -> PathBuf {
        self.resolve(&self.work_dir)
    }

    /// Directory for exports (configuration and logs)
    pub fn arch_path(&self) -> PathBuf {
        self.resolve(&self.arch_dir)
    }

    /// Directory for configuration files to import
    pub fn config_path(&self) -> PathBuf {
        self.resolve(&self.config_dir)
    }

    /// Create every working directory
    ///
    /// # Errors
    ///
    /// Returns an error if a directory cannot be created.
    pub fn create_dirs(&self) -> Result<()> {
        for dir in [
            self.in_path(),
            self.out_path(),
            self.work_path(),
            self.arch_path(),
            self.config_path(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Bandwidth limits from the configuration
    pub fn bandwidth(&self) -> BandwidthLimits {
        BandwidthLimits {
            write_global: self.write_global,
            read_global: self.read_global,
            write_session: self.write_session,
            read_session: self.read_session,
        }
    }

    pub fn delay_commander(&self) -> Duration {
        Duration::from_millis(self.delay_commander_ms)
    }

    pub fn delay_retry(&self) -> Duration {
        Duration::from_millis(self.delay_retry_ms)
    }

    pub fn timeout_con(&self) -> Duration {
        Duration::from_millis(self.timeout_con_ms)
    }

    pub fn restart_window(&self) -> Duration {
        Duration::from_secs(self.restart_window_secs)
    }

    pub fn connect_retry_delay(&self) -> Duration {
        Duration::from_millis(self.connect_retry_delay_ms)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_uses_defaults() {
        let config: ServerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.write_global, 0x0800_0000);
        assert_eq!(config.write_session, 0x0080_0000);
    }

    #[test]
    fn test_runner_thread_clamped() {
        let mut config = ServerConfig {
            runner_thread: 1,
            ..ServerConfig::default()
        };
        assert_eq!(config.runner_thread(), 2);
        config.runner_thread = 5000;
        assert_eq!(config.runner_thread(), 1000);
    }

    #[test]
    fn test_relative_dirs_resolve_under_base() {
        let config = ServerConfig {
            base_dir: PathBuf::from("/srv/r66"),
            out_dir: PathBuf::from("/data/out"),
            ..ServerConfig::default()
        };
        assert_eq!(config.in_path(), PathBuf::from("/srv/r66/in"));
        assert_eq!(config.out_path(), PathBuf::from("/data/out"));
        assert_eq!(config.rule_dir("", config.in_path()), PathBuf::from("/srv/r66/in"));
        assert_eq!(config.rule_dir("edi", config.in_path()), PathBuf::from("/srv/r66/edi"));
    }

    #[test]
    fn test_ssl_host_id() {
        let config = ServerConfig {
            host_id: "plain".into(),
            ssl_host_id: Some("secure".into()),
            ..ServerConfig::default()
        };
        assert_eq!(config.local_host_id(false), "plain");
        assert_eq!(config.local_host_id(true), "secure");
    }

    #[test]
    fn test_load_rejects_empty_host() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r66.json");
        std::fs::write(&path, r#"{"host_id":" "}"#).unwrap();
        assert!(ServerConfig::load(&path).is_err());

        std::fs::write(&path, r#"{"host_id":"hostA","digest":"SHA512"}"#).unwrap();
        let config = ServerConfig::load(&path).unwrap();
        assert_eq!(config.host_id, "hostA");
        assert_eq!(config.digest, DigestAlgo::Sha512);
    }
}
