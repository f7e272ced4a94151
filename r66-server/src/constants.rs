//! Server constants: messages, defaults and configuration keys

use std::time::Duration;

// ========================================================================
// Startup and shutdown messages
// ========================================================================

pub const MSG_BANNER: &str = "R66 transfer server v";
pub const MSG_DATABASE: &str = "Database: ";
pub const MSG_NO_DATABASE: &str = "No database: jobs kept in memory";
pub const MSG_CERTIFICATES: &str = "Certificates: ";
pub const MSG_LISTENING: &str = "Listening on ";
pub const MSG_TLS_LISTENING: &str = "TLS listening on ";
pub const MSG_GENERATING_CERT: &str = "Generating self-signed certificate...";
pub const MSG_CERT_GENERATED: &str = "Certificate written to ";
pub const MSG_KEY_GENERATED: &str = "Private key written to ";
pub const MSG_CERT_FINGERPRINT: &str = "Certificate fingerprint: ";
pub const MSG_SHUTDOWN_RECEIVED: &str = "Shutdown signal received";
pub const MSG_SHUTDOWN_REQUESTED: &str = "Shutdown requested by ";
pub const MSG_RESTARTING: &str = "Restarting server";
pub const MSG_RECOVERED_JOBS: &str = "Recovered jobs after restart: ";
pub const MSG_BANDWIDTH_LOADED: &str = "Bandwidth limits loaded from database";

// ========================================================================
// Error messages
// ========================================================================

pub const ERR_GENERIC: &str = "Error: ";
pub const ERR_DATABASE_INIT: &str = "Failed to initialize database: ";
pub const ERR_CONFIG_LOAD: &str = "Failed to load configuration: ";
pub const ERR_TLS_INIT: &str = "Failed to initialize TLS: ";
pub const ERR_BIND_FAILED: &str = "Failed to bind ";
pub const ERR_ACCEPT: &str = "Failed to accept connection: ";
pub const ERR_CONNECTION: &str = "Connection error from ";
pub const ERR_SET_PERMISSIONS: &str = "Failed to set database permissions: ";
pub const ERR_DATA_DIR: &str = "Unable to determine data directory";
pub const ERR_SIGNAL_SIGTERM: &str = "Failed to install SIGTERM handler";
pub const ERR_SIGNAL_SIGINT: &str = "Failed to install SIGINT handler";
pub const ERR_SIGNAL_CTRLC: &str = "Failed to install Ctrl+C handler";

// TLS certificate handling
pub const ERR_GENERATE_KEYPAIR: &str = "Failed to generate key pair: ";
pub const ERR_CREATE_CERT_PARAMS: &str = "Failed to create certificate parameters: ";
pub const ERR_GENERATE_CERT: &str = "Failed to generate certificate: ";
pub const ERR_WRITE_CERT_FILE: &str = "Failed to write certificate: ";
pub const ERR_WRITE_KEY_FILE: &str = "Failed to write private key: ";
pub const ERR_OPEN_CERT_FILE: &str = "Failed to open certificate: ";
pub const ERR_OPEN_KEY_FILE: &str = "Failed to open private key: ";
pub const ERR_PARSE_CERT: &str = "Failed to parse certificate: ";
pub const ERR_PARSE_KEY: &str = "Failed to parse private key: ";
pub const ERR_NO_CERTS_FOUND: &str = "No certificates found in file";
pub const ERR_NO_KEY_FOUND: &str = "No private key found in file";
pub const ERR_CREATE_TLS_CONFIG: &str = "Failed to create TLS configuration: ";
pub const ERR_READ_METADATA: &str = "Failed to read file metadata: ";
pub const ERR_SET_PERMS: &str = "Failed to set file permissions: ";

pub const TLS_CERT_COMMON_NAME: &str = "R66 Server";
pub const CERT_FILENAME: &str = "cert.pem";
pub const KEY_FILENAME: &str = "key.pem";

// Messages sent to partners
pub const ERR_NOT_AUTHENTICATED: &str = "Authentication required";
pub const ERR_UNKNOWN_HOST: &str = "Unknown host: ";
pub const ERR_BAD_KEY: &str = "Bad authentication key for ";
pub const ERR_BLACKLISTED: &str = "Address temporarily blocked after failed authentications";
pub const ERR_BLOCKED: &str = "Server not accepting new requests";
pub const ERR_UNKNOWN_RULE: &str = "Unknown rule: ";
pub const ERR_RULE_NOT_ALLOWED: &str = "Rule not allowed for host: ";
pub const ERR_THROUGH_MODE: &str = "Pass-through modes are not supported";
pub const ERR_UNKNOWN_MODE: &str = "Unknown transfer mode";
pub const ERR_JOB_ACTIVE: &str = "Job already running in another session";
pub const ERR_JOB_FINISHED: &str = "Job already finished";
pub const ERR_SELF_REQUEST: &str = "Request loops back to this host";
pub const ERR_UNEXPECTED_PACKET: &str = "Unexpected packet in state ";
pub const ERR_BAD_RANK: &str = "Unexpected block rank ";
pub const ERR_BLOCK_DIGEST: &str = "Block digest mismatch at rank ";
pub const ERR_FINAL_DIGEST: &str = "Final digest mismatch";
pub const ERR_SIZE_MISMATCH: &str = "Transferred size differs from announced size";
pub const ERR_FILE_NOT_FOUND: &str = "File not found: ";
pub const ERR_FILE_NOT_ALLOWED: &str = "File name not allowed: ";
pub const ERR_NOT_ADMIN: &str = "Host is not allowed to run this command";
pub const ERR_SHUTTING_DOWN: &str = "Server is shutting down";

// ========================================================================
// Defaults
// ========================================================================

/// Global write/read ceiling (bytes per second)
pub const DEFAULT_GLOBAL_BANDWIDTH: u64 = 0x0800_0000;

/// Per-session write/read ceiling (bytes per second)
pub const DEFAULT_SESSION_BANDWIDTH: u64 = 0x0080_0000;

/// Shaper check interval in milliseconds
pub const DEFAULT_CHECK_INTERVAL_MS: u64 = 1000;

/// Dispatcher scan period in milliseconds
pub const DEFAULT_DELAY_COMMANDER_MS: u64 = 5000;

/// Delay before a failed job is retried, in milliseconds
pub const DEFAULT_DELAY_RETRY_MS: u64 = 30_000;

pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Worker pool bounds
pub const MIN_RUNNER_THREAD: usize = 2;
pub const MAX_RUNNER_THREAD: usize = 1000;
pub const DEFAULT_RUNNER_THREAD: usize = 8;

/// Seconds within which an interrupted job resumes at its rank
pub const DEFAULT_RESTART_WINDOW_SECS: u64 = 3600;

/// Connection timeout in milliseconds
pub const DEFAULT_TIMEOUT_CON_MS: u64 = 30_000;

pub const DEFAULT_CONNECT_RETRIES: u32 = 3;

/// Base delay between connection attempts
pub const RETRY_IN_MS: u64 = 1000;

/// Backoff unit for rejected worker submissions
pub const WAIT_FOR_NETOP: Duration = Duration::from_millis(200);

pub const DEFAULT_MAX_CONNECTIONS_PER_IP: usize = 0;
pub const DEFAULT_BAD_AUTH_THRESHOLD: u32 = 3;
pub const DEFAULT_BLACKLIST_SECS: u64 = 600;
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600;

/// Timeout for shutdown and block commands
pub const ADMIN_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(180);

/// Timeout for other administrative commands
pub const ADMIN_TIMEOUT: Duration = Duration::from_secs(60);

/// Largest load average before new sessions are refused (0 disables)
pub const DEFAULT_CPU_LIMIT: f64 = 0.0;

// ========================================================================
// Configuration keys
// ========================================================================

pub const CONFIG_KEY_WRITE_GLOBAL: &str = "bandwidth_write_global";
pub const CONFIG_KEY_READ_GLOBAL: &str = "bandwidth_read_global";
pub const CONFIG_KEY_WRITE_SESSION: &str = "bandwidth_write_session";
pub const CONFIG_KEY_READ_SESSION: &str = "bandwidth_read_session";

// ========================================================================
// File names
// ========================================================================

pub const DATA_DIR_NAME: &str = "r66d";
pub const DATABASE_FILENAME: &str = "r66.db";
pub const EXPORT_HOSTS_SUFFIX: &str = "_hosts.json";
pub const EXPORT_RULES_SUFFIX: &str = "_rules.json";
pub const EXPORT_BUSINESS_SUFFIX: &str = "_business.json";
pub const EXPORT_ALIASES_SUFFIX: &str = "_aliases.json";
pub const EXPORT_ROLES_SUFFIX: &str = "_roles.json";
pub const EXPORT_LOG_PREFIX: &str = "runners_";
