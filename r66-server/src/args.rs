//! Command-line argument parsing

use std::net::IpAddr;
use std::path::PathBuf;

use clap::Parser;
use r66_common::{DEFAULT_PORT, DEFAULT_TLS_PORT};

/// Get default database path help text for current platform
fn default_database_help() -> String {
    #[cfg(target_os = "linux")]
    return "Database file path (default: ~/.local/share/r66d/r66.db)".to_string();

    #[cfg(target_os = "macos")]
    return "Database file path (default: ~/Library/Application Support/r66d/r66.db)".to_string();

    #[cfg(target_os = "windows")]
    return "Database file path (default: %APPDATA%\\r66d\\r66.db)".to_string();

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    return "Database file path (overrides platform default)".to_string();
}

/// R66 managed file-transfer server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// IP address to bind to (IPv4 or IPv6)
    #[arg(short, long, default_value = "0.0.0.0")]
    pub bind: IpAddr,

    /// Port for plain connections
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Also listen for TLS connections
    #[arg(long, default_value = "false")]
    pub tls: bool,

    /// Port for TLS connections (requires --tls)
    #[arg(long, default_value_t = DEFAULT_TLS_PORT)]
    pub tls_port: u16,

    /// Database file path (overrides platform default)
    #[arg(short, long, help = default_database_help())]
    pub database: Option<PathBuf>,

    /// Keep jobs in memory instead of a database
    #[arg(long, default_value = "false")]
    pub no_database: bool,

    /// JSON configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host id of this server (overrides the configuration file)
    #[arg(long)]
    pub host_id: Option<String>,

    /// Base directory for transferred files (overrides the configuration file)
    #[arg(long)]
    pub base_dir: Option<PathBuf>,

    /// Directory holding cert.pem and key.pem (default: database directory)
    #[arg(long)]
    pub cert_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, default_value = "false")]
    pub debug: bool,
}
