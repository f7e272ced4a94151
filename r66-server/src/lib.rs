//! R66 Transfer Server Library
//!
//! This library exposes the server's internal modules for integration testing.

pub mod admin;
pub mod admission;
pub mod args;
pub mod config;
pub mod constants;
pub mod context;
pub mod db;
pub mod error;
pub mod jobs;
pub mod logging;
pub mod scheduler;
pub mod session;
pub mod shaper;
pub mod transport;
