//! Concrete adapters implementing the `domain::ports` traits: `SQLite`
//! persistence, figment configuration, tracing-based logging, and HTTP
//! model providers.

pub mod backlog_file;
pub mod config;
pub mod database;
pub mod logging;
pub mod substrates;
