//! Sunwell - Agentic Orchestration Runtime
//!
//! Turns a natural-language goal into a sequence of concrete artifacts
//! produced by cooperating language-model calls. The kernel is layered
//! hexagonally:
//! - `domain` — pure types and port traits, no I/O.
//! - `services` — stateful orchestration over the port traits.
//! - `infrastructure` — concrete adapters (SQLite, figment config,
//!   tracing, HTTP model providers) implementing those ports.
//! - `cli` — the `clap`-derived command surface wiring it all together.

pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::errors::{DomainError, DomainResult};
pub use domain::models::Config;
