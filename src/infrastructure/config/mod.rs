//! Hierarchical configuration loading (spec §9).

mod loader;

pub use loader::{ConfigError, ConfigLoader};
