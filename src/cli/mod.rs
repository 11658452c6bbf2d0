//! `clap`-derived CLI surface wiring the service layer together (spec
//! §6's goal surface plus teacher-style admin commands).
//!
//! Grounded on the teacher's `cli` module split: `types` owns the
//! `clap::Parser` structures, `commands` owns one handler module per
//! subcommand, `output` owns terminal formatting.

pub mod commands;
pub mod output;
pub mod types;

pub use types::{Cli, Commands, MemoryCommands, ProviderArg, TrustArg};
