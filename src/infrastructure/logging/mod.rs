//! Tracing-based structured logging: JSON/pretty formatting, daily file
//! rotation with retention-based cleanup, and secret scrubbing for
//! anything that accidentally logs a provider API key or bearer token.
//!
//! Grounded on the teacher's `infrastructure::logging` module, split the
//! same way: `logger` owns subscriber construction, `rotation` owns
//! retention cleanup, `secret_scrubbing` owns the redaction patterns.

pub mod logger;
pub mod rotation;
pub mod secret_scrubbing;

pub use logger::{init, LoggerHandle};
pub use secret_scrubbing::SecretScrubber;
