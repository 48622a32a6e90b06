//! Logging.
//!
//! Writes to stderr, never stdout: stdout is the remote-helper wire
//! channel back to the host Git process and must carry nothing but
//! protocol responses.
use std::io::{self, Write};

use log::{Level, Log, Metadata, Record, SetLoggerError};

struct Logger {
    level: Level,
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let message = format!(
                "{:<5} {:<20} {}",
                record.level(),
                record.target(),
                record.args()
            );
            writeln!(io::stderr(), "{message}").ok();
        }
    }

    fn flush(&self) {}
}

/// Initialize the global logger.
pub fn init(level: Level) -> Result<(), SetLoggerError> {
    log::set_boxed_logger(Box::new(Logger { level }))?;
    log::set_max_level(level.to_level_filter());
    Ok(())
}

/// Read the log level from `GIT_REMOTE_SQLITE_LOG`, falling back to `RUST_LOG`.
pub fn env_level() -> Option<Level> {
    std::env::var("GIT_REMOTE_SQLITE_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .ok()
        .and_then(|v| v.parse().ok())
}
