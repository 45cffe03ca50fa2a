//! Structured logging built once at process start and threaded explicitly
//! through the orchestrator and every engine/adapter beneath it — no global
//! logger, mirroring the teacher's own terminal-decorated `slog` root.

use slog::{Drain, Level, Logger};

/// Build the root logger for one CLI invocation. `verbosity` is the count of
/// `-v` flags: 0 = info and above, 1 = debug, 2+ = trace.
pub fn root_logger(verbosity: u8) -> Logger {
    let level = match verbosity {
        0 => Level::Info,
        1 => Level::Debug,
        _ => Level::Trace,
    };

    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog::LevelFilter::new(drain, level).fuse();
    let drain = std::sync::Mutex::new(drain).fuse();
    Logger::root(drain, slog::o!())
}

#[cfg(test)]
pub fn discard_logger() -> Logger {
    Logger::root(slog::Discard, slog::o!())
}
