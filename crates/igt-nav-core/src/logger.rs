//! Minimal logger for navigation sessions.
//!
//! Records are printed as `[elapsed LEVEL target] message` to stderr. The
//! target column makes it easy to tell collector, calibration and
//! reconstruction messages apart during a tracked session. Use
//! `init_with_level` once at startup.

use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

use log::{LevelFilter, Log, Metadata, Record};

#[cfg(feature = "tracing")]
use tracing_subscriber::fmt::format::FmtSpan;
#[cfg(feature = "tracing")]
use tracing_subscriber::util::SubscriberInitExt;
#[cfg(feature = "tracing")]
use tracing_subscriber::{fmt, EnvFilter};

struct SessionLogger {
    level: LevelFilter,
    started: Instant,
}

impl Log for SessionLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let elapsed = self.started.elapsed().as_secs_f64();
        let target = record.target().rsplit("::").next().unwrap_or("");
        let mut stderr = std::io::stderr();
        let _ = writeln!(
            stderr,
            "[{:7.3}s {:>5} {}] {}",
            elapsed,
            record.level(),
            target,
            record.args()
        );
    }

    fn flush(&self) {}
}

static LOGGER: OnceLock<SessionLogger> = OnceLock::new();

/// Install the session logger with the provided level filter.
///
/// Calling this more than once is a no-op after the first successful
/// initialization.
pub fn init_with_level(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    if LOGGER.get().is_none() {
        let logger = LOGGER.get_or_init(|| SessionLogger {
            level,
            started: Instant::now(),
        });
        log::set_logger(logger)?;
        log::set_max_level(level);
    }
    Ok(())
}

/// Install a `tracing` subscriber writing to stderr.
///
/// `RUST_LOG` takes precedence; otherwise events at `default_level` and
/// above are kept. Span close events carry their busy and idle times, which
/// shows how long collector updates and path rebuilds take.
#[cfg(feature = "tracing")]
pub fn init_tracing(default_level: LevelFilter, json: bool) {
    let directive = default_level.as_str().to_ascii_lowercase();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
    let builder = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_span_events(FmtSpan::CLOSE);
    let installed = if json {
        builder.json().with_current_span(false).finish().try_init()
    } else {
        builder
            .with_timer(fmt::time::Uptime::default())
            .compact()
            .finish()
            .try_init()
    };
    if installed.is_err() {
        log::debug!("a tracing subscriber is already installed");
    }
}

#[cfg(all(test, feature = "tracing"))]
mod tests {
    use super::*;

    #[test]
    fn tracing_init_is_repeatable() {
        init_tracing(LevelFilter::Info, false);
        init_tracing(LevelFilter::Debug, true);
        tracing::info!(target: "igt_nav_core::logger", "subscriber installed");
    }
}
