//! Logging setup and scoped event macros.
//!
//! The three macros below all emit through `tracing`, scoped under a named
//! span so the scheduler's internal bookkeeping events (throttle, blocker
//! rescans, finalization) are easy to filter from worker I/O events.

use chrono::Utc;
use tracing::metadata::LevelFilter;
use tracing_subscriber::{
    filter::FilterFn, fmt::time::FormatTime, prelude::__tracing_subscriber_SubscriberExt,
    util::SubscriberInitExt, Layer,
};

struct MicrosSinceEpoch;

impl FormatTime for MicrosSinceEpoch {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        w.write_fmt(format_args!("{}", Utc::now().timestamp_micros()))
    }
}

#[macro_export]
macro_rules! log {
    ($level:expr, $span:expr, $($msg:expr),*) => {{
        let span = $crate::tracing::span!(target: "waystation", $level, $span);
        let _enter = span.enter();
        $crate::tracing::event!(target: "waystation", $level, $($msg),*)
    }};
}

/// Scheduler-internal bookkeeping: throttle/unthrottle, blocker rescans,
/// `move_limits` decisions, entity create/destroy.
#[macro_export]
macro_rules! internal {
    (level = $level:ident, $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "internal", $($msg),*)
    };
    ($($msg:expr),*) => {
        $crate::internal!(level = TRACE, $($msg),*)
    };
}

/// A dispatch handed to a worker.
#[macro_export]
macro_rules! outgoing {
    (level = $level:ident, $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "outgoing", $($msg),*)
    };
    ($($msg:expr),*) => {
        $crate::outgoing!(level = TRACE, $($msg),*)
    };
}

/// A completion report received from a worker.
#[macro_export]
macro_rules! incoming {
    (level = $level:ident, $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "incoming", $($msg),*)
    };
    ($($msg:expr),*) => {
        $crate::incoming!(level = TRACE, $($msg),*)
    };
}

/// Install a `tracing` subscriber for the `waystation` target.
///
/// Honors `LOG_LEVEL` (`error`, `warn`, `info`, `trace`), defaulting to
/// `trace` in debug builds and `info` in release builds.
pub fn init() {
    let level = std::env::var("LOG_LEVEL").map_or_else(
        |_| {
            if cfg!(debug_assertions) {
                LevelFilter::TRACE
            } else {
                LevelFilter::INFO
            }
        },
        |level| match level.to_ascii_lowercase().as_str() {
            "warn" => LevelFilter::WARN,
            "info" => LevelFilter::INFO,
            "trace" => LevelFilter::TRACE,
            _ => LevelFilter::ERROR,
        },
    );

    tracing_subscriber::Registry::default()
        .with(
            (if cfg!(debug_assertions) {
                tracing_subscriber::fmt::layer()
            } else {
                tracing_subscriber::fmt::layer()
                    .with_file(false)
                    .with_line_number(false)
            })
            .compact()
            .with_ansi(true)
            .with_timer(MicrosSinceEpoch)
            .with_target(false)
            .with_level(true)
            .with_filter(level)
            .with_filter(FilterFn::new(|metadata| {
                metadata.target().starts_with("waystation")
            })),
        )
        .init();
}
