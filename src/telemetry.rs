//! Telemetry initialization.
//!
//! Controlled by two environment variables:
//! - `CHANGEKIT_LOG`: an `EnvFilter` directive (default `warn`), e.g.
//!   `changekit=debug,changekit_store=info`
//! - `CHANGEKIT_LOG_FORMAT`: `json` for JSON events with span close
//!   timings, anything else for human-readable lines
//!
//! Everything goes to stderr so command output on stdout stays parseable.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

/// Filter directive variable.
pub const LOG_ENV: &str = "CHANGEKIT_LOG";
/// Output format variable.
pub const LOG_FORMAT_ENV: &str = "CHANGEKIT_LOG_FORMAT";

const DEFAULT_FILTER: &str = "warn";

/// Opaque guard. Hold this in `main()` until exit; dropping it flushes
/// stderr.
pub struct TelemetryGuard {
    _private: (),
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        use std::io::Write as _;
        let _ = std::io::stderr().flush();
    }
}

/// Output format for log events.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    fn from_env_value(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Text,
        }
    }
}

/// Install the global subscriber from `CHANGEKIT_LOG` / `CHANGEKIT_LOG_FORMAT`.
///
/// Returns a guard that must be held until the program exits. Calling this
/// twice leaves the first subscriber in place.
#[must_use]
pub fn init() -> TelemetryGuard {
    let format = LogFormat::from_env_value(std::env::var(LOG_FORMAT_ENV).ok().as_deref());
    init_with(format)
}

/// Install the global subscriber with an explicit format.
#[must_use]
pub fn init_with(format: LogFormat) -> TelemetryGuard {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let registry = tracing_subscriber::registry().with(filter);

    let result = match format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init(),
        LogFormat::Text => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false),
            )
            .try_init(),
    };
    if let Err(e) = result {
        eprintln!("warning: telemetry already initialized: {e}");
    }

    TelemetryGuard { _private: () }
}
