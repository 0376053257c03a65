use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Layer, filter::EnvFilter, fmt};

use std::backtrace::{Backtrace, BacktraceStatus};
use std::panic::PanicHookInfo;

/// Panic hook to send the panic info to `tracing` instead of stderr. Without it a panic in a shard
/// task shows up on stderr, outside the JSON logs:
/// ```text
/// {"timestamp":"2026-10-18T09:12:01.118Z","level":"INFO","message":"Windowed stream processor started",...}
///
/// thread 'tokio-runtime-worker' panicked at windowflow-core/src/processor/shard.rs:180:21:
/// ...
/// ```
///
/// With the hook the same panic is one more log line, carrying the location and the payload:
/// ```text
/// {"timestamp":"2026-10-18T09:12:01.120Z","level":"ERROR","message":"windowflow-core/src/processor/shard.rs:180:21: ..."}
/// ```
/// When a backtrace was captured (RUST_BACKTRACE is set) the default panic formatting is logged
/// along with it.
fn report_panic(panic_info: &PanicHookInfo<'_>) {
    // noop if the RUST_BACKTRACE or RUST_LIB_BACKTRACE backtrace variables are both not set
    let backtrace = Backtrace::capture();
    let backtrace_captured = backtrace.status() == BacktraceStatus::Captured;
    let payload = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
        Some(*s)
    } else {
        panic_info
            .payload()
            .downcast_ref::<String>()
            .map(|s| s.as_str())
    };

    match (panic_info.location(), payload, backtrace_captured) {
        (Some(location), Some(payload), false) => {
            tracing::error!(
                "{}:{}:{}: {}",
                location.file(),
                location.line(),
                location.column(),
                payload,
            );
        }
        _ => {
            tracing::error!("{}\n{}", panic_info, backtrace);
        }
    };
}

/// Sets up the tracing subscriber. RUST_LOG can be used to set the log level, the default is
/// `info`. Logs are JSON unless WINDOWFLOW_DEBUG is true, which switches to text and `debug`.
pub fn register() {
    let debug_mode = std::env::var("WINDOWFLOW_DEBUG").is_ok_and(|v| v.to_lowercase() == "true");
    let default_log_level = if debug_mode { "debug" } else { "info" };

    let filter = EnvFilter::builder()
        .with_default_directive(default_log_level.parse().unwrap_or(Level::INFO.into()))
        .from_env_lossy();

    // logs go to stderr, stdout carries the window results
    let layer = if debug_mode {
        fmt::layer().with_writer(std::io::stderr).boxed()
    } else {
        // JSON format, flattened
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .json()
            .flatten_event(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .init();

    std::panic::set_hook(Box::new(report_panic));
}
