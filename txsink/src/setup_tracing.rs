use std::backtrace::{Backtrace, BacktraceStatus};
use std::panic::PanicHookInfo;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Layer, filter::EnvFilter, fmt};

const DEBUG_ENV: &str = "TXSINK_DEBUG";

/// Routes panics to `tracing` so that they end up as a single error line in the JSON log
/// instead of free-form text on stderr.
fn report_panic(panic_info: &PanicHookInfo<'_>) {
    // only captured when RUST_BACKTRACE or RUST_LIB_BACKTRACE is set
    let backtrace = Backtrace::capture();
    let backtrace_captured = backtrace.status() == BacktraceStatus::Captured;
    let payload = match panic_info.payload().downcast_ref::<&str>() {
        Some(s) => Some(*s),
        None => panic_info
            .payload()
            .downcast_ref::<String>()
            .map(|s| s.as_str()),
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

pub fn register() {
    // RUST_LOG overrides the default level, which is `info` unless TXSINK_DEBUG=true.
    let debug_mode = std::env::var(DEBUG_ENV).is_ok_and(|v| v.eq_ignore_ascii_case("true"));
    let default_level = if debug_mode { Level::DEBUG } else { Level::INFO };

    let filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    let layer = if debug_mode {
        fmt::layer().boxed()
    } else {
        // JSON, flattened
        fmt::layer()
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
