use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Env var holding a tracing filter directive; `RUST_LOG` is the fallback.
pub const LOG_ENV: &str = "ASSETRY_LOG";

/// Filter directive for a CLI verbosity count (`-v`, `-vv`, ...).
pub fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

pub fn env_filter(verbosity: u8) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)))
}

/// Install the stderr subscriber. Stdout stays free for command output.
/// Calling this twice is harmless; the first subscriber stays.
pub fn init_logging(verbosity: u8) {
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);
    let _ = tracing_subscriber::registry()
        .with(env_filter(verbosity))
        .with(stderr_layer)
        .try_init();
}
