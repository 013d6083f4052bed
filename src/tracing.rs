use tracing_subscriber::{fmt, EnvFilter};

/// Filter used by the job CLI and the API server when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "info,sqlx=warn";

/// Installs the global fmt subscriber.
///
/// `RUST_LOG` wins over `default_filter`. `LOG_FORMAT=compact` drops file and
/// line locations, which cron mail output tends to prefer.
pub fn init_tracing(default_filter: &str) -> Result<(), anyhow::Error> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let compact = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("compact"))
        .unwrap_or(false);

    let installed = if compact {
        fmt().compact().with_env_filter(filter).with_target(false).try_init()
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .try_init()
    };
    installed.map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))
}
