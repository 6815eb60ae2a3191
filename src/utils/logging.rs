use tracing_subscriber::EnvFilter;

/// Initialize tracing for the process.
///
/// `RUST_LOG` wins when set; otherwise `default_level` applies to every target.
/// Safe to call more than once.
pub fn init(default_level: &str) {
    let level = match default_level.to_lowercase().as_str() {
        "error" => "error",
        "warn" | "warning" => "warn",
        "debug" => "debug",
        "trace" => "trace",
        _ => "info",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
