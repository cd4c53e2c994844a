use tracing_subscriber::EnvFilter;

/// Console logging on stderr. --silent drops everything below warn and wins
/// over --debug; HTTP client internals stay at warn either way.
pub fn init(silent: bool, debug: bool) {
    let level = if silent {
        "warn"
    } else if debug {
        "debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_new(format!("{level},hyper_util=warn,reqwest=warn"))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
