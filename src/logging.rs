use tracing_subscriber::EnvFilter;

/// Install the global subscriber. Level comes from OPENSHIP_LOG, default
/// info. Safe to call more than once; later calls are no-ops.
pub fn init() {
    let filter =
        EnvFilter::try_from_env("OPENSHIP_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .ok();
}
