use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;

const DEFAULT_FILTER: &str = "info,sheetpoints=info";

/// `filter` (from `RUST_LOG`) or [`DEFAULT_FILTER`], plus `level` (from
/// `LOG_LEVEL`, same knob the service deployments use) as an extra directive.
pub fn build_filter(cfg: &LoggingConfig) -> EnvFilter {
    let mut filter = cfg
        .filter
        .as_deref()
        .and_then(|f| EnvFilter::try_new(f).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER));
    if let Some(level) = cfg.level.as_deref() {
        filter = filter.add_directive(level.parse().unwrap_or(Level::INFO.into()));
    }
    filter
}

/// Install the global `tracing` subscriber. Call after [`Config::load`] so
/// values from `.env` are honoured.
///
/// [`Config::load`]: crate::config::Config::load
pub fn init(cfg: &LoggingConfig) {
    let _ = fmt::Subscriber::builder()
        .with_env_filter(build_filter(cfg))
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .try_init();
}

#[cfg(test)]
pub(crate) fn init_test_logging() {
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::new("info,sheetpoints=debug"))
        .with_test_writer()
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
