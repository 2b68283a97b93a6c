//! Tracing subscriber setup.

use crate::cli::TracingFormat;
use crate::config::Config;
use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt::format::JsonFields};

/// Install the global subscriber. `RUST_LOG` wins when set; otherwise other
/// crates are capped at `warn` and our own level comes from the config.
pub fn setup_logging(config: &Config, format: TracingFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,binder={}", config.log_level)));

    let fmt_layer: Box<dyn Layer<Layered<EnvFilter, Registry>> + Send + Sync> = match format {
        TracingFormat::Pretty => tracing_subscriber::fmt::layer()
            .with_target(true)
            .compact()
            .boxed(),
        TracingFormat::Json => tracing_subscriber::fmt::layer()
            .with_target(true)
            .json()
            .fmt_fields(JsonFields::new())
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}
