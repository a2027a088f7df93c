//! Tracing subscriber setup.
//!
//! `RUST_LOG` wins when set; otherwise `linboard=info`, or `linboard=debug`
//! with `--verbose`. Output goes to stderr so `config show` stays pipeable.

use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

use crate::config::LogFormat;

fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "linboard=debug,tower_http=debug"
    } else {
        "linboard=info"
    }
}

fn build_stdout_layer(format: LogFormat) -> Box<dyn Layer<Registry> + Send + Sync> {
    match format {
        LogFormat::Pretty => Box::new(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true),
        ),
        LogFormat::Json => Box::new(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_current_span(true),
        ),
    }
}

/// Install the global subscriber. A second call is a no-op.
pub fn init(format: LogFormat, verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    let _ = Registry::default()
        .with(build_stdout_layer(format))
        .with(filter)
        .try_init();
}
