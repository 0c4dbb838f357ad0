//! Textgen Server
//!
//! HTTP front end for a single text-generation pipeline.

pub mod app;
pub mod error;
pub mod version;

pub use app::{create_app, AppState, InvokeRequest, InvokeResponse};
pub use error::ApiError;
pub use version::VersionInfo;

use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter when `RUST_LOG` is unset
const DEFAULT_LOG_FILTER: &str = "textgen_server=info,textgen_pipeline=info,tower_http=info";

/// Subscriber honoring `RUST_LOG` that formats events into `writer`
pub fn log_subscriber<W>(writer: W) -> impl tracing::Subscriber + Send + Sync + 'static
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(writer))
}

/// Install the tracing subscriber, logging to stdout
pub fn init_tracing() {
    log_subscriber(std::io::stdout).init();
}

/// Install the tracing subscriber, logging to stderr
///
/// For binaries whose stdout carries their output.
pub fn init_cli_tracing() {
    log_subscriber(std::io::stderr).init();
}
