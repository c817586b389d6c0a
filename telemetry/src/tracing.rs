use std::sync::Once;

use thiserror::Error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};

/// Filter applied when `RUST_LOG` is not set.
const DEFAULT_LOG_FILTER: &str = "info";

/// Environment variable that turns on log output in tests.
const ENABLE_TEST_TRACING_ENV_NAME: &str = "ENABLE_TRACING";

static TEST_TRACING: Once = Once::new();

/// Errors raised while installing the global subscriber.
#[derive(Debug, Error)]
pub enum TracingError {
    #[error("a global tracing subscriber is already installed: {0}")]
    AlreadyInstalled(#[from] TryInitError),
}

/// Installs the global `tracing` subscriber for a service.
///
/// Log levels are read from `RUST_LOG` and default to `info`. Every event carries the
/// `service` name through the root span the caller enters after this returns.
pub fn init_tracing(service: &str) -> Result<(), TracingError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()?;

    tracing::info!(service, "tracing initialized");

    Ok(())
}

/// Installs a test subscriber once per process when `ENABLE_TRACING` is set.
///
/// Output goes through the test writer so it is captured per test and only shown
/// for failing tests.
pub fn init_test_tracing() {
    if std::env::var(ENABLE_TEST_TRACING_ENV_NAME).is_err() {
        return;
    }

    TEST_TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

        // Another harness may already own the global subscriber.
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .try_init();
    });
}
