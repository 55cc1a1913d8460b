//! Worker bootstrap: configuration, telemetry, then the serve loop.

use std::io::{BufRead, Write};
use std::sync::Arc;

use ortho_config::{OrthoConfig, OrthoError};
use tether_config::{Config, ConfigError};
use thiserror::Error;
use tracing::info;

use crate::dispatch::ShutdownCause;
use crate::error::WorkerError;
use crate::runtime::{WorkerOptions, serve};
use crate::surface::AutomationSurface;
use crate::telemetry::{self, TelemetryError};

const BOOTSTRAP_TARGET: &str = "tether_worker::bootstrap";

/// Trait abstracting configuration loading for testability.
pub trait ConfigLoader: Send + Sync {
    /// Loads the worker configuration.
    ///
    /// # Errors
    ///
    /// Returns the loader failure unchanged.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loader that delegates to [`OrthoConfig::load`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load()
    }
}

/// Errors surfaced while bootstrapping or running the worker.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Configuration loaded but is inconsistent.
    #[error("invalid configuration: {source}")]
    Invalid {
        /// Violated invariant.
        #[source]
        source: ConfigError,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// The worker stopped on a runtime failure.
    #[error("worker failed: {source}")]
    Worker {
        /// Underlying runtime error.
        #[source]
        source: WorkerError,
    },
}

/// Loads configuration, installs telemetry, and serves `surface` until the
/// host disconnects.
///
/// # Errors
///
/// Returns [`BootstrapError`] describing the stage that failed.
pub fn run_with<S, R, W>(
    loader: &dyn ConfigLoader,
    surface: S,
    input: R,
    output: W,
) -> Result<ShutdownCause, BootstrapError>
where
    S: AutomationSurface,
    R: BufRead + Send + 'static,
    W: Write + Send + 'static,
{
    let config = loader
        .load()
        .map_err(|source| BootstrapError::Configuration { source })?;
    config
        .validate_worker()
        .map_err(|source| BootstrapError::Invalid { source })?;
    let telemetry = telemetry::initialise(&config)
        .map_err(|source| BootstrapError::Telemetry { source })?;
    info!(
        target: BOOTSTRAP_TARGET,
        ?telemetry,
        heartbeat_interval_ms = config.heartbeat_interval_ms,
        "worker bootstrapped"
    );

    let options = WorkerOptions::from_config(&config);
    serve(surface, input, output, &options).map_err(|source| BootstrapError::Worker { source })
}
