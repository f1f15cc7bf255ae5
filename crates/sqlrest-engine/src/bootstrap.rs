//! Engine bootstrap orchestration.

use std::sync::Arc;

use ortho_config::OrthoError;
use sqlrest_config::{Config, PoolSettingsError};
use thiserror::Error;
use tracing::{info, warn};

use crate::dispatch::Engine;
use crate::plugins::Collaborators;
use crate::telemetry::{self, TelemetryError, TelemetryHandle};

const BOOTSTRAP_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::bootstrap");

/// Trait abstracting configuration loading for testability.
pub trait ConfigLoader: Send + Sync {
    /// Loads the engine configuration.
    ///
    /// # Errors
    ///
    /// Returns the loader error when any configuration layer fails.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loader that delegates to [`Config::load`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load()
    }
}

/// Loader that hands out a configuration resolved elsewhere.
#[derive(Debug, Clone)]
pub struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    /// Wraps an already-resolved configuration.
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.config.clone())
    }
}

/// Errors surfaced during bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// A configured pool cannot be used.
    #[error("invalid pool configuration: {source}")]
    Pool {
        /// Validation failure.
        #[source]
        source: PoolSettingsError,
    },
}

/// Loads configuration, initialises telemetry and builds the engine.
///
/// # Errors
///
/// Returns [`BootstrapError`] when configuration fails to load, telemetry
/// cannot be installed, or a configured pool has unusable bounds.
pub fn bootstrap_with(
    loader: &dyn ConfigLoader,
    collaborators: Collaborators,
) -> Result<(Engine, TelemetryHandle), BootstrapError> {
    let config = loader
        .load()
        .map_err(|source| BootstrapError::Configuration { source })?;
    let telemetry =
        telemetry::initialise(&config).map_err(|source| BootstrapError::Telemetry { source })?;

    for pool in [config.proxy_pool.as_ref(), config.anonymous_pool.as_ref()]
        .into_iter()
        .flatten()
    {
        pool.validate()
            .map_err(|source| BootstrapError::Pool { source })?;
    }

    if collaborators.files.canonicalize(config.repository()).is_err() {
        warn!(
            target: BOOTSTRAP_TARGET,
            repository = %config.repository(),
            "SQL repository is not accessible; file-backed statements will fail"
        );
    }

    info!(
        target: BOOTSTRAP_TARGET,
        host = config.host(),
        repository = %config.repository(),
        proxy_pool = config.proxy_pool.is_some(),
        anonymous_pool = config.anonymous_pool.is_some(),
        "engine ready"
    );
    Ok((Engine::new(config, collaborators), telemetry))
}
