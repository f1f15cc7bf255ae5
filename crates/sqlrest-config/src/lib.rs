//! Layered configuration for the sqlrest engine.
//!
//! Settings are resolved with [`ortho_config`] from defaults, an optional
//! configuration file, `SQLREST_*` environment variables and command-line
//! flags, in increasing order of precedence. The embedding server loads a
//! [`Config`] once and hands it to the engine bootstrap.

mod defaults;
mod logging;
mod pool;

use std::ffi::OsString;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::{OrthoConfig, OrthoError};
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_HOST, DEFAULT_LOG_FILTER, DEFAULT_REPOSITORY, default_compact, default_host,
    default_log_filter, default_log_filter_string, default_log_format, default_repository,
    default_savepoint_patch, default_savepoint_post,
};
pub use logging::{LogFormat, LogFormatParseError, LogSettings};
pub use pool::{PoolSettings, PoolSettingsError};

/// Which of the two configured pools a session should draw from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolRole {
    /// Pool whose connections proxy an identified end user.
    Proxy,
    /// Pool used when the caller did not identify itself.
    Anonymous,
}

/// Resolved engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "SQLREST")]
pub struct Config {
    /// Filter expression in `tracing_subscriber::EnvFilter` syntax.
    #[ortho_config(default = default_log_filter_string())]
    pub log_filter: String,
    /// Log output encoding.
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
    /// Host name used to salt private session tokens.
    #[ortho_config(default = default_host())]
    pub host: String,
    /// Directory that file-backed SQL references must resolve inside.
    #[ortho_config(default = default_repository())]
    pub repository: Utf8PathBuf,
    /// Return result sets as column list plus row matrix by default.
    #[ortho_config(default = default_compact())]
    pub compact: bool,
    /// Date format applied to fetched date columns when a request names none.
    pub date_format: Option<String>,
    /// Open a savepoint around post-style mutations unless the request says
    /// otherwise.
    #[ortho_config(default = default_savepoint_post())]
    pub savepoint_post: bool,
    /// Open a savepoint around patch-style mutations unless the request says
    /// otherwise.
    #[ortho_config(default = default_savepoint_patch())]
    pub savepoint_patch: bool,
    /// Pool used for sessions that name an end user.
    pub proxy_pool: Option<PoolSettings>,
    /// Pool used for sessions without a user name.
    pub anonymous_pool: Option<PoolSettings>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            host: default_host(),
            repository: default_repository(),
            compact: default_compact(),
            date_format: None,
            savepoint_post: default_savepoint_post(),
            savepoint_patch: default_savepoint_patch(),
            proxy_pool: None,
            anonymous_pool: None,
        }
    }
}

impl Config {
    /// Loads configuration from the process arguments, environment and files.
    ///
    /// # Errors
    ///
    /// Returns the aggregated loader error when any layer fails to parse.
    pub fn load() -> Result<Self, Arc<OrthoError>> {
        <Self as OrthoConfig>::load()
    }

    /// Loads configuration using an explicit argument vector.
    ///
    /// # Errors
    ///
    /// Returns the aggregated loader error when any layer fails to parse.
    pub fn load_from_args(args: Vec<OsString>) -> Result<Self, Arc<OrthoError>> {
        <Self as OrthoConfig>::load_from_iter(args)
    }

    /// Filter expression handed to the tracing subscriber.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log output encoding.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Filter and encoding handed to the telemetry layer.
    #[must_use]
    pub fn log_settings(&self) -> LogSettings<'_> {
        LogSettings {
            filter: &self.log_filter,
            format: self.log_format,
        }
    }

    /// Token salt.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// SQL repository root as configured (not yet canonicalised).
    #[must_use]
    pub fn repository(&self) -> &Utf8Path {
        &self.repository
    }

    /// Effective savepoint default for the given mutation style.
    #[must_use]
    pub const fn savepoint_default(&self, patch: bool) -> bool {
        if patch {
            self.savepoint_patch
        } else {
            self.savepoint_post
        }
    }

    /// Settings for the pool filling the given role, if configured.
    #[must_use]
    pub fn pool(&self, role: PoolRole) -> Option<&PoolSettings> {
        match role {
            PoolRole::Proxy => self.proxy_pool.as_ref(),
            PoolRole::Anonymous => self.anonymous_pool.as_ref(),
        }
    }
}
