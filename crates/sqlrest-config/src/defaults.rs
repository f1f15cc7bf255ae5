//! Default values applied when no configuration layer provides a setting.

use camino::Utf8PathBuf;

use crate::logging::LogFormat;

/// Default log filter expression.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default host name used to salt private session tokens.
pub const DEFAULT_HOST: &str = "localhost";

/// Default directory, relative to the working directory, holding SQL files.
pub const DEFAULT_REPOSITORY: &str = "repository";

/// Default log filter expression.
#[must_use]
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default log output format.
#[must_use]
pub fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Default token salt.
#[must_use]
pub fn default_host() -> String {
    DEFAULT_HOST.to_owned()
}

/// Default SQL repository root.
#[must_use]
pub fn default_repository() -> Utf8PathBuf {
    Utf8PathBuf::from(DEFAULT_REPOSITORY)
}

/// Result sets are returned in the expanded per-row shape unless requested
/// otherwise.
#[must_use]
pub const fn default_compact() -> bool {
    false
}

/// Savepoint default for post-style mutations.
#[must_use]
pub const fn default_savepoint_post() -> bool {
    true
}

/// Savepoint default for patch-style mutations.
#[must_use]
pub const fn default_savepoint_patch() -> bool {
    false
}
