//! How the engine reports its own activity.
//!
//! Engine logs are consumed by two audiences: log shippers that index
//! per-request fields (request sequence number, session GUID) and operators
//! tailing a terminal. [`LogFormat`] picks between them and [`LogSettings`]
//! bundles the choice with the filter so the telemetry layer reads one value.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Encoding of engine log events.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// One JSON object per event carrying the enclosing request's fields.
    #[default]
    Json,
    /// One line per event with request fields inlined as `key=value`.
    Compact,
}

impl LogFormat {
    /// Whether events are machine-readable records.
    #[must_use]
    pub const fn is_structured(self) -> bool {
        matches!(self, Self::Json)
    }
}

/// Error returned when a [`LogFormat`] cannot be parsed from text.
pub type LogFormatParseError = strum::ParseError;

/// Logging choices resolved from [`crate::Config`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogSettings<'a> {
    /// Filter in `tracing_subscriber::EnvFilter` syntax.
    pub filter: &'a str,
    /// Event encoding.
    pub format: LogFormat,
}

impl LogSettings<'_> {
    /// Whether to colour output written to a sink that `is_terminal`.
    ///
    /// Structured records are never coloured; escape codes would corrupt
    /// them for shippers.
    #[must_use]
    pub const fn ansi(&self, is_terminal: bool) -> bool {
        is_terminal && !self.format.is_structured()
    }
}
