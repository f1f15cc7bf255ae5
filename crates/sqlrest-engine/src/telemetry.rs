//! Engine logging: the global subscriber and per-request spans.
//!
//! Every top-level request runs inside a `request` span carrying its
//! sequence number, mutation style and command; once the path's token
//! resolves, the span also records the session GUID. Events emitted while
//! dispatching (including those of nested batch entries) inherit these
//! fields, so one session's activity can be followed across worker threads.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use sqlrest_config::{Config, LogSettings};
use tracing::subscriber::SetGlobalDefaultError;
use tracing::{Span, Subscriber, field, info_span};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::{self, MakeWriter};

use crate::dispatch::MutationStyle;

/// Tracing target for request spans.
pub(crate) const REQUEST_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::request");

static SUBSCRIBER_INSTALLED: OnceCell<()> = OnceCell::new();

/// Proof that the engine's subscriber is installed.
#[derive(Debug, Default, Clone, Copy)]
pub struct TelemetryHandle;

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The configured filter expression does not parse.
    #[error("invalid log filter: {0}")]
    Filter(String),
    /// Another global subscriber was installed first.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Installs the engine's global subscriber, writing to standard error.
///
/// Only the first call installs anything; later calls succeed without
/// touching global state.
///
/// # Errors
///
/// Returns [`TelemetryError`] when the filter does not parse or another
/// subscriber is already installed.
pub fn initialise(config: &Config) -> Result<TelemetryHandle, TelemetryError> {
    SUBSCRIBER_INSTALLED
        .get_or_try_init(|| {
            let settings = config.log_settings();
            let ansi = settings.ansi(io::stderr().is_terminal());
            let subscriber = subscriber(settings, io::stderr, ansi)?;
            tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)
        })
        .map(|_| TelemetryHandle)
}

/// Builds a subscriber for `settings` writing through `writer`.
fn subscriber<W>(
    settings: LogSettings<'_>,
    writer: W,
    ansi: bool,
) -> Result<Box<dyn Subscriber + Send + Sync>, TelemetryError>
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    let filter = EnvFilter::try_new(settings.filter)
        .map_err(|error| TelemetryError::Filter(error.to_string()))?;
    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(false)
        .with_writer(writer)
        .with_ansi(ansi)
        .with_timer(fmt::time::UtcTime::rfc_3339());

    if settings.format.is_structured() {
        // Only the innermost span: request fields, not the whole stack.
        Ok(Box::new(
            builder
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .with_span_list(false)
                .finish(),
        ))
    } else {
        Ok(Box::new(builder.compact().finish()))
    }
}

/// Opens the span for one top-level request.
pub(crate) fn request_span(sequence: u64, style: MutationStyle) -> Span {
    info_span!(
        target: REQUEST_TARGET,
        "request",
        sequence,
        style = ?style,
        command = field::Empty,
        guid = field::Empty,
    )
}

/// Records the parsed command word on a request span.
pub(crate) fn record_command(span: &Span, command: &str) {
    span.record("command", command);
}

/// Records the GUID of the session a request resolved to.
pub(crate) fn record_session(span: &Span, guid: &str) {
    span.record("guid", guid);
}
