//! Command execution for REST requests.
//!
//! [`Engine::execute`] takes a request path and JSON payload, resolves the
//! session named by the path's token, routes the command to its handler and
//! renders the handler's result tree. Handler errors are turned into the
//! `success:false` envelope once, at this boundary; nothing escapes as a
//! panic or an `Err`.
//!
//! ## Paths
//!
//! ```text
//! [token/]command[/function]
//! ```
//!
//! `command` is one of `ping`, `status`, `connect`, `disconnect`, `commit`,
//! `rollback`, `exec`, `batch` or `script`; `exec` takes a `ddl`, `select`,
//! `insert`, `update`, `merge`, `fetch` or `call` function.
//!
//! ## Nesting
//!
//! `batch` and `script` re-enter the router once per sub-request with the
//! same [`Exchange`], so every statement in them shares one savepoint scope.

mod arguments;
mod compose;
mod connection;
pub mod errors;
mod exec;
pub mod request;
mod router;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value as Json;
use sqlrest_config::Config;
use tracing::{debug, warn};

use crate::binding::BindValues;
use crate::formatter::JsonFormatter;
use crate::plugins::Collaborators;
use crate::session::{Session, SessionRegistry, SessionState};
use crate::source::{SqlCache, SqlSource};
use crate::{telemetry, token};

pub use self::arguments::{ConnectArgs, FetchArgs, SelectArgs};
pub use self::errors::EngineError;
pub use self::request::{Command, Function, Request};
use self::router::DISPATCH_TARGET;

/// Savepoint default applied to a request.
///
/// Servers expose the engine twice, once per HTTP method; each style has its
/// own configured default for opening a savepoint around mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationStyle {
    /// Requests arriving as `POST`.
    Post,
    /// Requests arriving as `PATCH`.
    Patch,
}

/// Per-request state threaded through nested batch and script calls.
pub(crate) struct Exchange {
    pub(crate) state: SessionState,
    pub(crate) binds: BindValues,
    pub(crate) last: Option<Json>,
    pub(crate) savepoint_default: bool,
}

impl Exchange {
    fn new(session: Option<Arc<dyn Session>>, savepoint_default: bool) -> Self {
        Self {
            state: SessionState::new(session),
            binds: BindValues::new(),
            last: None,
            savepoint_default,
        }
    }
}

/// REST-to-SQL command engine.
///
/// The engine is `Send + Sync`; servers share one instance between worker
/// threads and call [`Engine::execute`] from any of them.
pub struct Engine {
    config: Config,
    registry: SessionRegistry,
    source: SqlSource,
    collaborators: Collaborators,
    requests: AtomicU64,
}

impl Engine {
    /// Creates an engine with an empty SQL cache.
    #[must_use]
    pub fn new(config: Config, collaborators: Collaborators) -> Self {
        Self::with_cache(config, collaborators, SqlCache::new())
    }

    /// Creates an engine sharing an existing SQL cache.
    #[must_use]
    pub fn with_cache(config: Config, collaborators: Collaborators, cache: SqlCache) -> Self {
        let source = SqlSource::new(
            config.repository.clone(),
            Arc::clone(&collaborators.files),
            cache,
        );
        Self {
            config,
            registry: SessionRegistry::new(),
            source,
            collaborators,
            requests: AtomicU64::new(0),
        }
    }

    /// Configuration the engine was built with.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Connected sessions.
    #[must_use]
    pub const fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// SQL file cache.
    #[must_use]
    pub const fn cache(&self) -> &SqlCache {
        self.source.cache()
    }

    /// Top-level requests served so far.
    #[must_use]
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Executes a `POST` request.
    #[must_use]
    pub fn post(&self, path: &str, payload: &str) -> String {
        self.execute(MutationStyle::Post, path, payload)
    }

    /// Executes a `PATCH` request.
    #[must_use]
    pub fn patch(&self, path: &str, payload: &str) -> String {
        self.execute(MutationStyle::Patch, path, payload)
    }

    /// Executes one request and renders the response.
    #[must_use]
    pub fn execute(&self, style: MutationStyle, path: &str, payload: &str) -> String {
        self.respond(style, path, payload).render()
    }

    /// Executes one request and returns the response tree.
    pub fn respond(&self, style: MutationStyle, path: &str, payload: &str) -> JsonFormatter {
        let sequence = self.requests.fetch_add(1, Ordering::Relaxed).saturating_add(1);
        let span = telemetry::request_span(sequence, style);
        let _entered = span.enter();
        let savepoint_default = self.config.savepoint_default(style == MutationStyle::Patch);

        let payload = match Request::payload_from_str(payload) {
            Ok(payload) => payload,
            Err(error) => {
                let mut exchange = Exchange::new(None, savepoint_default);
                return self.envelope(&mut exchange, error);
            }
        };
        let request = Request::parse(path, payload);
        telemetry::record_command(&span, request.command().as_str());
        let session = match self.lookup(request.session()) {
            Ok(session) => session,
            Err(error) => {
                let mut exchange = Exchange::new(None, savepoint_default);
                return self.envelope(&mut exchange, error);
            }
        };

        if let Some(session) = &session {
            telemetry::record_session(&span, session.guid());
        }

        debug!(
            target: DISPATCH_TARGET,
            request = %request,
            style = ?style,
            connected = session.is_some(),
            "dispatching request"
        );

        let mut exchange = Exchange::new(session, savepoint_default);
        self.dispatch(&mut exchange, &request)
    }

    /// Routes one request or sub-request and converts a failure into the
    /// error envelope.
    pub(crate) fn dispatch(&self, exchange: &mut Exchange, request: &Request) -> JsonFormatter {
        match self.route(exchange, request) {
            Ok(json) => json,
            Err(error) => self.envelope(exchange, error),
        }
    }

    fn lookup(&self, token: Option<&str>) -> Result<Option<Arc<dyn Session>>, EngineError> {
        let Some(token) = token else {
            return Ok(None);
        };
        let decoded = token::decode(token, self.config.host())
            .map_err(|error| EngineError::validation(format!("invalid session token: {error}")))?;
        let session = self.registry.get(&decoded.guid);
        if session.is_none() {
            debug!(target: DISPATCH_TARGET, guid = %decoded.guid, "unknown session");
        }
        Ok(session)
    }

    /// Renders `error`; a fatal error also forgets the session.
    fn envelope(&self, exchange: &mut Exchange, error: EngineError) -> JsonFormatter {
        let fatal = error.is_fatal();
        if fatal && let Some(session) = exchange.state.detach() {
            self.registry.remove(session.guid());
        }
        warn!(target: DISPATCH_TARGET, %error, fatal, "request failed");
        JsonFormatter::failure(error.to_string(), fatal)
    }
}
