//! Session lifecycle handlers: `ping`, `status`, `connect`, `disconnect`,
//! `commit` and `rollback`.

use std::sync::Arc;

use serde_json::Value as Json;
use sqlrest_config::PoolRole;
use tracing::info;

use super::arguments::{ConnectArgs, flag};
use super::errors::EngineError;
use super::router::DISPATCH_TARGET;
use super::{Engine, Exchange};
use crate::formatter::JsonFormatter;
use crate::plugins::EngineStats;
use crate::session::{AuthMethod, ConnectRequest, Session, SessionError, SessionState};
use crate::token;

fn succeeded() -> JsonFormatter {
    let mut json = JsonFormatter::new();
    json.success(true);
    json
}

pub(super) fn ping(
    exchange: &mut Exchange,
    payload: Option<&Json>,
) -> Result<JsonFormatter, EngineError> {
    if flag(payload, "keepalive")?.unwrap_or(false) {
        let session = exchange.state.session().map_err(|_| {
            EngineError::validation("keepalive cannot be used without a valid session")
        })?;
        session.touch();
    }
    Ok(succeeded())
}

pub(super) fn status(engine: &Engine) -> Result<JsonFormatter, EngineError> {
    let stats = EngineStats {
        sessions: engine.registry.len(),
        requests: engine.requests(),
    };
    let mut json = succeeded();
    for (name, value) in engine.collaborators.status.report(stats) {
        json.add(&name, value);
    }
    Ok(json)
}

/// Opens a session and issues its token.
///
/// Without an authentication method the request re-issues a token for the
/// session already named by the path. OAuth secrets are exchanged for a
/// user name first; OAuth and pool-token sessions then draw from the proxy
/// pool when a user is known and from the anonymous pool otherwise.
pub(super) fn connect(
    engine: &Engine,
    exchange: &mut Exchange,
    payload: Option<&Json>,
) -> Result<JsonFormatter, EngineError> {
    let args = ConnectArgs::parse(payload)?;

    let Some(word) = args.method else {
        let session = exchange
            .state
            .session()
            .map_err(|_| EngineError::missing("auth.method"))?;
        return Ok(issued(engine, args.private, session.as_ref()));
    };

    let method = AuthMethod::parse(&word).ok_or_else(|| {
        EngineError::authentication(format!("Unknown authentication method {word}"))
    })?;

    let username = match method {
        AuthMethod::OAuth => Some(
            engine
                .collaborators
                .oauth
                .username(args.secret.as_deref())
                .ok_or_else(|| EngineError::authentication("OAuth authentication failed"))?,
        ),
        AuthMethod::Database | AuthMethod::PoolToken => args.username,
    };

    let pool = match method {
        AuthMethod::OAuth | AuthMethod::PoolToken => {
            let role = if username.is_some() {
                PoolRole::Proxy
            } else {
                PoolRole::Anonymous
            };
            Some(
                engine
                    .config
                    .pool(role)
                    .cloned()
                    .ok_or(EngineError::PoolNotConfigured)?,
            )
        }
        AuthMethod::Database => None,
    };

    if exchange.state.holds_exclusive() {
        return Err(EngineError::validation(
            "cannot connect inside a savepoint scope of another session",
        ));
    }

    let request = ConnectRequest {
        method,
        pool,
        scope: args.scope,
        username,
        secret: args.secret,
    };
    let session = engine.collaborators.sessions.open(&request)?;
    session.connect(exchange.state.is_nested())?;

    engine.registry.register(Arc::clone(&session));
    exchange.state.bind(Some(Arc::clone(&session)));
    info!(
        target: DISPATCH_TARGET,
        guid = session.guid(),
        method = method.as_str(),
        dedicated = session.dedicated(),
        "session connected"
    );

    Ok(issued(engine, args.private, session.as_ref()))
}

fn issued(engine: &Engine, private: bool, session: &dyn Session) -> JsonFormatter {
    let mut json = succeeded();
    json.add(
        "session",
        token::encode(private, session.guid(), engine.config.host()),
    );
    json
}

/// Closes the session. A failed close loses the session, so the error is
/// always fatal.
pub(super) fn disconnect(
    engine: &Engine,
    exchange: &mut Exchange,
) -> Result<JsonFormatter, EngineError> {
    let session = exchange.state.session()?;
    session.disconnect().map_err(EngineError::fatal)?;

    exchange.state.detach();
    engine.registry.remove(session.guid());
    info!(target: DISPATCH_TARGET, guid = session.guid(), "session disconnected");

    let mut json = succeeded();
    json.add("disconnected", true);
    Ok(json)
}

pub(super) fn commit(exchange: &mut Exchange) -> Result<JsonFormatter, EngineError> {
    transaction(&mut exchange.state, |session| session.commit())
}

pub(super) fn rollback(exchange: &mut Exchange) -> Result<JsonFormatter, EngineError> {
    transaction(&mut exchange.state, |session| session.rollback())
}

fn transaction(
    state: &mut SessionState,
    operation: impl FnOnce(&dyn Session) -> Result<(), SessionError>,
) -> Result<JsonFormatter, EngineError> {
    let session = state.session()?;
    let outcome = state
        .lock()
        .and_then(|()| operation(session.as_ref()).map_err(EngineError::from))
        .and_then(|()| state.unlock());
    match outcome {
        Ok(()) => Ok(succeeded()),
        Err(error) => Err(state.fail(error)),
    }
}
