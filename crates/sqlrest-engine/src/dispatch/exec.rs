//! Statement handlers for `exec/*`.
//!
//! Each handler validates its payload and prepares its statement before
//! touching the session, so soft errors leave the session as it was. The
//! statement itself runs inside one [`within_scope`] bracket, with every
//! session call under a shared lock taken by [`locked`].

use std::sync::Arc;

use serde_json::Value as Json;

use super::arguments::{FetchArgs, SelectArgs, text};
use super::errors::EngineError;
use super::{Engine, Exchange};
use crate::formatter::{JsonFormatter, Shape};
use crate::session::{CursorOptions, Session, SessionError, SessionState, Statement};
use crate::value::Value;

/// Runs `work` inside a prepare/release bracket.
///
/// Failures to bind a connection or open the bracket are cleaned up without
/// changing the depth; failures inside `work` close the bracket through
/// [`SessionState::release_on_error`].
fn within_scope<T>(
    exchange: &mut Exchange,
    payload: Option<&Json>,
    work: impl FnOnce(&mut SessionState, &dyn Session) -> Result<T, EngineError>,
) -> Result<T, EngineError> {
    let state = &mut exchange.state;
    let session = state.session()?;
    if let Err(error) = state.ensure() {
        return Err(state.fail(error));
    }
    if let Err(error) = state.prepare(payload, exchange.savepoint_default) {
        return Err(state.fail(error));
    }
    match work(state, session.as_ref()) {
        Ok(value) => {
            state.release()?;
            Ok(value)
        }
        Err(error) => Err(state.release_on_error(error)),
    }
}

/// Runs one session call under a shared lock. On failure the lock stays
/// counted so the error path releases it.
fn locked<T>(
    state: &mut SessionState,
    call: impl FnOnce() -> Result<T, SessionError>,
) -> Result<T, EngineError> {
    state.lock()?;
    let value = call()?;
    state.unlock()?;
    Ok(value)
}

/// Reads the payload's `sql` attribute, following file references.
fn sql_text(engine: &Engine, payload: Option<&Json>) -> Result<Arc<str>, EngineError> {
    match payload.and_then(|payload| payload.get("sql")) {
        None | Some(Json::Null) => Err(EngineError::missing("sql")),
        Some(Json::String(_)) => engine
            .source
            .statement(payload)?
            .ok_or_else(|| EngineError::missing("sql")),
        Some(_) => Err(EngineError::invalid("sql", "expected a string")),
    }
}

/// Loads `bindvalues`, reads the SQL and passes it through the parser,
/// rewriter and validator.
fn statement(
    engine: &Engine,
    exchange: &mut Exchange,
    payload: Option<&Json>,
    call: bool,
) -> Result<Statement, EngineError> {
    if let Some(bindvalues) = payload.and_then(|payload| payload.get("bindvalues")) {
        exchange
            .binds
            .load(bindvalues)
            .map_err(|error| EngineError::invalid("bindvalues", error.to_string()))?;
    }
    let sql = sql_text(engine, payload)?;

    let plugins = &engine.collaborators;
    let parsed = plugins
        .parser
        .parse(&sql, &exchange.binds, call)
        .map_err(|error| EngineError::invalid("sql", error.to_string()))?;
    let statement = plugins
        .rewriter
        .rewrite(parsed)
        .map_err(|error| EngineError::validation(error.to_string()))?;
    plugins
        .validator
        .validate(&statement)
        .map_err(|error| EngineError::validation(error.to_string()))?;
    Ok(statement)
}

pub(super) fn ddl(
    engine: &Engine,
    exchange: &mut Exchange,
    payload: Option<&Json>,
) -> Result<JsonFormatter, EngineError> {
    exchange.state.session()?;
    let sql = sql_text(engine, payload)?;

    let result = within_scope(exchange, payload, |state, session| {
        locked(state, || session.execute(&sql))
    })?;

    let mut json = JsonFormatter::new();
    json.success(true);
    json.add("result", result);
    Ok(json)
}

pub(super) fn update(
    engine: &Engine,
    exchange: &mut Exchange,
    payload: Option<&Json>,
) -> Result<JsonFormatter, EngineError> {
    exchange.state.session()?;
    let statement = statement(engine, exchange, payload, false)?;

    let rows = within_scope(exchange, payload, |state, session| {
        locked(state, || session.execute_update(&statement))
    })?;

    let mut json = JsonFormatter::new();
    json.success(true);
    json.add("rows", rows);
    Ok(json)
}

pub(super) fn call(
    engine: &Engine,
    exchange: &mut Exchange,
    payload: Option<&Json>,
) -> Result<JsonFormatter, EngineError> {
    exchange.state.session()?;
    let conversion = text(payload, "dateconversion")?;
    let statement = statement(engine, exchange, payload, true)?;

    let outputs = within_scope(exchange, payload, |state, session| {
        locked(state, || {
            session.execute_call(&statement, conversion.as_deref())
        })
    })?;

    let mut json = JsonFormatter::new();
    json.success(true);
    for (name, value) in outputs {
        json.add(&name, value);
    }
    Ok(json)
}

/// Opens a cursor and returns its first page.
///
/// Only dedicated sessions keep named cursors; elsewhere the `cursor`
/// attribute is ignored and the cursor is closed after the first page.
pub(super) fn select(
    engine: &Engine,
    exchange: &mut Exchange,
    payload: Option<&Json>,
) -> Result<JsonFormatter, EngineError> {
    let dedicated = exchange.state.session()?.dedicated();
    let args = SelectArgs::parse(
        payload,
        engine.config.compact,
        engine.config.date_format.as_deref(),
    )?;
    let statement = statement(engine, exchange, payload, false)?;

    let options = CursorOptions {
        name: args.cursor.filter(|_| dedicated),
        rows: args.rows,
        compact: args.compact,
        date_format: args.date_format,
    };
    let skip = args.skip;

    let (more, columns, rows) = within_scope(exchange, payload, |state, session| {
        if let Some(name) = options.name.as_deref()
            && let Some(previous) = session.cursor(name)
        {
            locked(state, || session.close_cursor(&previous))?;
        }
        let mut cursor = locked(state, || session.execute_query(&statement, options))?;
        let columns = locked(state, || session.column_names(&cursor))?;
        let rows = locked(state, || session.fetch(&mut cursor, skip))?;
        if cursor.name().is_none() {
            locked(state, || session.close_cursor(&cursor))?;
        }
        Ok((!cursor.closed, columns, rows))
    })?;

    Ok(page(more, args.compact, &columns, rows))
}

/// Continues or closes a named cursor.
pub(super) fn fetch(
    exchange: &mut Exchange,
    payload: Option<&Json>,
) -> Result<JsonFormatter, EngineError> {
    let session = exchange.state.session()?;
    let args = FetchArgs::parse(payload)?;
    let mut cursor = session
        .cursor(&args.cursor)
        .ok_or_else(|| EngineError::unknown_cursor(&args.cursor))?;

    if args.close {
        let state = &mut exchange.state;
        if let Err(error) = locked(state, || session.close_cursor(&cursor)) {
            return Err(state.fail(error));
        }
        let mut json = JsonFormatter::new();
        json.success(true);
        json.add("closed", true);
        return Ok(json);
    }

    let (columns, rows) = within_scope(exchange, payload, |state, session| {
        let columns = locked(state, || session.column_names(&cursor))?;
        let rows = locked(state, || session.fetch(&mut cursor, 0))?;
        Ok((columns, rows))
    })?;

    Ok(page(!cursor.closed, cursor.options.compact, &columns, rows))
}

/// Renders one page of a result set.
///
/// Compact pages carry `columns` as a simple array and `rows` as a matrix;
/// expanded pages carry `rows` as one object per row.
fn page(more: bool, compact: bool, columns: &[String], rows: Vec<Vec<Value>>) -> JsonFormatter {
    let mut json = JsonFormatter::new();
    json.success(true);
    json.add("more", more);
    if compact {
        json.push_shape("columns", Shape::SimpleArray);
        json.add_values(columns.iter().map(|column| Value::from(column.as_str())).collect());
        json.pop();
        json.push_shape("rows", Shape::Matrix);
        json.add_rows(rows);
        json.pop();
    } else {
        json.push_shape("rows", Shape::ObjectArray);
        for row in rows {
            json.add_record(columns, row);
        }
        json.pop();
    }
    json
}
