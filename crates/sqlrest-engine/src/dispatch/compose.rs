//! `batch` and `script`: ordered sub-requests in one session scope.
//!
//! Both open one bracket around the whole sequence, so a savepoint opened
//! for the batch covers every statement in it, and both stop at the first
//! failing sub-request. A batch returns every result produced up to and
//! including the failure; a script returns only the last one.
//!
//! `map` entries resolve pointers against the previous result and define
//! bind values for the entries that follow; they produce no output unless
//! they fail.

use serde_json::Value as Json;
use tracing::debug;

use super::arguments::attribute;
use super::errors::EngineError;
use super::request::{Command, Request};
use super::router::DISPATCH_TARGET;
use super::{Engine, Exchange};
use crate::binding::BindingError;
use crate::formatter::{JsonFormatter, Shape};

pub(super) fn batch(
    engine: &Engine,
    exchange: &mut Exchange,
    payload: Option<&Json>,
) -> Result<JsonFormatter, EngineError> {
    let requests = sub_requests(payload, "batch")?;
    let mut results = Vec::with_capacity(requests.len());
    let failed = run(engine, exchange, payload, &requests, |json| results.push(json))?;

    let mut json = JsonFormatter::new();
    json.success(!failed);
    json.push_shape("batch", Shape::ObjectArray);
    for result in &results {
        json.graft(result);
    }
    json.pop();
    Ok(json)
}

pub(super) fn script(
    engine: &Engine,
    exchange: &mut Exchange,
    payload: Option<&Json>,
) -> Result<JsonFormatter, EngineError> {
    let requests = sub_requests(payload, "script")?;
    let mut last = None;
    run(engine, exchange, payload, &requests, |json| last = Some(json))?;

    Ok(last.unwrap_or_else(|| {
        let mut json = JsonFormatter::new();
        json.success(true);
        json
    }))
}

/// Parses every entry up front so a malformed list fails before the
/// session is touched.
fn sub_requests(payload: Option<&Json>, key: &str) -> Result<Vec<Request>, EngineError> {
    let entries = attribute(payload, key)
        .ok_or_else(|| EngineError::missing(key))?
        .as_array()
        .ok_or_else(|| EngineError::invalid(key, "expected an array"))?;

    entries
        .iter()
        .map(|entry| -> Result<Request, EngineError> {
            let path = entry
                .get("path")
                .and_then(Json::as_str)
                .ok_or_else(|| EngineError::invalid(key, "every entry needs a string path"))?;
            Ok(Request::parse(path, entry.get("payload").cloned()))
        })
        .collect()
}

/// Runs `requests` in one bracket, handing each result to `emit`.
///
/// Returns whether a sub-request failed. Hard errors abandon the sequence
/// and are returned instead.
fn run(
    engine: &Engine,
    exchange: &mut Exchange,
    payload: Option<&Json>,
    requests: &[Request],
    mut emit: impl FnMut(JsonFormatter),
) -> Result<bool, EngineError> {
    if let Err(error) = exchange.state.prepare(payload, exchange.savepoint_default) {
        return Err(exchange.state.fail(error));
    }

    let mut failed = false;
    for (position, request) in requests.iter().enumerate() {
        debug!(
            target: DISPATCH_TARGET,
            position,
            request = %request,
            depth = exchange.state.depth(),
            "running sub-request"
        );

        if matches!(request.command(), Command::Map) {
            let mapped = match request.payload() {
                Some(mapping) => exchange.binds.map(exchange.last.as_ref(), mapping),
                None => Err(BindingError::Malformed),
            };
            if let Err(error) = mapped {
                emit(engine.envelope(exchange, EngineError::from(error)));
                failed = true;
                break;
            }
            continue;
        }

        let json = match engine.route(exchange, request) {
            Ok(json) => json,
            Err(error) if error.is_hard() => return Err(exchange.state.release_on_error(error)),
            Err(error) => engine.envelope(exchange, error),
        };
        failed = json.is_success() == Some(false);
        exchange.last = serde_json::from_str(&json.render()).ok();
        emit(json);
        if failed {
            break;
        }
    }

    exchange.state.release()?;
    Ok(failed)
}
