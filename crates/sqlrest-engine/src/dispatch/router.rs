//! Command routing.
//!
//! Every `(Command, Function)` pair maps to exactly one handler. The match is
//! exhaustive, so a new command word cannot be added without deciding how it
//! routes. Function words are only meaningful for `exec`; other commands
//! ignore them.

use tracing::debug;

use super::errors::EngineError;
use super::request::{Command, Function, Request};
use super::{Engine, Exchange, compose, connection, exec};
use crate::formatter::JsonFormatter;

/// Tracing target for dispatch operations.
pub(crate) const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");

impl Engine {
    /// Runs the handler for `request`.
    pub(crate) fn route(
        &self,
        exchange: &mut Exchange,
        request: &Request,
    ) -> Result<JsonFormatter, EngineError> {
        debug!(
            target: DISPATCH_TARGET,
            command = request.command().as_str(),
            function = request.function().as_str(),
            depth = exchange.state.depth(),
            "routing request"
        );

        let payload = request.payload();
        match (request.command(), request.function()) {
            (Command::Ping, _) => connection::ping(exchange, payload),
            (Command::Status, _) => connection::status(self),
            (Command::Connect, _) => connection::connect(self, exchange, payload),
            (Command::Disconnect, _) => connection::disconnect(self, exchange),
            (Command::Commit, _) => connection::commit(exchange),
            (Command::Rollback, _) => connection::rollback(exchange),
            (Command::Exec, Function::Ddl) => exec::ddl(self, exchange, payload),
            (Command::Exec, Function::Select) => exec::select(self, exchange, payload),
            (Command::Exec, Function::Update | Function::Insert | Function::Merge) => {
                exec::update(self, exchange, payload)
            }
            (Command::Exec, Function::Fetch) => exec::fetch(exchange, payload),
            (Command::Exec, Function::Call) => exec::call(self, exchange, payload),
            (Command::Exec, function @ (Function::None | Function::Unrecognized(_))) => {
                Err(EngineError::unknown_function(function.as_str()))
            }
            (Command::Batch, _) => compose::batch(self, exchange, payload),
            (Command::Script, _) => compose::script(self, exchange, payload),
            (Command::Map, _) => Err(EngineError::validation(
                "map is only valid inside a batch or script",
            )),
            (Command::Unrecognized(word), _) => Err(EngineError::unknown_command(word.as_str())),
        }
    }
}
