//! REST-to-SQL session engine.
//!
//! The engine turns JSON service requests into work on database sessions:
//! it connects and disconnects sessions, runs DDL, DML, queries and
//! procedure calls, pages through cursors, and commits or rolls back. Batches
//! and scripts run several sub-requests inside one savepoint, passing values
//! from one result to the next through bind-value mapping.
//!
//! Drivers, SQL placeholder parsing and the HTTP front end live outside this
//! crate. Adapters implement [`session::Session`] and
//! [`session::SessionFactory`]; plugins implement the traits in [`plugins`].
//! The server builds an [`Engine`] with [`bootstrap_with`] and calls
//! [`Engine::execute`] from its worker threads.
//!
//! ## Locking
//!
//! Every session carries a shared/exclusive [`session::SessionLock`].
//! Statements run under a shared lock; the outermost scope of a request takes
//! the exclusive lock while it holds a savepoint. See [`session::state`] for
//! the bracket protocol.

pub mod binding;
mod bootstrap;
pub mod dispatch;
pub mod formatter;
pub mod plugins;
pub mod pool;
pub mod session;
pub mod source;
mod telemetry;
pub mod token;
pub mod value;

pub use bootstrap::{
    BootstrapError, ConfigLoader, StaticConfigLoader, SystemConfigLoader, bootstrap_with,
};
pub use dispatch::{Engine, EngineError, MutationStyle};
pub use formatter::JsonFormatter;
pub use plugins::Collaborators;
pub use telemetry::{TelemetryError, TelemetryHandle, initialise as initialise_telemetry};

#[cfg(test)]
mod tests;
