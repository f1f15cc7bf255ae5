//! Error types for command dispatch.
//!
//! Every handler returns `Result<JsonFormatter, EngineError>`; the command
//! boundary turns an error into the `success:false` envelope. The variants
//! fall into four groups:
//!
//! - soft errors (validation, missing session, unknown verbs) that leave the
//!   session untouched;
//! - statement errors raised by the session, which roll back the open scope
//!   and may disconnect the client when the session reports them fatal;
//! - hard errors (repository escapes, internal inconsistencies) that abort an
//!   enclosing batch or script outright;
//! - composition errors from bind-value mapping, which fail the batch.

use thiserror::Error;

use crate::binding::BindingError;
use crate::session::{LockError, SessionError};
use crate::source::SourceError;

/// Errors surfaced while executing a request.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The request is malformed.
    #[error("{message}")]
    Validation {
        /// Human-readable reason.
        message: String,
    },

    /// The command needs a session and none is connected.
    #[error("not connected")]
    NotConnected,

    /// The command word is not recognised.
    #[error("unknown command '{command}'")]
    UnknownCommand {
        /// Offending word.
        command: String,
    },

    /// The `exec` function word is not recognised.
    #[error("unknown function '{function}' for command 'exec'")]
    UnknownFunction {
        /// Offending word.
        function: String,
    },

    /// A required payload attribute is absent.
    #[error("attribute \"{name}\" is missing")]
    MissingAttribute {
        /// Attribute name.
        name: String,
    },

    /// A payload attribute has an unusable value.
    #[error("attribute \"{name}\" is invalid: {reason}")]
    InvalidAttribute {
        /// Attribute name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// `fetch` named a cursor the session does not know.
    #[error("cursor '{name}' does not exist")]
    UnknownCursor {
        /// Cursor name.
        name: String,
    },

    /// `connect` needs a pool that is not configured.
    #[error("connection pool not configured")]
    PoolNotConfigured,

    /// Authentication was refused.
    #[error("{message}")]
    Authentication {
        /// Human-readable reason.
        message: String,
    },

    /// The session failed a statement or transaction operation.
    #[error("{source}")]
    Statement {
        /// Adapter error.
        #[source]
        source: SessionError,
        /// Whether the session was lost as a result.
        fatal: bool,
    },

    /// A SQL file reference escapes the repository.
    #[error("illegal path '{path}', file must be located in repository")]
    Security {
        /// Offending path.
        path: String,
    },

    /// A `map` sub-request could not resolve its pointers.
    #[error("cannot map bind values: {source}")]
    Composition {
        /// Resolution failure.
        #[source]
        source: BindingError,
    },

    /// The engine's own bookkeeping was violated.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the violation.
        message: String,
    },
}

impl EngineError {
    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates an unknown command error.
    pub fn unknown_command(command: impl Into<String>) -> Self {
        Self::UnknownCommand {
            command: command.into(),
        }
    }

    /// Creates an unknown function error.
    pub fn unknown_function(function: impl Into<String>) -> Self {
        Self::UnknownFunction {
            function: function.into(),
        }
    }

    /// Creates a missing attribute error.
    pub fn missing(name: impl Into<String>) -> Self {
        Self::MissingAttribute { name: name.into() }
    }

    /// Creates an invalid attribute error.
    pub fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAttribute {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates an unknown cursor error.
    pub fn unknown_cursor(name: impl Into<String>) -> Self {
        Self::UnknownCursor { name: name.into() }
    }

    /// Creates an authentication error.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Wraps a session error the session has judged fatal.
    #[must_use]
    pub const fn fatal(source: SessionError) -> Self {
        Self::Statement {
            source,
            fatal: true,
        }
    }

    /// Whether the client must reconnect.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Statement { fatal: true, .. })
    }

    /// Whether the error aborts an enclosing batch or script as a whole.
    #[must_use]
    pub const fn is_hard(&self) -> bool {
        matches!(self, Self::Security { .. } | Self::Internal { .. })
    }

    /// Records the session's fatality verdict on a statement error.
    #[must_use]
    pub fn with_fatal(self, verdict: bool) -> Self {
        match self {
            Self::Statement { source, fatal } => Self::Statement {
                source,
                fatal: fatal || verdict,
            },
            other => other,
        }
    }
}

impl From<SessionError> for EngineError {
    fn from(source: SessionError) -> Self {
        Self::Statement {
            source,
            fatal: false,
        }
    }
}

impl From<LockError> for EngineError {
    fn from(error: LockError) -> Self {
        Self::internal(error.to_string())
    }
}

impl From<BindingError> for EngineError {
    fn from(source: BindingError) -> Self {
        Self::Composition { source }
    }
}

impl From<SourceError> for EngineError {
    fn from(error: SourceError) -> Self {
        match error {
            SourceError::OutsideRepository { path } => Self::Security { path },
            other => Self::invalid("sql", other.to_string()),
        }
    }
}
