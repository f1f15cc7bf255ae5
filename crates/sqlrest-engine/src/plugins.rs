//! Collaborators the engine calls but does not implement.
//!
//! SQL placeholder extraction, rewriting and validation, OAuth secret
//! exchange and status reporting are supplied by the embedding server. The
//! pass-through implementations here are used when nothing else is
//! configured.

use std::sync::Arc;

use thiserror::Error;

use crate::binding::BindValues;
use crate::session::{SessionFactory, Statement};
use crate::source::{OsFileSystem, SqlFileSystem};
use crate::value::Value;

/// Rejection raised by a statement plugin.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct PluginError {
    message: String,
}

impl PluginError {
    /// Creates a plugin error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Extracts bind placeholders from SQL text.
pub trait StatementParser: Send + Sync {
    /// Produces driver-ready SQL with its binds in placeholder order.
    /// `call` is set for stored-procedure invocations.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] when a placeholder has no bind value.
    fn parse(&self, sql: &str, binds: &BindValues, call: bool) -> Result<Statement, PluginError>;
}

/// Rewrites statements before execution.
pub trait SqlRewriter: Send + Sync {
    /// Returns the statement to execute.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] when the statement cannot be rewritten.
    fn rewrite(&self, statement: Statement) -> Result<Statement, PluginError>;
}

/// Vetoes statements before execution.
pub trait SqlValidator: Send + Sync {
    /// Accepts or rejects a statement.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError`] when the statement is not allowed.
    fn validate(&self, statement: &Statement) -> Result<(), PluginError>;
}

/// Exchanges an OAuth secret for a user name.
pub trait OAuthProvider: Send + Sync {
    /// Returns the authenticated user, or `None` when the secret is refused.
    fn username(&self, secret: Option<&str>) -> Option<String>;
}

/// Engine counters handed to a [`StatusProvider`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStats {
    /// Connected sessions.
    pub sessions: usize,
    /// Top-level requests served, including the current one.
    pub requests: u64,
}

/// Supplies the name/value pairs of a `status` response.
pub trait StatusProvider: Send + Sync {
    /// Returns the statistics to report.
    fn report(&self, stats: EngineStats) -> Vec<(String, Value)>;
}

/// Rewriter that leaves statements unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityRewriter;

impl SqlRewriter for IdentityRewriter {
    fn rewrite(&self, statement: Statement) -> Result<Statement, PluginError> {
        Ok(statement)
    }
}

/// Validator that accepts every statement.
#[derive(Debug, Default, Clone, Copy)]
pub struct PermissiveValidator;

impl SqlValidator for PermissiveValidator {
    fn validate(&self, _statement: &Statement) -> Result<(), PluginError> {
        Ok(())
    }
}

/// OAuth provider used until one is configured; refuses every secret.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredOAuth;

impl OAuthProvider for UnconfiguredOAuth {
    fn username(&self, _secret: Option<&str>) -> Option<String> {
        None
    }
}

/// Reports the engine's own counters.
#[derive(Debug, Default, Clone, Copy)]
pub struct EngineStatus;

impl StatusProvider for EngineStatus {
    fn report(&self, stats: EngineStats) -> Vec<(String, Value)> {
        vec![
            ("sessions".to_owned(), Value::from(stats.sessions)),
            ("requests".to_owned(), Value::from(stats.requests)),
        ]
    }
}

/// External collaborators handed to the engine at construction.
///
/// Only the session factory and statement parser are mandatory; everything
/// else starts as the pass-through implementation from this module and the
/// real filesystem.
#[derive(Clone)]
pub struct Collaborators {
    /// Opens sessions on `connect`.
    pub sessions: Arc<dyn SessionFactory>,
    /// Extracts bind placeholders.
    pub parser: Arc<dyn StatementParser>,
    /// Rewrites statements before execution.
    pub rewriter: Arc<dyn SqlRewriter>,
    /// Vetoes statements before execution.
    pub validator: Arc<dyn SqlValidator>,
    /// Exchanges OAuth secrets.
    pub oauth: Arc<dyn OAuthProvider>,
    /// Supplies `status` statistics.
    pub status: Arc<dyn StatusProvider>,
    /// Reads file-backed SQL.
    pub files: Arc<dyn SqlFileSystem>,
}

impl Collaborators {
    /// Creates the collaborator set with default plugins.
    pub fn new(sessions: Arc<dyn SessionFactory>, parser: Arc<dyn StatementParser>) -> Self {
        Self {
            sessions,
            parser,
            rewriter: Arc::new(IdentityRewriter),
            validator: Arc::new(PermissiveValidator),
            oauth: Arc::new(UnconfiguredOAuth),
            status: Arc::new(EngineStatus),
            files: Arc::new(OsFileSystem),
        }
    }

    /// Replaces the rewriter.
    #[must_use]
    pub fn with_rewriter(mut self, rewriter: Arc<dyn SqlRewriter>) -> Self {
        self.rewriter = rewriter;
        self
    }

    /// Replaces the validator.
    #[must_use]
    pub fn with_validator(mut self, validator: Arc<dyn SqlValidator>) -> Self {
        self.validator = validator;
        self
    }

    /// Replaces the OAuth provider.
    #[must_use]
    pub fn with_oauth(mut self, oauth: Arc<dyn OAuthProvider>) -> Self {
        self.oauth = oauth;
        self
    }

    /// Replaces the status provider.
    #[must_use]
    pub fn with_status(mut self, status: Arc<dyn StatusProvider>) -> Self {
        self.status = status;
        self
    }

    /// Replaces the SQL filesystem.
    #[must_use]
    pub fn with_files(mut self, files: Arc<dyn SqlFileSystem>) -> Self {
        self.files = files;
        self
    }
}
