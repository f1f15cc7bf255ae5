//! Request model for the REST path and JSON payload.
//!
//! A path has the shape `[token/]command[/function]`. Everything before the
//! first command word is the session token; standard base64 tokens may
//! themselves contain `/`. Without any command word the first segment is the
//! token and the second the (unknown) command. `batch`,
//! `script` and `map` may also appear in the function position, in which
//! case they become the command. Parsing never fails: unknown words become
//! the `Unrecognized` variants and are rejected by the router.

use std::fmt;

use serde_json::Value as Json;

use super::errors::EngineError;

/// Top-level command word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Liveness check, optionally touching the session.
    Ping,
    /// Engine statistics.
    Status,
    /// Opens a session.
    Connect,
    /// Closes the current session.
    Disconnect,
    /// Commits the current transaction.
    Commit,
    /// Rolls back the current transaction.
    Rollback,
    /// Runs one statement; see [`Function`].
    Exec,
    /// Ordered sub-requests returning every result.
    Batch,
    /// Ordered sub-requests returning the last result.
    Script,
    /// Bind-value indirection inside a batch or script.
    Map,
    /// Anything else.
    Unrecognized(String),
}

impl Command {
    /// Parses a command word (case-insensitive).
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "ping" => Self::Ping,
            "status" => Self::Status,
            "connect" => Self::Connect,
            "disconnect" => Self::Disconnect,
            "commit" => Self::Commit,
            "rollback" => Self::Rollback,
            "exec" => Self::Exec,
            "batch" => Self::Batch,
            "script" => Self::Script,
            "map" => Self::Map,
            _ => Self::Unrecognized(value.to_owned()),
        }
    }

    /// Returns the canonical word.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Ping => "ping",
            Self::Status => "status",
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::Commit => "commit",
            Self::Rollback => "rollback",
            Self::Exec => "exec",
            Self::Batch => "batch",
            Self::Script => "script",
            Self::Map => "map",
            Self::Unrecognized(word) => word,
        }
    }

    const fn is_known(&self) -> bool {
        !matches!(self, Self::Unrecognized(_))
    }

    /// Whether the word may stand in the function position.
    const fn is_composite(&self) -> bool {
        matches!(self, Self::Batch | Self::Script | Self::Map)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Statement kind for [`Command::Exec`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Function {
    /// DDL with no result rows.
    Ddl,
    /// Query opening a cursor.
    Select,
    /// DML returning an affected-row count.
    Update,
    /// Same as [`Function::Update`].
    Insert,
    /// Same as [`Function::Update`].
    Merge,
    /// Next page of a named cursor.
    Fetch,
    /// Stored procedure call.
    Call,
    /// No function word.
    None,
    /// Anything else.
    Unrecognized(String),
}

impl Function {
    /// Parses a function word (case-insensitive); the empty word is
    /// [`Function::None`].
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "" => Self::None,
            "ddl" => Self::Ddl,
            "select" => Self::Select,
            "update" => Self::Update,
            "insert" => Self::Insert,
            "merge" => Self::Merge,
            "fetch" => Self::Fetch,
            "call" => Self::Call,
            _ => Self::Unrecognized(value.to_owned()),
        }
    }

    /// Returns the canonical word, `""` for [`Function::None`].
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Ddl => "ddl",
            Self::Select => "select",
            Self::Update => "update",
            Self::Insert => "insert",
            Self::Merge => "merge",
            Self::Fetch => "fetch",
            Self::Call => "call",
            Self::None => "",
            Self::Unrecognized(word) => word,
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One parsed request or sub-request.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    path: String,
    session: Option<String>,
    command: Command,
    function: Function,
    payload: Option<Json>,
}

impl Request {
    /// Splits `path` and attaches `payload`.
    #[must_use]
    pub fn parse(path: &str, payload: Option<Json>) -> Self {
        let segments: Vec<&str> = path.trim().trim_start_matches('/').split('/').collect();
        let start = segments
            .iter()
            .position(|segment| Command::parse(segment.trim()).is_known())
            .unwrap_or(usize::from(segments.len() > 1));

        let (head, tail) = segments.split_at(start);
        let session = (!head.is_empty()).then(|| head.join("/"));
        let mut segments = tail.iter().map(|segment| segment.trim()).filter(|s| !s.is_empty());
        let mut command = Command::parse(segments.next().unwrap_or_default());
        let word = segments.next().unwrap_or_default();

        let function = match Command::parse(word) {
            composite if composite.is_composite() => {
                command = composite;
                Function::None
            }
            _ => Function::parse(word),
        };

        Self {
            path: path.to_owned(),
            session,
            command,
            function,
            payload,
        }
    }

    /// Parses a payload body; blank text means no payload.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] when the text is not JSON.
    pub fn payload_from_str(body: &str) -> Result<Option<Json>, EngineError> {
        if body.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(body)
            .map(Some)
            .map_err(|error| EngineError::validation(format!("malformed payload: {error}")))
    }

    /// Path as received.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Session token segment, if present.
    #[must_use]
    pub fn session(&self) -> Option<&str> {
        self.session.as_deref()
    }

    /// Command word.
    #[must_use]
    pub const fn command(&self) -> &Command {
        &self.command
    }

    /// Function word.
    #[must_use]
    pub const fn function(&self) -> &Function {
        &self.function
    }

    /// Payload, if any.
    #[must_use]
    pub const fn payload(&self) -> Option<&Json> {
        self.payload.as_ref()
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.function {
            Function::None => write!(f, "{}", self.command),
            _ => write!(f, "{}/{}", self.command, self.function),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[rstest]
    #[case("exec/select", None, Command::Exec, Function::Select)]
    #[case("/tok123/exec/update", Some("tok123"), Command::Exec, Function::Update)]
    #[case("ping", None, Command::Ping, Function::None)]
    #[case("tok/batch", Some("tok"), Command::Batch, Function::None)]
    #[case("tok/exec/script", Some("tok"), Command::Script, Function::None)]
    #[case("exec/map", None, Command::Map, Function::None)]
    #[case("EXEC/Select", None, Command::Exec, Function::Select)]
    fn splits_paths(
        #[case] path: &str,
        #[case] session: Option<&str>,
        #[case] command: Command,
        #[case] function: Function,
    ) {
        let request = Request::parse(path, None);
        assert_eq!(request.session(), session);
        assert_eq!(request.command(), &command);
        assert_eq!(request.function(), &function);
    }

    #[test]
    fn unknown_words_are_preserved() {
        let request = Request::parse("tok/frobnicate/now", None);
        assert_eq!(request.session(), Some("tok"));
        assert_eq!(
            request.command(),
            &Command::Unrecognized("frobnicate".to_owned())
        );
        assert_eq!(request.function(), &Function::Unrecognized("now".to_owned()));

        let request = Request::parse("exec/explode", None);
        assert_eq!(
            request.function(),
            &Function::Unrecognized("explode".to_owned())
        );
    }

    #[test]
    fn tokens_may_contain_slashes() {
        let request = Request::parse("aB/c//d+e/exec/select", None);
        assert_eq!(request.session(), Some("aB/c//d+e"));
        assert_eq!(request.command(), &Command::Exec);
        assert_eq!(request.function(), &Function::Select);
    }

    #[test]
    fn empty_path_has_no_command() {
        let request = Request::parse("", None);
        assert_eq!(request.command(), &Command::Unrecognized(String::new()));
        assert_eq!(request.function().as_str(), "");
    }

    #[test]
    fn payload_text_is_optional() {
        assert_eq!(Request::payload_from_str("  ").expect("blank"), None);
        assert_eq!(
            Request::payload_from_str(r#"{"sql":"select 1"}"#).expect("json"),
            Some(json!({"sql": "select 1"}))
        );
        assert!(matches!(
            Request::payload_from_str("{nope"),
            Err(EngineError::Validation { .. })
        ));
    }

    #[test]
    fn displays_command_and_function() {
        assert_eq!(Request::parse("t/exec/fetch", None).to_string(), "exec/fetch");
        assert_eq!(Request::parse("commit", None).to_string(), "commit");
    }
}
