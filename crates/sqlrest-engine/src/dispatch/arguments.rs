//! Typed payload attributes for the command handlers.
//!
//! Payloads are loosely typed JSON objects. Each handler parses the
//! attributes it understands into a struct here; an attribute of the wrong
//! JSON type is rejected instead of being silently ignored. A missing
//! payload reads as an empty object.

use serde_json::Value as Json;

use super::errors::EngineError;

/// Parsed attributes for `connect`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectArgs {
    /// End user named by the client.
    pub username: Option<String>,
    /// Whether the issued token is salted with the host name.
    pub private: bool,
    /// Client-supplied scope.
    pub scope: Option<String>,
    /// Authentication method word.
    pub method: Option<String>,
    /// Password, OAuth secret or pool token.
    pub secret: Option<String>,
}

impl ConnectArgs {
    /// Reads `username`, `private`, `scope` and the `auth.method` /
    /// `auth.secret` pair.
    ///
    /// The authentication attributes are accepted either as literal dotted
    /// keys or nested under an `auth` object; the dotted form wins.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidAttribute`] when an attribute has the
    /// wrong type.
    pub fn parse(payload: Option<&Json>) -> Result<Self, EngineError> {
        Ok(Self {
            username: text(payload, "username")?,
            private: flag(payload, "private")?.unwrap_or(true),
            scope: text(payload, "scope")?,
            method: auth(payload, "method")?,
            secret: auth(payload, "secret")?,
        })
    }
}

/// Parsed attributes for `exec/select`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectArgs {
    /// Rows per page; `0` fetches everything.
    pub rows: usize,
    /// Rows to skip before the first page.
    pub skip: usize,
    /// Date format for the cursor.
    pub date_format: Option<String>,
    /// Column list plus matrix instead of one object per row.
    pub compact: bool,
    /// Requested cursor name.
    pub cursor: Option<String>,
}

impl SelectArgs {
    /// Reads the paging attributes, falling back to the engine defaults.
    ///
    /// An explicit `"dateformat": null` clears the default format.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidAttribute`] when an attribute has the
    /// wrong type.
    pub fn parse(
        payload: Option<&Json>,
        compact: bool,
        date_format: Option<&str>,
    ) -> Result<Self, EngineError> {
        let date_format = match attribute(payload, "dateformat") {
            None => date_format.map(str::to_owned),
            Some(Json::Null) => None,
            Some(Json::String(format)) => Some(format.clone()),
            Some(_) => return Err(EngineError::invalid("dateformat", "expected a string or null")),
        };
        Ok(Self {
            rows: count(payload, "rows")?.unwrap_or(0),
            skip: count(payload, "skip")?.unwrap_or(0),
            date_format,
            compact: flag(payload, "compact")?.unwrap_or(compact),
            cursor: text(payload, "cursor")?,
        })
    }
}

/// Parsed attributes for `exec/fetch`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchArgs {
    /// Cursor to continue.
    pub cursor: String,
    /// Close instead of fetching.
    pub close: bool,
}

impl FetchArgs {
    /// Reads `cursor` and `close`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::MissingAttribute`] without a cursor name, or
    /// [`EngineError::InvalidAttribute`] on a type mismatch.
    pub fn parse(payload: Option<&Json>) -> Result<Self, EngineError> {
        let cursor = text(payload, "cursor")?.ok_or_else(|| EngineError::missing("cursor"))?;
        Ok(Self {
            cursor,
            close: flag(payload, "close")?.unwrap_or(false),
        })
    }
}

/// Returns an attribute of the payload object.
pub(crate) fn attribute<'a>(payload: Option<&'a Json>, name: &str) -> Option<&'a Json> {
    payload.and_then(|payload| payload.get(name))
}

/// Reads an optional boolean attribute.
pub(crate) fn flag(payload: Option<&Json>, name: &str) -> Result<Option<bool>, EngineError> {
    attribute(payload, name)
        .map(|value| {
            value
                .as_bool()
                .ok_or_else(|| EngineError::invalid(name, "expected a boolean"))
        })
        .transpose()
}

/// Reads an optional string attribute.
pub(crate) fn text(payload: Option<&Json>, name: &str) -> Result<Option<String>, EngineError> {
    attribute(payload, name)
        .map(|value| {
            value
                .as_str()
                .map(str::to_owned)
                .ok_or_else(|| EngineError::invalid(name, "expected a string"))
        })
        .transpose()
}

/// Reads an optional non-negative integer attribute.
pub(crate) fn count(payload: Option<&Json>, name: &str) -> Result<Option<usize>, EngineError> {
    attribute(payload, name)
        .map(|value| {
            value
                .as_u64()
                .and_then(|count| usize::try_from(count).ok())
                .ok_or_else(|| EngineError::invalid(name, "expected a non-negative integer"))
        })
        .transpose()
}

fn auth(payload: Option<&Json>, field: &str) -> Result<Option<String>, EngineError> {
    let dotted = format!("auth.{field}");
    if let Some(value) = text(payload, &dotted)? {
        return Ok(Some(value));
    }
    let nested = attribute(payload, "auth");
    text(nested, field).map_err(|_| EngineError::invalid(dotted, "expected a string"))
}
