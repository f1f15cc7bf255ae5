//! Named bind parameters and their resolution.
//!
//! Bind values come from two places: the `bindvalues` array of a request, and
//! `map` sub-requests inside a batch or script that lift values out of the
//! previous sub-request's result. Both feed the same per-request
//! [`BindValues`] table, where a later definition of a name replaces the
//! earlier one.

use std::collections::HashMap;

use serde_json::Value as Json;
use thiserror::Error;

use crate::value::{SqlType, Value};

/// Direction of a bind parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Value supplied by the caller.
    In,
    /// Value produced by the statement, such as a procedure output.
    Out,
}

/// One named bind parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct BindValueDef {
    name: String,
    sql_type: Option<SqlType>,
    direction: Direction,
    value: Value,
}

impl BindValueDef {
    /// Declares a typed parameter. `None` marks it output-only.
    ///
    /// Integer values of date types are read as epoch milliseconds.
    #[must_use]
    pub fn declared(name: impl Into<String>, sql_type: SqlType, value: Option<Value>) -> Self {
        let direction = if value.is_some() {
            Direction::In
        } else {
            Direction::Out
        };
        let value = match value {
            Some(Value::Int(millis)) if sql_type.is_date() => {
                Value::from_epoch_millis(millis).unwrap_or(Value::Int(millis))
            }
            Some(value) => value,
            None => Value::Null,
        };
        Self {
            name: name.into(),
            sql_type: Some(sql_type),
            direction,
            value,
        }
    }

    /// Defines an untyped input value, as produced by bind-value mapping.
    #[must_use]
    pub fn mapped(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            sql_type: None,
            direction: Direction::In,
            value,
        }
    }

    /// Parameter name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared type, if the parameter was declared rather than mapped.
    #[must_use]
    pub const fn sql_type(&self) -> Option<SqlType> {
        self.sql_type
    }

    /// Parameter direction.
    #[must_use]
    pub const fn direction(&self) -> Direction {
        self.direction
    }

    /// Whether the parameter only receives a value.
    #[must_use]
    pub const fn is_out(&self) -> bool {
        matches!(self.direction, Direction::Out)
    }

    /// Whether the declared type is a date type.
    #[must_use]
    pub fn is_date(&self) -> bool {
        self.sql_type.is_some_and(SqlType::is_date)
    }

    /// Bound value; `Null` for output-only parameters.
    #[must_use]
    pub const fn value(&self) -> &Value {
        &self.value
    }
}

/// Failures while reading bind values or resolving map pointers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BindingError {
    /// An entry of `bindvalues` lacks a required key.
    #[error("bind value is missing \"{key}\"")]
    MissingKey {
        /// Missing key.
        key: &'static str,
    },
    /// `bindvalues` or one of its entries has the wrong JSON type.
    #[error("bind values must be an array of objects")]
    Malformed,
    /// A `map` request ran with no earlier result to read from.
    #[error("no previous result to map '{name}' from")]
    NoPreviousResult {
        /// Bind name being mapped.
        name: String,
    },
    /// A map pointer is not a string.
    #[error("pointer for '{name}' must be a string")]
    PointerType {
        /// Bind name being mapped.
        name: String,
    },
    /// A map pointer could not be parsed.
    #[error("invalid pointer '{pointer}'")]
    Pointer {
        /// Offending pointer text.
        pointer: String,
    },
    /// The pointer names a field or column that does not exist.
    #[error("previous result has no value '{pointer}'")]
    UnknownField {
        /// Field or column name.
        pointer: String,
    },
    /// The row index is past the end of the previous result.
    #[error("previous result has no row {row}")]
    RowOutOfRange {
        /// Requested row.
        row: usize,
    },
}

/// Per-request table of bind values keyed by name.
#[derive(Debug, Clone, Default)]
pub struct BindValues {
    values: HashMap<String, BindValueDef>,
}

impl BindValues {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a definition.
    pub fn define(&mut self, def: BindValueDef) {
        self.values.insert(def.name.clone(), def);
    }

    /// Looks up a definition by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&BindValueDef> {
        self.values.get(name)
    }

    /// Number of defined names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no names are defined.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Reads a `bindvalues` array of `{name, type, value?}` objects.
    ///
    /// # Errors
    ///
    /// Returns [`BindingError`] when the array or an entry is malformed.
    pub fn load(&mut self, bindvalues: &Json) -> Result<(), BindingError> {
        let entries = bindvalues.as_array().ok_or(BindingError::Malformed)?;
        for entry in entries {
            let object = entry.as_object().ok_or(BindingError::Malformed)?;
            let name = object
                .get("name")
                .and_then(Json::as_str)
                .ok_or(BindingError::MissingKey { key: "name" })?;
            let sql_type = object
                .get("type")
                .and_then(Json::as_str)
                .ok_or(BindingError::MissingKey { key: "type" })?;
            let value = object.get("value").map(Value::from_json);
            self.define(BindValueDef::declared(name, SqlType::lookup(sql_type), value));
        }
        Ok(())
    }

    /// Applies a `map` payload of `{localName: "pointer"}` against the
    /// previous result.
    ///
    /// A previous result without `rows` is treated as a procedure's named
    /// outputs and each pointer is a field name. Otherwise each pointer is
    /// `column[n]` (or `column`, meaning row 0): the column is looked up in
    /// `columns` when present, else read as a key of the row object.
    ///
    /// # Errors
    ///
    /// Returns [`BindingError`] when a pointer cannot be resolved. Names
    /// resolved before the failing one stay defined.
    pub fn map(&mut self, previous: Option<&Json>, mapping: &Json) -> Result<(), BindingError> {
        let Some(mapping) = mapping.as_object() else {
            return Err(BindingError::Malformed);
        };

        for (name, pointer) in mapping {
            let pointer = pointer
                .as_str()
                .ok_or_else(|| BindingError::PointerType { name: name.clone() })?;
            let last = previous.ok_or_else(|| BindingError::NoPreviousResult { name: name.clone() })?;
            let value = resolve(last, pointer.trim())?;
            self.define(BindValueDef::mapped(name.clone(), Value::from_json(value)));
        }
        Ok(())
    }
}

/// Resolves one trimmed pointer against a previous result.
fn resolve<'a>(last: &'a Json, pointer: &str) -> Result<&'a Json, BindingError> {
    let Some(rows) = last.get("rows") else {
        return last.get(pointer).ok_or_else(|| BindingError::UnknownField {
            pointer: pointer.to_owned(),
        });
    };

    let (field, row) = split_pointer(pointer)?;
    let record = rows
        .as_array()
        .and_then(|rows| rows.get(row))
        .ok_or(BindingError::RowOutOfRange { row })?;

    let unknown = || BindingError::UnknownField {
        pointer: field.to_owned(),
    };
    match last.get("columns").and_then(Json::as_array) {
        Some(columns) => {
            let column = columns
                .iter()
                .position(|column| column.as_str() == Some(field))
                .ok_or_else(unknown)?;
            record.get(column).ok_or_else(unknown)
        }
        None => record.get(field).ok_or_else(unknown),
    }
}

/// Splits `name[n]` into its name and row index; a bare name is row 0.
fn split_pointer(pointer: &str) -> Result<(&str, usize), BindingError> {
    let invalid = || BindingError::Pointer {
        pointer: pointer.to_owned(),
    };
    let Some(body) = pointer.strip_suffix(']') else {
        return Ok((pointer, 0));
    };
    let (field, index) = body.rsplit_once('[').ok_or_else(invalid)?;
    let field = field.trim_end();
    if field.is_empty() {
        return Err(invalid());
    }
    let row = index.trim().parse().map_err(|_| invalid())?;
    Ok((field, row))
}
