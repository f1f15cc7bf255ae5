//! Scalar values exchanged with sessions and rendered into responses.
//!
//! [`Value`] is the closed set of scalar kinds the engine understands. Bind
//! values are converted into it from request JSON, session adapters return it
//! from fetches and procedure calls, and the formatter renders it back out.
//! [`SqlType`] is the declared-type table used when a request names the type
//! of a bind parameter.

use std::fmt;

use strum::{Display, EnumString};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::warn;

/// A single scalar cell or bind value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL `NULL`.
    Null,
    /// Boolean literal.
    Bool(bool),
    /// Integral number.
    Int(i64),
    /// Binary floating-point number.
    Float(f64),
    /// Arbitrary-precision number kept in its textual form.
    Decimal(String),
    /// Character data.
    Text(String),
    /// Point in time, rendered as RFC 3339.
    Date(OffsetDateTime),
}

impl Value {
    /// Converts a request JSON value into a scalar.
    ///
    /// Integers outside the `i64` range keep their digits as a decimal.
    /// Arrays and objects are carried as their JSON text.
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(flag) => Self::Bool(*flag),
            serde_json::Value::Number(number) => {
                if let Some(int) = number.as_i64() {
                    Self::Int(int)
                } else if number.is_u64() {
                    Self::Decimal(number.to_string())
                } else {
                    number
                        .as_f64()
                        .map_or_else(|| Self::Decimal(number.to_string()), Self::Float)
                }
            }
            serde_json::Value::String(text) => Self::Text(text.clone()),
            other => Self::Text(other.to_string()),
        }
    }

    /// Returns `true` for [`Value::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Converts epoch milliseconds into a date value.
    ///
    /// Returns `None` when the instant is outside the representable range.
    #[must_use]
    pub fn from_epoch_millis(millis: i64) -> Option<Self> {
        let nanos = i128::from(millis).checked_mul(1_000_000)?;
        OffsetDateTime::from_unix_timestamp_nanos(nanos)
            .ok()
            .map(Self::Date)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(flag) => write!(f, "{flag}"),
            Self::Int(int) => write!(f, "{int}"),
            Self::Float(float) => write!(f, "{float}"),
            Self::Decimal(digits) => f.write_str(digits),
            Self::Text(text) => f.write_str(text),
            Self::Date(date) => match date.format(&Rfc3339) {
                Ok(text) => f.write_str(&text),
                Err(_) => write!(f, "{date}"),
            },
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        i64::try_from(value).map_or_else(|_| Self::Decimal(value.to_string()), Self::Int)
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        i64::try_from(value).map_or_else(|_| Self::Decimal(value.to_string()), Self::Int)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<OffsetDateTime> for Value {
    fn from(value: OffsetDateTime) -> Self {
        Self::Date(value)
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Self>,
{
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Declared SQL type of a bind parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum SqlType {
    /// `INT`.
    Int,
    /// `INTEGER`.
    Integer,
    /// `SMALLINT`.
    Smallint,
    /// `FLOAT`.
    Float,
    /// `DOUBLE`.
    Double,
    /// `NUMBER`.
    Number,
    /// `NUMERIC`.
    Numeric,
    /// `DECIMAL`.
    Decimal,
    /// `DATE`.
    Date,
    /// `DATETIME`.
    Datetime,
    /// `TIMESTAMP`.
    Timestamp,
    /// `STRING`.
    String,
    /// `VARCHAR`.
    Varchar,
    /// `VARCHAR2`.
    Varchar2,
    /// `TEXT`.
    Text,
    /// `BOOLEAN`.
    Boolean,
}

impl SqlType {
    /// Looks up a declared type name, falling back to `VARCHAR`.
    ///
    /// Unknown names are logged rather than rejected so that a typo in a
    /// request degrades to character binding instead of failing the call.
    #[must_use]
    pub fn lookup(name: &str) -> Self {
        name.trim().parse().unwrap_or_else(|_| {
            warn!(
                target: concat!(env!("CARGO_PKG_NAME"), "::binding"),
                sql_type = name,
                "unknown bind value type, using VARCHAR"
            );
            Self::Varchar
        })
    }

    /// Whether values of this type are points in time.
    #[must_use]
    pub const fn is_date(self) -> bool {
        matches!(self, Self::Date | Self::Datetime | Self::Timestamp)
    }

    /// Whether values of this type are numeric.
    #[must_use]
    pub const fn is_numeric(self) -> bool {
        matches!(
            self,
            Self::Int
                | Self::Integer
                | Self::Smallint
                | Self::Float
                | Self::Double
                | Self::Number
                | Self::Numeric
                | Self::Decimal
        )
    }
}
