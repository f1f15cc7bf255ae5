//! Placeholder parser for `:name` style binds.

use crate::binding::BindValues;
use crate::plugins::{PluginError, StatementParser};
use crate::session::Statement;

/// Replaces each `:name` outside string literals with `?` and collects the
/// named binds in order.
#[derive(Debug, Default, Clone, Copy)]
pub struct ColonParser;

impl StatementParser for ColonParser {
    fn parse(&self, sql: &str, binds: &BindValues, _call: bool) -> Result<Statement, PluginError> {
        let mut out = String::with_capacity(sql.len());
        let mut defs = Vec::new();
        let mut quoted = false;
        let mut chars = sql.chars().peekable();

        while let Some(ch) = chars.next() {
            if ch == '\'' {
                quoted = !quoted;
            }
            let starts_name = chars
                .peek()
                .is_some_and(|next| next.is_ascii_alphabetic() || *next == '_');
            if quoted || ch != ':' || !starts_name {
                out.push(ch);
                continue;
            }

            let mut name = String::new();
            while let Some(next) = chars.peek().copied() {
                if !(next.is_ascii_alphanumeric() || next == '_') {
                    break;
                }
                name.push(next);
                chars.next();
            }
            let def = binds
                .get(&name)
                .cloned()
                .ok_or_else(|| PluginError::new(format!("bind value '{name}' is not defined")))?;
            defs.push(def);
            out.push('?');
        }

        Ok(Statement::new(out, defs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::BindValueDef;
    use crate::value::Value;

    #[test]
    fn replaces_placeholders_in_order() {
        let mut binds = BindValues::new();
        binds.define(BindValueDef::mapped("b", Value::Int(2)));
        binds.define(BindValueDef::mapped("a", Value::Int(1)));

        let statement = ColonParser
            .parse("select ':a' from t where x = :a and y = :b", &binds, false)
            .expect("parse");
        assert_eq!(statement.sql, "select ':a' from t where x = ? and y = ?");
        let names: Vec<&str> = statement.binds.iter().map(BindValueDef::name).collect();
        assert_eq!(names, ["a", "b"]);
    }

    #[test]
    fn undefined_binds_are_rejected() {
        let result = ColonParser.parse("select :missing", &BindValues::new(), false);
        assert!(result.is_err());
    }
}
