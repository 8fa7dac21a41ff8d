//! Access to Snowflake through parameterized statements.
//!
//! Handlers only see [`SqlExecutor`]; the production implementation is
//! [`SnowflakeClient`], tests substitute in-memory stores.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::error::Result;

mod client;
pub mod credentials;

pub use client::SnowflakeClient;
pub use credentials::SnowflakeCredentials;

/// One result row: nullable text cells in select-list order.
pub type Row = Vec<Option<String>>;

/// Value bound to a `?` placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    Text(String),
    Fixed(i64),
}

impl Binding {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            Self::Fixed(_) => None,
        }
    }

    pub fn as_fixed(&self) -> Option<i64> {
        match self {
            Self::Fixed(v) => Some(*v),
            Self::Text(_) => None,
        }
    }

    fn to_wire(&self) -> Value {
        match self {
            Self::Text(v) => json!({"type": "TEXT", "value": v}),
            Self::Fixed(v) => json!({"type": "FIXED", "value": v.to_string()}),
        }
    }
}

/// A SQL statement with positional (`?`) bindings.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub bindings: Vec<Binding>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            bindings: Vec::new(),
        }
    }

    pub fn bind(mut self, binding: Binding) -> Self {
        self.bindings.push(binding);
        self
    }

    pub fn bind_text(self, value: impl Into<String>) -> Self {
        self.bind(Binding::text(value))
    }

    pub fn bind_fixed(self, value: i64) -> Self {
        self.bind(Binding::Fixed(value))
    }

    /// Bindings in the SQL API form: `{"1": {"type": "TEXT", "value": "..."}}`.
    pub fn wire_bindings(&self) -> Option<Map<String, Value>> {
        if self.bindings.is_empty() {
            return None;
        }
        Some(
            self.bindings
                .iter()
                .enumerate()
                .map(|(i, b)| ((i + 1).to_string(), b.to_wire()))
                .collect(),
        )
    }
}

#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Run a statement to completion and return every result row.
    async fn execute(&self, statement: &Statement) -> Result<Vec<Row>>;
}

/// Cell `index` of `row`, treating a missing column like SQL NULL.
pub fn cell(row: &Row, index: usize) -> Option<&str> {
    row.get(index).and_then(|c| c.as_deref())
}

/// Quote a Snowflake identifier literal for `identifier('...')`.
/// Names containing a single quote cannot be expressed safely and are rejected.
pub fn identifier_literal(name: &str) -> Option<String> {
    if name.is_empty() || name.contains('\'') || name.contains('\\') {
        None
    } else {
        Some(format!("identifier('{}')", name))
    }
}

/// Object names (tables, stages, file formats) that can be inlined into a
/// statement where bindings are not accepted.
pub fn is_plain_object_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .split('.')
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$'))
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;
    use crate::error::ConnectorError;

    /// Replays scripted results in order and records every statement.
    #[derive(Default)]
    pub struct ScriptedExecutor {
        responses: Mutex<VecDeque<Result<Vec<Row>>>>,
        pub executed: Mutex<Vec<Statement>>,
    }

    impl ScriptedExecutor {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn respond(self, rows: Vec<Row>) -> Self {
            self.responses.lock().unwrap().push_back(Ok(rows));
            self
        }

        pub fn fail(self, message: &str) -> Self {
            self.responses
                .lock()
                .unwrap()
                .push_back(Err(ConnectorError::SnowflakeError(message.to_string())));
            self
        }

        pub fn statements(&self) -> Vec<Statement> {
            self.executed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SqlExecutor for ScriptedExecutor {
        async fn execute(&self, statement: &Statement) -> Result<Vec<Row>> {
            self.executed.lock().unwrap().push(statement.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    pub fn row(cells: &[Option<&str>]) -> Row {
        cells.iter().map(|c| c.map(str::to_string)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_bindings() {
        let statement = Statement::new("select 1 from identifier(?) where PT = ? LIMIT ?")
            .bind_text("TS_TABLE")
            .bind_text("PT-1")
            .bind_fixed(5);

        let wire = statement.wire_bindings().unwrap();
        assert_eq!(wire["1"], json!({"type": "TEXT", "value": "TS_TABLE"}));
        assert_eq!(wire["3"], json!({"type": "FIXED", "value": "5"}));
        assert!(Statement::new("select 1").wire_bindings().is_none());
    }

    #[test]
    fn test_cell_access() {
        let row: Row = vec![Some("a".to_string()), None];
        assert_eq!(cell(&row, 0), Some("a"));
        assert_eq!(cell(&row, 1), None);
        assert_eq!(cell(&row, 5), None);
    }

    #[test]
    fn test_identifier_quoting() {
        assert_eq!(identifier_literal("Flow_Rate").unwrap(), "identifier('Flow_Rate')");
        assert!(identifier_literal("x'); drop table t; --").is_none());
        assert!(identifier_literal("").is_none());

        assert!(is_plain_object_name("DB.SCHEMA.TS_TABLE"));
        assert!(!is_plain_object_name("TS TABLE"));
        assert!(!is_plain_object_name("DB..T"));
    }
}
