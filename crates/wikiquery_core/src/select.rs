//! Incremental SELECT construction.
//!
//! Column and table names come from module code, never from request input;
//! every request-derived value is bound as a positional `?` parameter in the
//! order its clause was added.

use rusqlite::types::Value;
use rusqlite::{Connection, Row, params_from_iter};
use tracing::trace;

use crate::error::QueryResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl Comparison {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Condition {
    sql: String,
    params: Vec<Value>,
}

impl Condition {
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        let sql = sql.into();
        debug_assert_eq!(
            sql.matches('?').count(),
            params.len(),
            "placeholder count mismatch in {sql}"
        );
        Self { sql, params }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }
}

#[derive(Debug, Clone, Default)]
pub struct SelectBuilder {
    table: String,
    joins: Vec<String>,
    fields: Vec<String>,
    conditions: Vec<Condition>,
    order_by: Vec<String>,
    distinct: bool,
    limit: Option<usize>,
}

impl SelectBuilder {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            ..Self::default()
        }
    }

    pub fn join(&mut self, table: &str, on: &str) -> &mut Self {
        self.joins.push(format!("JOIN {table} ON {on}"));
        self
    }

    pub fn field(&mut self, expression: &str) -> &mut Self {
        self.fields.push(expression.to_string());
        self
    }

    pub fn fields(&mut self, expressions: &[&str]) -> &mut Self {
        self.fields
            .extend(expressions.iter().map(|value| (*value).to_string()));
        self
    }

    pub fn distinct(&mut self) -> &mut Self {
        self.distinct = true;
        self
    }

    pub fn add_condition(&mut self, condition: Condition) -> &mut Self {
        self.conditions.push(condition);
        self
    }

    pub fn where_raw(&mut self, sql: &str, params: Vec<Value>) -> &mut Self {
        self.add_condition(Condition::new(format!("({sql})"), params))
    }

    pub fn where_eq(&mut self, column: &str, value: impl Into<Value>) -> &mut Self {
        self.where_cmp(column, Comparison::Eq, value)
    }

    pub fn where_cmp(
        &mut self,
        column: &str,
        comparison: Comparison,
        value: impl Into<Value>,
    ) -> &mut Self {
        self.add_condition(Condition::new(
            format!("{column} {} ?", comparison.as_sql()),
            vec![value.into()],
        ))
    }

    /// `column IN (...)`; an empty set matches nothing.
    pub fn where_in(&mut self, column: &str, values: Vec<Value>) -> &mut Self {
        if values.is_empty() {
            return self.add_condition(Condition::new("1 = 0", Vec::new()));
        }
        if values.len() == 1 {
            let mut values = values;
            return self.where_eq(column, values.remove(0));
        }
        let placeholders = vec!["?"; values.len()].join(", ");
        self.add_condition(Condition::new(
            format!("{column} IN ({placeholders})"),
            values,
        ))
    }

    /// Case-sensitive prefix match.
    pub fn where_prefix(&mut self, column: &str, prefix: &str) -> &mut Self {
        let length = i64::try_from(prefix.chars().count()).unwrap_or(i64::MAX);
        self.add_condition(Condition::new(
            format!("substr({column}, 1, ?) = ?"),
            vec![Value::Integer(length), Value::Text(prefix.to_string())],
        ))
    }

    pub fn order_by(&mut self, expression: &str) -> &mut Self {
        self.order_by.push(expression.to_string());
        self
    }

    pub fn limit(&mut self, limit: usize) -> &mut Self {
        self.limit = Some(limit);
        self
    }

    pub fn to_sql(&self) -> String {
        let mut sql = String::from("SELECT ");
        if self.distinct {
            sql.push_str("DISTINCT ");
        }
        if self.fields.is_empty() {
            sql.push('*');
        } else {
            sql.push_str(&self.fields.join(", "));
        }
        sql.push_str(" FROM ");
        sql.push_str(&self.table);
        for join in &self.joins {
            sql.push(' ');
            sql.push_str(join);
        }
        if !self.conditions.is_empty() {
            sql.push_str(" WHERE ");
            let clauses: Vec<&str> = self.conditions.iter().map(Condition::sql).collect();
            sql.push_str(&clauses.join(" AND "));
        }
        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order_by.join(", "));
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        sql
    }

    pub fn params(&self) -> Vec<Value> {
        self.conditions
            .iter()
            .flat_map(|condition| condition.params().iter().cloned())
            .collect()
    }

    pub fn fetch<T, F>(&self, connection: &Connection, mut map_row: F) -> QueryResult<Vec<T>>
    where
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        let sql = self.to_sql();
        let params = self.params();
        trace!(%sql, params = params.len(), "executing select");

        let mut statement = connection.prepare(&sql)?;
        let rows = statement.query_map(params_from_iter(params.iter()), |row| map_row(row))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use rusqlite::Connection;
    use rusqlite::types::Value;

    use super::{Comparison, SelectBuilder};

    fn connection() -> Connection {
        let connection = Connection::open_in_memory().expect("open in-memory db");
        connection
            .execute_batch(
                "CREATE TABLE item (id INTEGER PRIMARY KEY, name TEXT NOT NULL, kind TEXT NOT NULL);
                 INSERT INTO item VALUES (1, 'Alpha', 'a'), (2, 'alpha', 'b'), (3, 'Beta', 'a'), (4, 'Alps', 'c');",
            )
            .expect("seed");
        connection
    }

    #[test]
    fn renders_clauses_in_order() {
        let mut builder = SelectBuilder::new("item");
        builder
            .fields(&["id", "name"])
            .where_eq("kind", "a".to_string())
            .where_cmp("id", Comparison::Gt, 0i64)
            .order_by("name ASC")
            .order_by("id ASC")
            .limit(11);

        assert_eq!(
            builder.to_sql(),
            "SELECT id, name FROM item WHERE kind = ? AND id > ? ORDER BY name ASC, id ASC LIMIT 11"
        );
        assert_eq!(
            builder.params(),
            vec![Value::Text("a".to_string()), Value::Integer(0)]
        );
    }

    #[test]
    fn fetch_binds_params_and_maps_rows() {
        let connection = connection();
        let mut builder = SelectBuilder::new("item");
        builder
            .field("name")
            .where_in(
                "kind",
                vec![Value::Text("a".to_string()), Value::Text("c".to_string())],
            )
            .order_by("id DESC");
        let names = builder
            .fetch(&connection, |row| row.get::<_, String>(0))
            .expect("fetch");
        assert_eq!(names, vec!["Alps", "Beta", "Alpha"]);
    }

    #[test]
    fn prefix_match_is_case_sensitive() {
        let connection = connection();
        let mut builder = SelectBuilder::new("item");
        builder.field("name").where_prefix("name", "Al").order_by("id");
        let names = builder
            .fetch(&connection, |row| row.get::<_, String>(0))
            .expect("fetch");
        assert_eq!(names, vec!["Alpha", "Alps"]);
    }

    #[test]
    fn empty_in_set_matches_nothing() {
        let connection = connection();
        let mut builder = SelectBuilder::new("item");
        builder.field("id").where_in("kind", Vec::new());
        let ids = builder
            .fetch(&connection, |row| row.get::<_, i64>(0))
            .expect("fetch");
        assert!(ids.is_empty());
    }

    #[test]
    fn storage_errors_surface_as_query_errors() {
        let connection = connection();
        let builder = SelectBuilder::new("missing_table");
        let error = builder
            .fetch(&connection, |row| row.get::<_, i64>(0))
            .expect_err("must fail");
        assert!(!error.is_recoverable());
    }
}
