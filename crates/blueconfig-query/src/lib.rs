//! Query layer over `blueconfig-core` tables: expression parsing
//! (§4.G), planning and execution (§4.H), and aggregation/joins (§4.I).
//! [`QueryEngine`] wires them all onto a borrowed [`blueconfig_core::Engine`],
//! mirroring the way the core crate's own `Engine` wires its storage
//! layers onto a single `Store` handle.

pub mod aggregate;
pub mod ast;
pub mod compare;
pub mod cursor;
pub mod error;
pub mod eval;
pub mod explain;
pub mod lexer;
pub mod parser;
pub mod planner;

pub use ast::{Condition, Query, Term};
pub use aggregate::Aggregates;
pub use cursor::{FindOptions, QueryCursor, SortField};
pub use error::{QueryError, QueryResult};
pub use eval::Bindings;
pub use explain::{analyze_query, AnalyzeResult};
pub use planner::{QueryPlan, Strategy};

use blueconfig_core::{BlueConfigResult, Engine, Row, Value};

/// A query-capable handle over a single [`Engine`]. Stateless beyond the
/// borrow — every call re-lists the table's indexes and re-plans, so a
/// `QueryEngine` never observes a stale index list.
pub struct QueryEngine<'a> {
    engine: &'a Engine,
}

impl<'a> QueryEngine<'a> {
    pub fn new(engine: &'a Engine) -> Self {
        QueryEngine { engine }
    }

    /// Parse a query expression string into its normalized AST (§4.G).
    pub fn parse(&self, expr: &str) -> QueryResult<Query> {
        parser::parse(expr)
    }

    fn indexes(&self, table: &str) -> BlueConfigResult<Vec<blueconfig_core::index::IndexDef>> {
        self.engine.list_indexes(table)
    }

    pub fn find_rows_cursor(
        &self,
        table: &str,
        query: &Query,
        opts: &FindOptions,
        now: &str,
    ) -> QueryResult<QueryCursor<'_>> {
        let indexes = self.indexes(table)?;
        cursor::find_rows_cursor(self.engine.store(), table, query, &indexes, opts, now)
    }

    pub fn find_rows(&self, table: &str, query: &Query, opts: &FindOptions, now: &str) -> QueryResult<Vec<(String, Row)>> {
        let indexes = self.indexes(table)?;
        cursor::find_rows(self.engine.store(), table, query, &indexes, opts, now)
    }

    pub fn count_where(&self, table: &str, query: &Query, bindings: &Bindings, now: &str) -> QueryResult<usize> {
        let indexes = self.indexes(table)?;
        cursor::count_where(self.engine.store(), table, query, &indexes, bindings, now)
    }

    pub fn exists_where(&self, table: &str, query: &Query, bindings: &Bindings, now: &str) -> QueryResult<bool> {
        let indexes = self.indexes(table)?;
        cursor::exists_where(self.engine.store(), table, query, &indexes, bindings, now)
    }

    pub fn first_row(&self, table: &str, query: &Query, opts: &FindOptions, now: &str) -> QueryResult<Option<(String, Row)>> {
        let indexes = self.indexes(table)?;
        cursor::first_row(self.engine.store(), table, query, &indexes, opts, now)
    }

    pub fn update_rows_where(
        &self,
        table: &str,
        query: &Query,
        fields: &Row,
        bindings: &Bindings,
        now: &str,
    ) -> QueryResult<usize> {
        let indexes = self.indexes(table)?;
        cursor::update_rows_where(self.engine.store(), table, query, &indexes, fields, bindings, now)
    }

    pub fn delete_rows_where(&self, table: &str, query: &Query, bindings: &Bindings, now: &str) -> QueryResult<usize> {
        let indexes = self.indexes(table)?;
        cursor::delete_rows_where(self.engine.store(), table, query, &indexes, bindings, now)
    }

    pub fn find_rows_range(&self, table: &str, index_name: &str, start: &Value, end: &Value) -> QueryResult<Vec<String>> {
        cursor::find_rows_range(self.engine.store(), table, index_name, start, end)
    }

    pub fn find_rows_greater_than(&self, table: &str, index_name: &str, bound: &Value) -> QueryResult<Vec<String>> {
        cursor::find_rows_greater_than(self.engine.store(), table, index_name, bound)
    }

    pub fn find_rows_less_than_or_equal(&self, table: &str, index_name: &str, bound: &Value) -> QueryResult<Vec<String>> {
        cursor::find_rows_less_than_or_equal(self.engine.store(), table, index_name, bound)
    }

    /// Report the plan `query` would run under, without executing it
    /// (§11's `analyze_query`).
    pub fn analyze_query(&self, table: &str, query: &Query) -> BlueConfigResult<AnalyzeResult> {
        let indexes = self.indexes(table)?;
        Ok(explain::analyze_query(query, &indexes))
    }

    pub fn aggregate(&self, table: &str, query: &Query, field: &str, bindings: &Bindings, now: &str) -> QueryResult<Aggregates> {
        let indexes = self.indexes(table)?;
        aggregate::aggregate(self.engine.store(), table, query, &indexes, field, bindings, now)
    }

    pub fn group_by(
        &self,
        table: &str,
        query: &Query,
        group_field: &str,
        agg_field: &str,
        bindings: &Bindings,
        now: &str,
    ) -> QueryResult<std::collections::BTreeMap<String, Aggregates>> {
        let indexes = self.indexes(table)?;
        aggregate::group_by(self.engine.store(), table, query, &indexes, group_field, agg_field, bindings, now)
    }

    pub fn distinct_values(&self, table: &str, query: &Query, field: &str, bindings: &Bindings, now: &str) -> QueryResult<Vec<Value>> {
        let indexes = self.indexes(table)?;
        aggregate::distinct_values(self.engine.store(), table, query, &indexes, field, bindings, now)
    }

    pub fn count_distinct(&self, table: &str, query: &Query, field: &str, bindings: &Bindings, now: &str) -> QueryResult<usize> {
        let indexes = self.indexes(table)?;
        aggregate::count_distinct(self.engine.store(), table, query, &indexes, field, bindings, now)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn inner_join(
        &self,
        left_table: &str,
        left_query: &Query,
        left_field: &str,
        right_table: &str,
        right_field: &str,
        bindings: &Bindings,
        now: &str,
    ) -> QueryResult<Vec<(Row, Row)>> {
        let left_indexes = self.indexes(left_table)?;
        aggregate::inner_join(self.engine.store(), left_table, left_query, &left_indexes, left_field, right_table, right_field, bindings, now)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn left_join(
        &self,
        left_table: &str,
        left_query: &Query,
        left_field: &str,
        right_table: &str,
        right_field: &str,
        bindings: &Bindings,
        now: &str,
    ) -> QueryResult<Vec<(Row, Option<Row>)>> {
        let left_indexes = self.indexes(left_table)?;
        aggregate::left_join(self.engine.store(), left_table, left_query, &left_indexes, left_field, right_table, right_field, bindings, now)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn exists_in_subquery(
        &self,
        inner_table: &str,
        inner_query: &Query,
        inner_field: &str,
        outer_value: &Value,
        bindings: &Bindings,
        now: &str,
    ) -> QueryResult<bool> {
        let indexes = self.indexes(inner_table)?;
        aggregate::exists_in_subquery(self.engine.store(), inner_table, inner_query, &indexes, inner_field, outer_value, bindings, now)
    }

    pub fn in_subquery(
        &self,
        inner_table: &str,
        inner_query: &Query,
        inner_field: &str,
        bindings: &Bindings,
        now: &str,
    ) -> QueryResult<Vec<Value>> {
        let indexes = self.indexes(inner_table)?;
        aggregate::in_subquery(self.engine.store(), inner_table, inner_query, &indexes, inner_field, bindings, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blueconfig_core::{EngineConfig, Value as V};
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn engine() -> Engine {
        let dir = tempdir().unwrap();
        Engine::open(dir.path().join("db.bc"), EngineConfig::default()).unwrap()
    }

    fn obj(pairs: &[(&str, V)]) -> V {
        let mut m = BTreeMap::new();
        for (k, v) in pairs {
            m.insert(k.to_string(), v.clone());
        }
        V::Object(m)
    }

    #[test]
    fn end_to_end_query_through_the_engine_facade() {
        let core = engine();
        core.create_database("db", &BTreeMap::new()).unwrap();
        core.create_table("db", "users").unwrap();
        core.insert_with_id("db/users", "u1", &obj(&[("city", V::String("NYC".to_string())), ("age", V::Int(30))]), "t0").unwrap();
        core.insert_with_id("db/users", "u2", &obj(&[("city", V::String("LA".to_string())), ("age", V::Int(25))]), "t0").unwrap();
        core.create_index("db/users", "idx_city", vec!["city".to_string()], false, "t0").unwrap();

        let qe = QueryEngine::new(&core);
        let query = qe.parse("city == 'NYC'").unwrap();

        let report = qe.analyze_query("db/users", &query).unwrap();
        assert_eq!(report.strategy, Strategy::IndexScan);
        assert_eq!(report.index_name.as_deref(), Some("idx_city"));

        let rows = qe.find_rows("db/users", &query, &FindOptions::default(), "t0").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].1.get("city"), Some(&V::String("NYC".to_string())));

        let count = qe.count_where("db/users", &qe.parse("age > 0").unwrap(), &Bindings::new(), "t0").unwrap();
        assert_eq!(count, 2);
    }
}
