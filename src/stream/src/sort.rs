// Copyright 2022 Singularity Data
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Ordering and grouping operators (spec §4.8): `TempTreeSort`,
//! `TempTreeSortReverse`, `GroupAggregate`, plus the `Aggregator` contract
//! and its `Count`/`Sum`/`CountStar` implementations (spec §9).

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::Arc;

use reldb_common::env::Params;
use reldb_common::expr::BoxedExpr;
use reldb_common::row::Row;
use reldb_common::value::Value;

use crate::error::Result;
use crate::operator::{ExecCtx, OperatorId, OperatorNode, RowIter, RowScope, Stream};
use crate::source::RowQueueIter;

/// Null-aware total order for sort keys (spec §4.8, §9 scenario 6): null
/// sorts below every other value in ascending order. `Value::compare`
/// returns `None` for a null/non-null pair because that comparison is SQL's
/// three-valued "unknown" (spec §3); sorting needs a decision, not an
/// unknown, so this wraps it with the explicit rule.
fn sort_key_order(a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.compare(b).unwrap_or(Ordering::Equal),
    }
}

/// Materializes upstream into a temp tree keyed by `(sortExpr, uniqueCounter)`
/// and replays it in order (spec §4.8 `TempTreeSort`). The counter is the
/// tiebreaker for equal sort keys, so ties replay in input order regardless
/// of direction (spec §9's resolved open question on sort stability).
pub struct TempTreeSort {
    input: OperatorId,
    expr: BoxedExpr,
}

impl std::fmt::Debug for TempTreeSort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TempTreeSort({})", self.expr.string())
    }
}

impl TempTreeSort {
    pub fn new(input: OperatorId, expr: BoxedExpr) -> Self {
        Self { input, expr }
    }

    fn sorted_rows<'a>(
        &'a self,
        stream: &'a Stream,
        ctx: &'a ExecCtx<'a>,
        params: &Arc<Params>,
        reverse: bool,
    ) -> Result<VecDeque<Row>> {
        let mut upstream = stream.open(self.input, ctx, params)?;
        let mut tagged = Vec::new();
        let mut counter: u64 = 0;
        while let Some(row) = upstream.next()? {
            let scope = RowScope {
                row: &row,
                params: params.clone(),
            };
            let key = self.expr.eval(&scope)?;
            tagged.push((key, counter, row));
            counter += 1;
        }
        upstream.close()?;

        tagged.sort_by(|(ka, ca, _), (kb, cb, _)| {
            let primary = sort_key_order(ka, kb);
            let primary = if reverse { primary.reverse() } else { primary };
            primary.then(ca.cmp(cb))
        });
        Ok(tagged.into_iter().map(|(_, _, row)| row).collect())
    }
}

impl OperatorNode for TempTreeSort {
    fn inputs(&self) -> Vec<OperatorId> {
        vec![self.input]
    }

    fn set_upstream(&mut self, new: OperatorId) {
        self.input = new;
    }

    fn open<'a>(
        &'a self,
        stream: &'a Stream,
        ctx: &'a ExecCtx<'a>,
        params: &Arc<Params>,
    ) -> Result<Box<dyn RowIter + 'a>> {
        let rows = self.sorted_rows(stream, ctx, params, false)?;
        Ok(Box::new(RowQueueIter { rows }))
    }

    fn display(&self, _stream: &Stream) -> String {
        format!("TempTreeSort({})", self.expr.string())
    }
}

/// Same as [`TempTreeSort`] but descending (spec §4.8): nulls sort above
/// every other value, the mirror of the ascending rule.
pub struct TempTreeSortReverse(pub TempTreeSort);

impl std::fmt::Debug for TempTreeSortReverse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TempTreeSortReverse({})", self.0.expr.string())
    }
}

impl OperatorNode for TempTreeSortReverse {
    fn inputs(&self) -> Vec<OperatorId> {
        vec![self.0.input]
    }

    fn set_upstream(&mut self, new: OperatorId) {
        self.0.input = new;
    }

    fn open<'a>(
        &'a self,
        stream: &'a Stream,
        ctx: &'a ExecCtx<'a>,
        params: &Arc<Params>,
    ) -> Result<Box<dyn RowIter + 'a>> {
        let rows = self.0.sorted_rows(stream, ctx, params, true)?;
        Ok(Box::new(RowQueueIter { rows }))
    }

    fn display(&self, _stream: &Stream) -> String {
        format!("TempTreeSortReverse({})", self.0.expr.string())
    }
}

/// An incremental reducer over a group of rows (spec §9 design note).
///
/// `update` takes the running `state` explicitly rather than mutating owned
/// fields, so the state machine lives in the pipeline (per group, replayed
/// across rows) while the `&mut self` receiver is reserved for an
/// aggregator that needs its own scratch space (e.g. a future COUNT DISTINCT
/// tracking a seen-value set). `Count`/`Sum`/`CountStar` below don't need
/// one and leave `self` untouched.
pub trait Aggregator {
    fn init(&self) -> Value;
    fn update(&mut self, state: Value, row: &Row) -> Result<Value>;
    fn finalize(&self, state: Value) -> Value;
    fn name(&self) -> &str;
}

/// Counts non-null values of `column` (spec §9).
pub struct Count {
    column: String,
    name: String,
}

impl Count {
    pub fn new(column: impl Into<String>) -> Self {
        let column = column.into();
        let name = format!("count({column})");
        Self { column, name }
    }
}

impl Aggregator for Count {
    fn init(&self) -> Value {
        Value::Bigint(0)
    }

    fn update(&mut self, state: Value, row: &Row) -> Result<Value> {
        let Value::Bigint(n) = state else {
            unreachable!("Count state is always Bigint")
        };
        match row.get(&self.column) {
            Some(v) if !v.is_null() => Ok(Value::Bigint(n + 1)),
            _ => Ok(Value::Bigint(n)),
        }
    }

    fn finalize(&self, state: Value) -> Value {
        state
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Counts every row in the group, including ones where `column` is null
/// (spec §9 `COUNT(*)`).
pub struct CountStar {
    name: String,
}

impl CountStar {
    pub fn new() -> Self {
        Self {
            name: "count(*)".to_string(),
        }
    }
}

impl Default for CountStar {
    fn default() -> Self {
        Self::new()
    }
}

impl Aggregator for CountStar {
    fn init(&self) -> Value {
        Value::Bigint(0)
    }

    fn update(&mut self, state: Value, _row: &Row) -> Result<Value> {
        let Value::Bigint(n) = state else {
            unreachable!("CountStar state is always Bigint")
        };
        Ok(Value::Bigint(n + 1))
    }

    fn finalize(&self, state: Value) -> Value {
        state
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Sums `column`'s numeric values, skipping nulls (spec §9). Non-numeric
/// values fail with `Error::TypeMismatch` rather than being silently
/// skipped.
pub struct Sum {
    column: String,
    name: String,
}

impl Sum {
    pub fn new(column: impl Into<String>) -> Self {
        let column = column.into();
        let name = format!("sum({column})");
        Self { column, name }
    }
}

impl Aggregator for Sum {
    fn init(&self) -> Value {
        Value::Double(0.0)
    }

    fn update(&mut self, state: Value, row: &Row) -> Result<Value> {
        let Value::Double(acc) = state else {
            unreachable!("Sum state is always Double")
        };
        let delta = match row.get(&self.column) {
            None | Some(Value::Null) => return Ok(Value::Double(acc)),
            Some(Value::Integer(v)) => *v as f64,
            Some(Value::Bigint(v)) => *v as f64,
            Some(Value::Double(v)) => *v,
            Some(other) => {
                return Err(crate::error::Error::TypeMismatch {
                    from: other.type_name().to_string(),
                    to: "double".to_string(),
                })
            }
        };
        Ok(Value::Double(acc + delta))
    }

    fn finalize(&self, state: Value) -> Value {
        state
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Groups consecutive rows sharing a `groupExpr` value and feeds each group
/// to every aggregator (spec §4.8 `GroupAggregate`). Assumes the upstream is
/// already ordered by `groupExpr` (typically a `TempTreeSort` immediately
/// below it) — it only ever compares a row's group key against the
/// previous row's, never against the whole input.
///
/// Aggregators are boxed trait objects behind a `RefCell`: `Aggregator::update`
/// takes `&mut self`, but `OperatorNode::open` hands out only `&'a self`
/// (a pipeline node is shared, never exclusively borrowed, once compiled).
/// Interior mutability is sound here because nothing in this engine runs two
/// iterations of the same transaction concurrently (spec §5).
pub struct GroupAggregate {
    input: OperatorId,
    group_expr: BoxedExpr,
    aggregators: RefCell<Vec<Box<dyn Aggregator>>>,
}

impl std::fmt::Debug for GroupAggregate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GroupAggregate({})", self.group_expr.string())
    }
}

impl GroupAggregate {
    pub fn new(input: OperatorId, group_expr: BoxedExpr, aggregators: Vec<Box<dyn Aggregator>>) -> Self {
        Self {
            input,
            group_expr,
            aggregators: RefCell::new(aggregators),
        }
    }
}

impl OperatorNode for GroupAggregate {
    fn inputs(&self) -> Vec<OperatorId> {
        vec![self.input]
    }

    fn set_upstream(&mut self, new: OperatorId) {
        self.input = new;
    }

    fn open<'a>(
        &'a self,
        stream: &'a Stream,
        ctx: &'a ExecCtx<'a>,
        params: &Arc<Params>,
    ) -> Result<Box<dyn RowIter + 'a>> {
        let upstream = stream.open(self.input, ctx, params)?;
        Ok(Box::new(GroupAggregateIter {
            upstream,
            group_expr: &self.group_expr,
            aggregators: &self.aggregators,
            params: params.clone(),
            lookahead: None,
            started: false,
        }))
    }

    fn display(&self, _stream: &Stream) -> String {
        format!("GroupAggregate({})", self.group_expr.string())
    }
}

struct GroupAggregateIter<'a> {
    upstream: Box<dyn RowIter + 'a>,
    group_expr: &'a BoxedExpr,
    aggregators: &'a RefCell<Vec<Box<dyn Aggregator>>>,
    params: Arc<Params>,
    lookahead: Option<Row>,
    started: bool,
}

impl<'a> GroupAggregateIter<'a> {
    fn group_key(&self, row: &Row) -> Result<Value> {
        let scope = RowScope {
            row,
            params: self.params.clone(),
        };
        self.group_expr.eval(&scope)
    }

    fn feed(&self, row: &Row, states: Vec<Value>) -> Result<Vec<Value>> {
        let mut aggregators = self.aggregators.borrow_mut();
        states
            .into_iter()
            .zip(aggregators.iter_mut())
            .map(|(state, agg)| agg.update(state, row))
            .collect()
    }

    fn finish_row(&self, group_key: Value, states: Vec<Value>) -> Row {
        let aggregators = self.aggregators.borrow();
        let mut columns = vec![(self.group_expr.string(), group_key)];
        for (agg, state) in aggregators.iter().zip(states) {
            columns.push((agg.name().to_string(), agg.finalize(state)));
        }
        Row::new(columns)
    }

    /// The single row emitted for an empty input (spec §4.8): every
    /// aggregator's initial state, finalized with no rows fed in.
    fn empty_group_row(&self) -> Row {
        let aggregators = self.aggregators.borrow();
        let mut columns = vec![(self.group_expr.string(), Value::Null)];
        for agg in aggregators.iter() {
            columns.push((agg.name().to_string(), agg.finalize(agg.init())));
        }
        Row::new(columns)
    }
}

impl RowIter for GroupAggregateIter<'_> {
    fn next(&mut self) -> Result<Option<Row>> {
        if !self.started {
            self.started = true;
            self.lookahead = self.upstream.next()?;
            if self.lookahead.is_none() {
                return Ok(Some(self.empty_group_row()));
            }
        }

        let Some(first_row) = self.lookahead.take() else {
            return Ok(None);
        };
        let group_key = self.group_key(&first_row)?;
        let init_states: Vec<Value> = self.aggregators.borrow().iter().map(|a| a.init()).collect();
        let mut states = self.feed(&first_row, init_states)?;

        loop {
            match self.upstream.next()? {
                Some(row) => {
                    let key = self.group_key(&row)?;
                    if sort_key_order(&key, &group_key) == Ordering::Equal {
                        states = self.feed(&row, states)?;
                    } else {
                        self.lookahead = Some(row);
                        break;
                    }
                }
                None => {
                    self.lookahead = None;
                    break;
                }
            }
        }

        Ok(Some(self.finish_row(group_key, states)))
    }

    fn close(&mut self) -> Result<()> {
        self.upstream.close()
    }
}

#[cfg(test)]
mod tests {
    use reldb_common::expr::Column;
    use reldb_common::schema::DataType;
    use reldb_common::CancellationToken;
    use reldb_storage::catalog::Catalog;
    use reldb_storage::kv::memory::MemoryEngine;
    use reldb_storage::kv::Engine;

    use super::*;
    use crate::operator::run;
    use crate::source::Rows;

    fn ctx_fixture<'a>(
        txn: &'a dyn reldb_storage::kv::Transaction,
        catalog: &'a reldb_storage::catalog::CatalogTransaction,
        token: CancellationToken,
    ) -> ExecCtx<'a> {
        ExecCtx { txn, catalog, token }
    }

    fn empty_engine() -> (MemoryEngine, Catalog) {
        (MemoryEngine::new(), Catalog::new())
    }

    #[test]
    fn sort_stability_with_nulls_ascending() {
        let (engine, catalog) = empty_engine();
        let token = CancellationToken::new();
        let txn = engine.begin(false, &token).unwrap();
        let cat_txn = catalog.begin(false);
        let ctx = ctx_fixture(txn.as_ref(), &cat_txn, token);
        let params = Arc::new(Params::default());

        let mut stream = Stream::new();
        let rows = stream.push(Box::new(Rows::new(
            vec!["a".to_string()],
            vec![
                vec![Value::Integer(0)],
                vec![Value::Null],
                vec![Value::Boolean(true)],
            ],
            vec![DataType::Integer],
        )));
        let sort = stream.push(Box::new(TempTreeSort::new(rows, Box::new(Column("a".to_string())))));
        stream.set_root(sort);

        let iter = stream.open_root(&ctx, &params).unwrap();
        let mut seen = Vec::new();
        run(iter, |row| {
            seen.push(row.get("a").cloned().unwrap());
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec![Value::Null, Value::Integer(0), Value::Boolean(true)]);
    }

    #[test]
    fn sort_stability_with_nulls_descending() {
        let (engine, catalog) = empty_engine();
        let token = CancellationToken::new();
        let txn = engine.begin(false, &token).unwrap();
        let cat_txn = catalog.begin(false);
        let ctx = ctx_fixture(txn.as_ref(), &cat_txn, token);
        let params = Arc::new(Params::default());

        let mut stream = Stream::new();
        let rows = stream.push(Box::new(Rows::new(
            vec!["a".to_string()],
            vec![
                vec![Value::Integer(0)],
                vec![Value::Null],
                vec![Value::Boolean(true)],
            ],
            vec![DataType::Integer],
        )));
        let sort = stream.push(Box::new(TempTreeSortReverse(TempTreeSort::new(
            rows,
            Box::new(Column("a".to_string())),
        ))));
        stream.set_root(sort);

        let iter = stream.open_root(&ctx, &params).unwrap();
        let mut seen = Vec::new();
        run(iter, |row| {
            seen.push(row.get("a").cloned().unwrap());
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec![Value::Boolean(true), Value::Integer(0), Value::Null]);
    }

    #[test]
    fn group_aggregate_counts_per_group() {
        let (engine, catalog) = empty_engine();
        let token = CancellationToken::new();
        let txn = engine.begin(false, &token).unwrap();
        let cat_txn = catalog.begin(false);
        let ctx = ctx_fixture(txn.as_ref(), &cat_txn, token);
        let params = Arc::new(Params::default());

        let mut stream = Stream::new();
        // Already sorted by "g", as GroupAggregate requires.
        let rows = stream.push(Box::new(Rows::new(
            vec!["g".to_string(), "a".to_string()],
            vec![
                vec![Value::Integer(1), Value::Integer(10)],
                vec![Value::Integer(1), Value::Null],
                vec![Value::Integer(2), Value::Integer(20)],
            ],
            vec![DataType::Integer, DataType::Integer],
        )));
        let agg = stream.push(Box::new(GroupAggregate::new(
            rows,
            Box::new(Column("g".to_string())),
            vec![Box::new(Count::new("a")), Box::new(CountStar::new())],
        )));
        stream.set_root(agg);

        let iter = stream.open_root(&ctx, &params).unwrap();
        let mut seen = Vec::new();
        run(iter, |row| {
            seen.push((
                row.get("g").cloned().unwrap(),
                row.get("count(a)").cloned().unwrap(),
                row.get("count(*)").cloned().unwrap(),
            ));
            Ok(())
        })
        .unwrap();
        assert_eq!(
            seen,
            vec![
                (Value::Integer(1), Value::Bigint(1), Value::Bigint(2)),
                (Value::Integer(2), Value::Bigint(1), Value::Bigint(1)),
            ]
        );
    }

    #[test]
    fn group_aggregate_on_empty_input_emits_one_row() {
        let (engine, catalog) = empty_engine();
        let token = CancellationToken::new();
        let txn = engine.begin(false, &token).unwrap();
        let cat_txn = catalog.begin(false);
        let ctx = ctx_fixture(txn.as_ref(), &cat_txn, token);
        let params = Arc::new(Params::default());

        let mut stream = Stream::new();
        let rows = stream.push(Box::new(Rows::new(vec!["g".to_string()], vec![], vec![DataType::Integer])));
        let agg = stream.push(Box::new(GroupAggregate::new(
            rows,
            Box::new(Column("g".to_string())),
            vec![Box::new(CountStar::new())],
        )));
        stream.set_root(agg);

        let iter = stream.open_root(&ctx, &params).unwrap();
        let mut seen = Vec::new();
        run(iter, |row| {
            seen.push(row.get("count(*)").cloned().unwrap());
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec![Value::Bigint(0)]);
    }
}
