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

//! Leaf sources (spec §4.8): `TableScan`, `IndexScan`, `Rows`, `Expressions`.
//!
//! `TableScan`/`IndexScan` each perform their single underlying KV range
//! scan eagerly at `open()` time, through `reldb_storage`'s existing
//! callback-based `Table::scan`/`Index::iterate_on_range` (C3/C4), into an
//! owned queue that `RowIter::next` then drains one row per call. A scan
//! cursor genuinely borrowed from a freshly-built `Table`/`Index` cannot
//! outlive the `open()` call that built it without a self-referential
//! struct, so this queue is the boundary where the KV layer's lazy cursor
//! becomes the pipeline's lazy `RowIter` — every operator downstream of a
//! source still pulls one row at a time (spec §4.8, §9).

use std::collections::VecDeque;
use std::sync::Arc;

use reldb_common::env::Params;
use reldb_common::expr::BoxedRowExpr;
use reldb_common::range::RangeExpr;
use reldb_common::row::Row;
use reldb_common::schema::DataType;

use crate::error::Result;
use crate::operator::{root_env, ExecCtx, OperatorId, OperatorNode, RowIter, Stream};

fn pk_column_types(info: &reldb_common::schema::TableInfo) -> Vec<DataType> {
    if info.has_surrogate_key() {
        vec![DataType::Bigint]
    } else {
        info.primary_key
            .iter()
            .map(|name| info.column(name).expect("primary key column declared").data_type)
            .collect()
    }
}

/// A row iterator over an already-materialized queue. Shared by every
/// operator that must fully drain its upstream before it can produce its
/// first output row (`TempTreeSort`, `Union`) as well as by the sources
/// below, which build their rows eagerly at `open()` time (see module docs).
pub(crate) struct RowQueueIter {
    pub(crate) rows: VecDeque<Row>,
}

impl RowIter for RowQueueIter {
    fn next(&mut self) -> Result<Option<Row>> {
        Ok(self.rows.pop_front())
    }
}

/// Full table scan in primary-key order (spec §4.3 `Scan`, §4.8 `TableScan`).
#[derive(Debug)]
pub struct TableScan {
    table: String,
    range: RangeExpr,
}

impl TableScan {
    pub fn new(table: impl Into<String>, range: RangeExpr) -> Self {
        Self {
            table: table.into(),
            range,
        }
    }
}

impl OperatorNode for TableScan {
    fn inputs(&self) -> Vec<OperatorId> {
        Vec::new()
    }

    fn open<'a>(
        &'a self,
        _stream: &'a Stream,
        ctx: &'a ExecCtx<'a>,
        params: &Arc<Params>,
    ) -> Result<Box<dyn RowIter + 'a>> {
        let table = reldb_storage::table::open_without_indexes(ctx.txn, ctx.catalog, &self.table)?;
        let pk_types = pk_column_types(table.info());
        let env = root_env(ctx, params);
        let typed_range = self.range.evaluate(&env, &pk_types)?;

        let mut rows = VecDeque::new();
        table.scan(&typed_range, &ctx.token, |row| {
            rows.push_back(row);
            Ok(())
        })?;
        Ok(Box::new(RowQueueIter { rows }))
    }

    fn display(&self, _stream: &Stream) -> String {
        format!("TableScan({})", self.table)
    }
}

/// Same as [`TableScan`] but in reverse primary-key order (spec §4.8).
#[derive(Debug)]
pub struct TableScanReverse(pub TableScan);

impl OperatorNode for TableScanReverse {
    fn inputs(&self) -> Vec<OperatorId> {
        Vec::new()
    }

    fn open<'a>(
        &'a self,
        _stream: &'a Stream,
        ctx: &'a ExecCtx<'a>,
        params: &Arc<Params>,
    ) -> Result<Box<dyn RowIter + 'a>> {
        let table = reldb_storage::table::open_without_indexes(ctx.txn, ctx.catalog, &self.0.table)?;
        let pk_types = pk_column_types(table.info());
        let env = root_env(ctx, params);
        let mut typed_range = self.0.range.evaluate(&env, &pk_types)?;
        typed_range.reverse = true;

        let mut rows = VecDeque::new();
        table.scan(&typed_range, &ctx.token, |row| {
            rows.push_back(row);
            Ok(())
        })?;
        Ok(Box::new(RowQueueIter { rows }))
    }

    fn display(&self, _stream: &Stream) -> String {
        format!("TableScanReverse({})", self.0.table)
    }
}

/// Secondary-index range scan (spec §4.4, §4.8 `IndexScan`): yields rows
/// from the owning table in index order, looking each one up by the
/// primary key the index entry carries.
#[derive(Debug)]
pub struct IndexScan {
    index: String,
    table: String,
    range: RangeExpr,
}

impl IndexScan {
    pub fn new(index: impl Into<String>, table: impl Into<String>, range: RangeExpr) -> Self {
        Self {
            index: index.into(),
            table: table.into(),
            range,
        }
    }

    fn run<'a>(&'a self, ctx: &'a ExecCtx<'a>, params: &Arc<Params>, reverse: bool) -> Result<VecDeque<Row>> {
        let index_info = ctx.catalog.index(&self.index)?;
        let index_store = ctx.txn.get_store(&self.index)?;
        let index = reldb_storage::index::Index::new(index_info.clone(), index_store);
        let table = reldb_storage::table::open_without_indexes(ctx.txn, ctx.catalog, &self.table)?;

        let column_types: Vec<DataType> = index_info
            .columns
            .iter()
            .map(|name| table.info().column(name).expect("index column declared on table").data_type)
            .collect();
        let env = root_env(ctx, params);
        let mut typed_range = self.range.evaluate(&env, &column_types)?;
        typed_range.reverse = reverse;

        let mut rows = VecDeque::new();
        index.iterate_on_range(&typed_range, &ctx.token, |row_key| {
            if let Some(row) = table.get(&row_key)? {
                rows.push_back(row);
            }
            Ok(())
        })?;
        Ok(rows)
    }
}

impl OperatorNode for IndexScan {
    fn inputs(&self) -> Vec<OperatorId> {
        Vec::new()
    }

    fn open<'a>(
        &'a self,
        _stream: &'a Stream,
        ctx: &'a ExecCtx<'a>,
        params: &Arc<Params>,
    ) -> Result<Box<dyn RowIter + 'a>> {
        let rows = self.run(ctx, params, false)?;
        Ok(Box::new(RowQueueIter { rows }))
    }

    fn display(&self, _stream: &Stream) -> String {
        format!("IndexScan({})", self.index)
    }
}

/// Same as [`IndexScan`] but in reverse index order (spec §4.8).
#[derive(Debug)]
pub struct IndexScanReverse(pub IndexScan);

impl OperatorNode for IndexScanReverse {
    fn inputs(&self) -> Vec<OperatorId> {
        Vec::new()
    }

    fn open<'a>(
        &'a self,
        _stream: &'a Stream,
        ctx: &'a ExecCtx<'a>,
        params: &Arc<Params>,
    ) -> Result<Box<dyn RowIter + 'a>> {
        let rows = self.0.run(ctx, params, true)?;
        Ok(Box::new(RowQueueIter { rows }))
    }

    fn display(&self, _stream: &Stream) -> String {
        format!("IndexScanReverse({})", self.0.index)
    }
}

/// A fixed, in-pipeline row set (spec §4.8): the building block for VALUES
/// literals and planner-injected constant rows (e.g. `OnConflict`'s
/// alternative stream).
pub struct Rows {
    columns: Vec<String>,
    rows: Vec<Vec<reldb_common::value::Value>>,
    #[allow(dead_code)]
    column_types: Vec<DataType>,
}

impl std::fmt::Debug for Rows {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Rows({} row(s))", self.rows.len())
    }
}

impl Rows {
    pub fn new(
        columns: Vec<String>,
        rows: Vec<Vec<reldb_common::value::Value>>,
        column_types: Vec<DataType>,
    ) -> Self {
        Self {
            columns,
            rows,
            column_types,
        }
    }
}

impl OperatorNode for Rows {
    fn inputs(&self) -> Vec<OperatorId> {
        Vec::new()
    }

    fn open<'a>(
        &'a self,
        _stream: &'a Stream,
        _ctx: &'a ExecCtx<'a>,
        _params: &Arc<Params>,
    ) -> Result<Box<dyn RowIter + 'a>> {
        let rows = self
            .rows
            .iter()
            .map(|values| Row::new(self.columns.iter().cloned().zip(values.iter().cloned()).collect()))
            .collect();
        Ok(Box::new(RowQueueIter { rows }))
    }

    fn display(&self, _stream: &Stream) -> String {
        "Rows".to_string()
    }
}

/// A source producing one row per [`reldb_common::expr::RowExpr`],
/// evaluated against the root environment (spec §4.8 `Expressions`).
///
/// [`Value`][reldb_common::value::Value] has no row/document variant (spec
/// §3), so unlike every other source here, this one's rows are computed by
/// the distinct [`RowExpr`][reldb_common::expr::RowExpr] contract rather
/// than read back off storage.
pub struct Expressions {
    exprs: Vec<BoxedRowExpr>,
}

impl std::fmt::Debug for Expressions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Expressions({} expr(s))", self.exprs.len())
    }
}

impl Expressions {
    pub fn new(exprs: Vec<BoxedRowExpr>) -> Self {
        Self { exprs }
    }
}

impl OperatorNode for Expressions {
    fn inputs(&self) -> Vec<OperatorId> {
        Vec::new()
    }

    fn open<'a>(
        &'a self,
        _stream: &'a Stream,
        ctx: &'a ExecCtx<'a>,
        params: &Arc<Params>,
    ) -> Result<Box<dyn RowIter + 'a>> {
        let env = root_env(ctx, params);
        let rows = self
            .exprs
            .iter()
            .map(|e| e.eval(&env))
            .collect::<Result<VecDeque<Row>>>()?;
        Ok(Box::new(RowQueueIter { rows }))
    }

    fn display(&self, _stream: &Stream) -> String {
        "Expressions".to_string()
    }
}

#[cfg(test)]
mod tests {
    use reldb_common::schema::{Column, TableInfo};
    use reldb_common::value::Value;
    use reldb_common::CancellationToken;
    use reldb_storage::catalog::Catalog;
    use reldb_storage::kv::memory::MemoryEngine;
    use reldb_storage::kv::Engine;

    use super::*;
    use crate::operator::run;

    fn fixture() -> (MemoryEngine, Catalog) {
        (MemoryEngine::new(), Catalog::new())
    }

    fn setup_table(engine: &MemoryEngine, catalog: &Catalog) {
        let token = CancellationToken::new();
        let txn = engine.begin(true, &token).unwrap();
        let cat_txn = catalog.begin(true);
        let info = TableInfo::new(
            "t",
            vec![Column::new("a", DataType::Integer).primary_key()],
            vec!["a".to_string()],
        );
        cat_txn.create_table(info).unwrap();
        txn.create_store("t").unwrap();
        let table = reldb_storage::table::open(txn.as_ref(), &cat_txn, "t").unwrap();
        for v in [1, 2, 3] {
            table
                .insert(
                    &Row::new(vec![("a".to_string(), Value::Integer(v))]),
                    &cat_txn,
                    &token,
                )
                .unwrap();
        }
        cat_txn.commit().unwrap();
        txn.commit().unwrap();
    }

    #[test]
    fn table_scan_yields_every_row_in_pk_order() {
        let (engine, catalog) = fixture();
        setup_table(&engine, &catalog);

        let token = CancellationToken::new();
        let txn = engine.begin(false, &token).unwrap();
        let cat_txn = catalog.begin(false);
        let ctx = ExecCtx {
            txn: txn.as_ref(),
            catalog: &cat_txn,
            token: token.clone(),
        };
        let params = Arc::new(Params::default());

        let mut stream = Stream::new();
        let scan = stream.push(Box::new(TableScan::new(
            "t",
            RangeExpr {
                min: None,
                max: None,
                exclusive: false,
                exact: false,
                reverse: false,
            },
        )));
        stream.set_root(scan);

        let iter = stream.open_root(&ctx, &params).unwrap();
        let mut seen = Vec::new();
        run(iter, |row| {
            seen.push(row.get("a").cloned().unwrap());
            Ok(())
        })
        .unwrap();
        assert_eq!(
            seen,
            vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]
        );
    }

    #[test]
    fn rows_source_materializes_literal_rows() {
        let (engine, catalog) = fixture();
        let token = CancellationToken::new();
        let txn = engine.begin(false, &token).unwrap();
        let cat_txn = catalog.begin(false);
        let ctx = ExecCtx {
            txn: txn.as_ref(),
            catalog: &cat_txn,
            token,
        };
        let params = Arc::new(Params::default());

        let mut stream = Stream::new();
        let rows = stream.push(Box::new(Rows::new(
            vec!["x".to_string()],
            vec![vec![Value::Integer(9)], vec![Value::Integer(10)]],
            vec![DataType::Integer],
        )));
        stream.set_root(rows);

        let iter = stream.open_root(&ctx, &params).unwrap();
        let mut seen = Vec::new();
        run(iter, |row| {
            seen.push(row.get("x").cloned().unwrap());
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec![Value::Integer(9), Value::Integer(10)]);
    }
}
