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

//! Result adapters (C9, spec §4.9): a column list, a row-at-a-time cursor,
//! and typed extraction by slot. The core's responsibility ends here —
//! translating a `Value` into a driver's native representation is the
//! caller's job (spec §4.9).

use reldb_common::row::Row;
use reldb_common::value::Value;
use reldb_stream::BoxedRowIter;

use crate::error::{Error, Result};

/// A row-at-a-time cursor over a `Statement::query` pipeline.
///
/// The column list is known as soon as the cursor is opened — `columns()`
/// is valid before the first call to [`Rows::next`] — by eagerly pulling
/// one row ahead at construction and holding it in `lookahead` until the
/// caller's first `next()` call promotes it to `current`. An upstream
/// error raised by that lookahead pull surfaces from [`query`][super::db::Statement::query]
/// itself rather than from the first `next()` call.
pub struct Rows<'a> {
    iter: BoxedRowIter<'a>,
    columns: Vec<String>,
    lookahead: Option<Row>,
    current: Option<Row>,
}

impl<'a> Rows<'a> {
    pub(crate) fn new(mut iter: BoxedRowIter<'a>) -> Result<Self> {
        let lookahead = iter.next()?;
        let columns = lookahead.as_ref().map(Row::column_names).unwrap_or_default();
        Ok(Self {
            iter,
            columns,
            lookahead,
            current: None,
        })
    }

    /// Column names, in the upstream operator's output order. Empty if the
    /// pipeline produced no rows at all.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Advances to the next row; `false` once the pipeline is exhausted.
    pub fn next(&mut self) -> Result<bool> {
        if let Some(row) = self.lookahead.take() {
            self.current = Some(row);
            return Ok(true);
        }
        self.current = self.iter.next()?;
        Ok(self.current.is_some())
    }

    /// Copies the current row's values into `out`, positionally. Errors if
    /// `next()` has not yet been called (or the cursor is exhausted), or if
    /// `out`'s length does not match the row's arity (spec §4.9/§6).
    pub fn scan(&self, out: &mut [Value]) -> Result<()> {
        let row = self.current.as_ref().ok_or(Error::NoCurrentRow)?;
        if out.len() != row.arity() {
            return Err(Error::ScanArityMismatch {
                actual: row.arity(),
                expected: out.len(),
            });
        }
        for (slot, value) in out.iter_mut().zip(row.values()) {
            *slot = value.clone();
        }
        Ok(())
    }

    /// Closes the underlying pipeline, running every operator's `close`
    /// (spec §4.8). Idempotent, matching `RowIter::close`'s own contract.
    pub fn close(&mut self) -> Result<()> {
        self.iter.close()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use reldb_common::schema::DataType;
    use reldb_common::CancellationToken;
    use reldb_storage::catalog::Catalog;
    use reldb_storage::kv::memory::MemoryEngine;
    use reldb_storage::kv::Engine;
    use reldb_stream::{ExecCtx, Stream};

    use super::*;
    use crate::Params;

    #[test]
    fn columns_available_before_first_next() {
        let engine = MemoryEngine::new();
        let catalog = Catalog::new();
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
        let rows_op = stream.push(Box::new(reldb_stream::source::Rows::new(
            vec!["a".to_string()],
            vec![vec![Value::Integer(1)], vec![Value::Integer(2)]],
            vec![DataType::Integer],
        )));
        stream.set_root(rows_op);

        let iter = stream.open_root(&ctx, &params).unwrap();
        let mut rows = Rows::new(iter).unwrap();
        assert_eq!(rows.columns(), &["a".to_string()]);

        let mut out = [Value::Null];
        assert!(rows.next().unwrap());
        rows.scan(&mut out).unwrap();
        assert_eq!(out[0], Value::Integer(1));

        assert!(rows.next().unwrap());
        rows.scan(&mut out).unwrap();
        assert_eq!(out[0], Value::Integer(2));

        assert!(!rows.next().unwrap());
        rows.close().unwrap();
    }

    #[test]
    fn scan_before_next_fails() {
        let engine = MemoryEngine::new();
        let catalog = Catalog::new();
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
        let rows_op = stream.push(Box::new(reldb_stream::source::Rows::new(
            vec!["a".to_string()],
            vec![vec![Value::Integer(1)]],
            vec![DataType::Integer],
        )));
        stream.set_root(rows_op);

        let iter = stream.open_root(&ctx, &params).unwrap();
        let rows = Rows::new(iter).unwrap();
        let mut out = [Value::Null];
        assert!(matches!(rows.scan(&mut out), Err(Error::NoCurrentRow)));
    }

    #[test]
    fn scan_arity_mismatch_fails() {
        let engine = MemoryEngine::new();
        let catalog = Catalog::new();
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
        let rows_op = stream.push(Box::new(reldb_stream::source::Rows::new(
            vec!["a".to_string()],
            vec![vec![Value::Integer(1)]],
            vec![DataType::Integer],
        )));
        stream.set_root(rows_op);

        let iter = stream.open_root(&ctx, &params).unwrap();
        let mut rows = Rows::new(iter).unwrap();
        assert!(rows.next().unwrap());
        let mut out = [Value::Null, Value::Null];
        assert!(matches!(
            rows.scan(&mut out),
            Err(Error::ScanArityMismatch {
                actual: 1,
                expected: 2
            })
        ));
    }
}
