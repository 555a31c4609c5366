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

//! Table and index sinks (spec §4.8): `TableInsert`, `TableReplace`,
//! `TableDelete`, `IndexInsert`, `IndexDelete`, `IndexValidate`.
//!
//! Every table sink opens its table through
//! [`reldb_storage::table::open_without_indexes`]: in the streaming model
//! index maintenance is its own explicit stage the planner chains after the
//! table sink (spec §4.8 "emit the affected row with its key attached so
//! downstream operators ... can run"), not something the table mutation
//! performs on its own the way [`reldb_storage::table::open`]'s
//! self-maintaining form does for callers outside the pipeline.

use std::sync::Arc;

use reldb_common::env::Params;
use reldb_common::row::Row;
use reldb_common::schema::IndexInfo;
use reldb_common::value::Value;
use reldb_common::CancellationToken;
use reldb_storage::catalog::CatalogTransaction;
use reldb_storage::index::Index;
use reldb_storage::table::Table;

use crate::error::{Error, Result};
use crate::operator::{ExecCtx, OperatorId, OperatorNode, RowIter, Stream};

/// Reads the tuple an index cares about directly off a row's own columns —
/// the row reaching these sinks already carries every column of its owning
/// table (it was built by `TableInsert`/`TableReplace` or read by a scan).
fn index_tuple(row: &Row, info: &IndexInfo) -> Vec<Value> {
    info.columns
        .iter()
        .map(|c| row.get(c).cloned().unwrap_or(Value::Null))
        .collect()
}

fn row_key(row: &Row) -> Result<&[u8]> {
    row.key.as_deref().ok_or(Error::KeyNotFound)
}

macro_rules! table_sink {
    ($name:ident, $iter:ident, $verb:literal, $apply:expr) => {
        #[doc = concat!("Applies a table ", $verb, " for every upstream row (spec §4.8).")]
        pub struct $name {
            input: OperatorId,
            table: String,
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({})", stringify!($name), self.table)
            }
        }

        impl $name {
            pub fn new(input: OperatorId, table: impl Into<String>) -> Self {
                Self {
                    input,
                    table: table.into(),
                }
            }
        }

        impl OperatorNode for $name {
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
                let table = reldb_storage::table::open_without_indexes(ctx.txn, ctx.catalog, &self.table)?;
                Ok(Box::new($iter {
                    upstream,
                    table,
                    catalog: ctx.catalog,
                    token: ctx.token.clone(),
                }))
            }

            fn display(&self, _stream: &Stream) -> String {
                format!("{}({})", stringify!($name), self.table)
            }
        }

        struct $iter<'a> {
            upstream: Box<dyn RowIter + 'a>,
            table: Table<'a>,
            catalog: &'a CatalogTransaction,
            token: CancellationToken,
        }

        impl RowIter for $iter<'_> {
            fn next(&mut self) -> Result<Option<Row>> {
                let Some(row) = self.upstream.next()? else {
                    return Ok(None);
                };
                self.token.check()?;
                let apply: fn(&Table<'_>, &Row, &CatalogTransaction, &CancellationToken) -> Result<Row> = $apply;
                apply(&self.table, &row, self.catalog, &self.token).map(Some)
            }

            fn close(&mut self) -> Result<()> {
                self.upstream.close()
            }
        }
    };
}

table_sink!(TableInsert, TableInsertIter, "insert", |table, row, cat, tok| {
    table.insert(row, cat, tok)
});

table_sink!(TableReplace, TableReplaceIter, "replace", |table, row, cat, tok| {
    let key = table.key_for(row)?;
    table.replace(&key, row, cat, tok)
});

table_sink!(TableDelete, TableDeleteIter, "delete", |table, row, _cat, _tok| {
    let key = table.key_for(row)?;
    table.delete(&key)
});

macro_rules! index_sink {
    ($name:ident, $iter:ident, $apply:expr) => {
        #[doc = concat!("`", stringify!($name), "` (spec §4.8): one index maintenance step per upstream row.")]
        pub struct $name {
            input: OperatorId,
            index: String,
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({})", stringify!($name), self.index)
            }
        }

        impl $name {
            pub fn new(input: OperatorId, index: impl Into<String>) -> Self {
                Self {
                    input,
                    index: index.into(),
                }
            }
        }

        impl OperatorNode for $name {
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
                let info = ctx.catalog.index(&self.index)?;
                let store = ctx.txn.get_store(&self.index)?;
                let index = Index::new(info, store);
                Ok(Box::new($iter {
                    upstream,
                    index,
                    token: ctx.token.clone(),
                }))
            }

            fn display(&self, _stream: &Stream) -> String {
                format!("{}({})", stringify!($name), self.index)
            }
        }

        struct $iter<'a> {
            upstream: Box<dyn RowIter + 'a>,
            index: Index<'a>,
            token: CancellationToken,
        }

        impl RowIter for $iter<'_> {
            fn next(&mut self) -> Result<Option<Row>> {
                let Some(row) = self.upstream.next()? else {
                    return Ok(None);
                };
                self.token.check()?;
                let apply: fn(&Index<'_>, &Row, &CancellationToken) -> Result<()> = $apply;
                apply(&self.index, &row, &self.token)?;
                Ok(Some(row))
            }

            fn close(&mut self) -> Result<()> {
                self.upstream.close()
            }
        }
    };
}

index_sink!(IndexInsert, IndexInsertIter, |index, row, token| {
    let tuple = index_tuple(row, index.info());
    index.set(&tuple, row_key(row)?, token)
});

index_sink!(IndexDelete, IndexDeleteIter, |index, row, _token| {
    let tuple = index_tuple(row, index.info());
    index.delete(&tuple, row_key(row)?)
});

index_sink!(IndexValidate, IndexValidateIter, |index, row, token| {
    let tuple = index_tuple(row, index.info());
    index.check_unique(&tuple, token)
});

#[cfg(test)]
mod tests {
    use reldb_common::schema::{Column, DataType, TableInfo};
    use reldb_common::value::Value;
    use reldb_storage::catalog::Catalog;
    use reldb_storage::kv::memory::MemoryEngine;
    use reldb_storage::kv::Engine;

    use super::*;
    use crate::operator::run;
    use crate::source::Rows;

    fn fixture() -> (MemoryEngine, Catalog) {
        (MemoryEngine::new(), Catalog::new())
    }

    fn create_table(engine: &MemoryEngine, catalog: &Catalog) {
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
        cat_txn.commit().unwrap();
        txn.commit().unwrap();
    }

    #[test]
    fn table_insert_emits_row_with_key_attached() {
        let (engine, catalog) = fixture();
        create_table(&engine, &catalog);

        let token = CancellationToken::new();
        let txn = engine.begin(true, &token).unwrap();
        let cat_txn = catalog.begin(true);
        let ctx = ExecCtx {
            txn: txn.as_ref(),
            catalog: &cat_txn,
            token: token.clone(),
        };
        let params = Arc::new(Params::default());

        let mut stream = Stream::new();
        let rows = stream.push(Box::new(Rows::new(
            vec!["a".to_string()],
            vec![vec![Value::Integer(1)]],
            vec![DataType::Integer],
        )));
        let insert = stream.push(Box::new(TableInsert::new(rows, "t")));
        stream.set_root(insert);

        let iter = stream.open_root(&ctx, &params).unwrap();
        let mut seen = Vec::new();
        run(iter, |row| {
            assert!(row.key.is_some());
            seen.push(row.get("a").cloned().unwrap());
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec![Value::Integer(1)]);
    }

    #[test]
    fn table_insert_duplicate_primary_key_fails() {
        let (engine, catalog) = fixture();
        create_table(&engine, &catalog);

        let token = CancellationToken::new();
        let txn = engine.begin(true, &token).unwrap();
        let cat_txn = catalog.begin(true);
        let ctx = ExecCtx {
            txn: txn.as_ref(),
            catalog: &cat_txn,
            token: token.clone(),
        };
        let params = Arc::new(Params::default());

        let mut stream = Stream::new();
        let rows = stream.push(Box::new(Rows::new(
            vec!["a".to_string()],
            vec![vec![Value::Integer(1)], vec![Value::Integer(1)]],
            vec![DataType::Integer],
        )));
        let insert = stream.push(Box::new(TableInsert::new(rows, "t")));
        stream.set_root(insert);

        let iter = stream.open_root(&ctx, &params).unwrap();
        let err = run(iter, |_| Ok(())).unwrap_err();
        assert!(matches!(err, Error::PrimaryKeyAlreadyExists));
    }
}
