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

//! The driver adapter surface (spec §6): `Database.connect() -> Connection`,
//! `Connection.beginTx(readOnly) -> Transaction`, `Connection.prepare(sql)
//! -> Statement`, `Statement.bind(params)`/`.exec()`/`.query() -> Rows`.
//!
//! `Statement` takes a pre-built [`Stream`] rather than SQL text: the core
//! does not parse or plan (spec §1, §6 "parser/planner contract") — the
//! planner is an external collaborator that hands the core a finished
//! pipeline.

use std::sync::Arc;

use reldb_common::env::Params;
use reldb_common::CancellationToken;
use reldb_storage::catalog::{Catalog, CatalogTransaction};
use reldb_storage::kv::{BoxedEngine, BoxedTransaction};
use reldb_stream::{run, ExecCtx, Stream};
use thiserror_ext::AsReport;
use tracing::{debug, warn};

use crate::error::Result;
use crate::result::Rows;

/// An open engine plus its catalog — the top-level handle an embedder
/// constructs once and shares across connections (spec §6).
pub struct Database {
    engine: BoxedEngine,
    catalog: Catalog,
}

impl Database {
    pub fn open(engine: BoxedEngine) -> Self {
        Self {
            engine,
            catalog: Catalog::new(),
        }
    }

    pub fn connect(&self) -> Connection<'_> {
        Connection { database: self }
    }

    pub fn is_closed(&self) -> bool {
        self.engine.is_closed()
    }

    pub fn close(&self) {
        self.engine.close()
    }
}

/// A lightweight handle used to open transactions and prepare statements;
/// cheap to create and drop (spec §6's `Connection`).
pub struct Connection<'a> {
    database: &'a Database,
}

impl Connection<'_> {
    /// Opens a transaction in read or write mode, blocking under the
    /// engine's reader/writer exclusion (spec §5) until it may proceed.
    pub fn begin_tx(&self, read_only: bool, token: &CancellationToken) -> Result<Transaction> {
        let txn = self.database.engine.begin(!read_only, token)?;
        let catalog_txn = self.database.catalog.begin(!read_only);
        debug!(read_only, "transaction begun");
        Ok(Transaction {
            txn,
            catalog_txn,
            token: token.clone(),
        })
    }

    /// Wraps an already-built pipeline as a bindable, re-runnable
    /// [`Statement`]. The core does not compile SQL text (spec §1).
    pub fn prepare(&self, stream: Stream) -> Statement {
        Statement {
            stream,
            params: Arc::new(Params::default()),
        }
    }
}

/// An open transaction (spec §4.2, §6): owns both the KV transaction and
/// the catalog's transactional view, since every DML pipeline needs both
/// to build an [`ExecCtx`].
pub struct Transaction {
    txn: BoxedTransaction,
    catalog_txn: CatalogTransaction,
    token: CancellationToken,
}

impl Transaction {
    /// Borrows the pieces a pipeline needs to run against this
    /// transaction. The caller holds the returned context alive for as
    /// long as it drives a [`Statement`]'s iterator — the same convention
    /// every stream operator test in `reldb_stream` follows.
    pub fn exec_ctx(&self) -> ExecCtx<'_> {
        ExecCtx {
            txn: self.txn.as_ref(),
            catalog: &self.catalog_txn,
            token: self.token.clone(),
        }
    }

    pub fn catalog(&self) -> &CatalogTransaction {
        &self.catalog_txn
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn commit(self) -> Result<()> {
        self.catalog_txn.commit()?;
        self.txn.commit().inspect_err(|e| {
            warn!(error = %e.as_report(), "transaction commit failed after catalog commit succeeded");
        })?;
        debug!("transaction committed");
        Ok(())
    }

    pub fn rollback(self) -> Result<()> {
        self.catalog_txn.rollback()?;
        self.txn.rollback().inspect_err(|e| {
            warn!(error = %e.as_report(), "transaction rollback failed after catalog rollback succeeded");
        })?;
        debug!("transaction rolled back");
        Ok(())
    }
}

/// A bindable, re-runnable pipeline (spec §6's `Statement`).
pub struct Statement {
    stream: Stream,
    params: Arc<Params>,
}

impl Statement {
    /// Replaces this statement's bound parameters (spec §4.6's positional
    /// and named bind parameters).
    pub fn bind(&mut self, params: Params) -> &mut Self {
        self.params = Arc::new(params);
        self
    }

    /// Runs the pipeline for effect, discarding every row it produces, and
    /// returns the number of rows it emitted — the usual "affected rows"
    /// count for an insert/replace/delete pipeline (spec §4.8's sinks emit
    /// one row per mutation).
    pub fn exec<'a>(&'a self, ctx: &'a ExecCtx<'a>) -> Result<u64> {
        let iter = self.stream.open_root(ctx, &self.params)?;
        let mut count = 0u64;
        run(iter, |_row| {
            count += 1;
            Ok(())
        })?;
        Ok(count)
    }

    /// Runs the pipeline and returns a [`Rows`] cursor over its output
    /// (spec §4.9).
    pub fn query<'a>(&'a self, ctx: &'a ExecCtx<'a>) -> Result<Rows<'a>> {
        let iter = self.stream.open_root(ctx, &self.params)?;
        Rows::new(iter)
    }

    /// The pipeline's explain string (spec §4.8).
    pub fn explain(&self) -> String {
        self.stream.to_explain_string()
    }
}

#[cfg(test)]
mod tests {
    use reldb_common::schema::{Column, DataType, TableInfo};
    use reldb_common::value::Value;
    use reldb_storage::kv::memory::MemoryEngine;

    use super::*;

    fn database_with_table() -> Database {
        let database = Database::open(Box::new(MemoryEngine::new()));
        let conn = database.connect();
        let token = CancellationToken::new();
        let txn = conn.begin_tx(false, &token).unwrap();
        let info = TableInfo::new(
            "t",
            vec![Column::new("a", DataType::Integer).primary_key()],
            vec!["a".to_string()],
        );
        txn.catalog().create_table(info).unwrap();
        txn.exec_ctx().txn.create_store("t").unwrap();
        txn.commit().unwrap();
        database
    }

    #[test]
    fn insert_then_query_round_trips() {
        let database = database_with_table();
        let conn = database.connect();
        let token = CancellationToken::new();

        let txn = conn.begin_tx(false, &token).unwrap();
        let mut stream = Stream::new();
        let rows = stream.push(Box::new(reldb_stream::source::Rows::new(
            vec!["a".to_string()],
            vec![vec![Value::Integer(1)], vec![Value::Integer(2)]],
            vec![DataType::Integer],
        )));
        let insert = stream.push(Box::new(reldb_stream::sink::TableInsert::new(rows, "t")));
        stream.set_root(insert);
        let mut stmt = conn.prepare(stream);
        let ctx = txn.exec_ctx();
        let affected = stmt.exec(&ctx).unwrap();
        assert_eq!(affected, 2);
        drop(ctx);
        txn.commit().unwrap();

        let txn = conn.begin_tx(true, &token).unwrap();
        let mut scan_stream = Stream::new();
        let scan = scan_stream.push(Box::new(reldb_stream::source::TableScan::new(
            "t",
            reldb_common::range::RangeExpr::unbounded(),
        )));
        scan_stream.set_root(scan);
        let scan_stmt = conn.prepare(scan_stream);
        let ctx = txn.exec_ctx();
        let mut result = scan_stmt.query(&ctx).unwrap();
        assert_eq!(result.columns(), &["a".to_string()]);
        let mut seen = Vec::new();
        let mut out = [Value::Null];
        while result.next().unwrap() {
            result.scan(&mut out).unwrap();
            seen.push(out[0].clone());
        }
        assert_eq!(seen, vec![Value::Integer(1), Value::Integer(2)]);
        result.close().unwrap();
    }

    #[test]
    fn rollback_undoes_insert() {
        let database = database_with_table();
        let conn = database.connect();
        let token = CancellationToken::new();

        let txn = conn.begin_tx(false, &token).unwrap();
        let mut stream = Stream::new();
        let rows = stream.push(Box::new(reldb_stream::source::Rows::new(
            vec!["a".to_string()],
            vec![vec![Value::Integer(1)]],
            vec![DataType::Integer],
        )));
        let insert = stream.push(Box::new(reldb_stream::sink::TableInsert::new(rows, "t")));
        stream.set_root(insert);
        let stmt = conn.prepare(stream);
        let ctx = txn.exec_ctx();
        stmt.exec(&ctx).unwrap();
        drop(ctx);
        txn.rollback().unwrap();

        let txn = conn.begin_tx(true, &token).unwrap();
        let mut scan_stream = Stream::new();
        let scan = scan_stream.push(Box::new(reldb_stream::source::TableScan::new(
            "t",
            reldb_common::range::RangeExpr::unbounded(),
        )));
        scan_stream.set_root(scan);
        let scan_stmt = conn.prepare(scan_stream);
        let ctx = txn.exec_ctx();
        let mut result = scan_stmt.query(&ctx).unwrap();
        assert!(!result.next().unwrap());
    }
}
