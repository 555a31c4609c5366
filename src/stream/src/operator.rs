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

//! The pull-based operator pipeline (C8, spec §4.8): an arena-indexed
//! `Stream` of operators, each exposing a pull [`RowIter`].
//!
//! Grounded on the `Executor` trait in risingwave's
//! `src/batch/src/executor/mod.rs` (`open`/`next`/`close`/`identity`), the
//! batch-executor idiom rather than that repo's push/async streaming
//! dataflow, since this pipeline is a one-shot pull computation run inside
//! a single transaction (spec §4.8, §9), not a long-lived continuous
//! streaming graph. `Prev`/`Next` are `Option<OperatorId>` indices into an
//! arena owned by `Stream`, per spec §9's design note on representing the
//! cyclic links without reference counting.

use std::sync::Arc;

use reldb_common::env::{Environment, Params};
use reldb_common::expr::EnvLike;
use reldb_common::row::Row;
use reldb_common::value::Value;
use reldb_common::CancellationToken;
use reldb_storage::catalog::CatalogTransaction;
use reldb_storage::kv::Transaction;

use crate::error::{Error, Result};

/// Per-transaction context threaded through every operator's iterator: the
/// current transaction and catalog (C6), plus the cancellation token
/// polled before each `Next` (spec §5).
pub struct ExecCtx<'a> {
    pub txn: &'a dyn Transaction,
    pub catalog: &'a CatalogTransaction,
    pub token: CancellationToken,
}

/// The root evaluation context (C6): transaction/catalog plus bind
/// parameters, with no current row. Used by leaf sources evaluating a
/// [`reldb_common::range::RangeExpr`] against parameters alone (spec §4.7).
pub type RowEnv<'a> = Environment<'a, ExecCtx<'a>>;

/// Builds the root environment for one pipeline execution.
pub fn root_env<'a>(ctx: &'a ExecCtx<'a>, params: &Arc<Params>) -> RowEnv<'a> {
    Environment::root(Some(ctx), params.clone())
}

/// Scopes column and bind-parameter lookup to a single, freshly pulled row
/// (C6, spec §4.6, §4.8).
///
/// A row flowing through the pipeline is owned per `next()` call and does
/// not live as long as the pipeline's own transaction-scoped lifetime, so
/// it cannot be threaded through [`Environment::with_row`] (which requires
/// the row to share the environment's own lifetime parameter). Mirrors the
/// same narrow, no-outer-scope environment `reldb_storage::table` keeps
/// private for its DEFAULT/CHECK evaluation.
pub struct RowScope<'r> {
    pub row: &'r Row,
    pub params: Arc<Params>,
}

impl EnvLike for RowScope<'_> {
    fn column(&self, name: &str) -> Option<Value> {
        self.row.get(name).cloned()
    }

    fn positional_param(&self, index: usize) -> Option<Value> {
        self.params.positional(index)
    }

    fn named_param(&self, name: &str) -> Option<Value> {
        self.params.named(name)
    }
}

/// Pull iteration surface (§6 "Iterator" contract): `next` yields rows
/// until exhausted; `close` is idempotent and is always invoked by
/// [`run`] once iteration ends, successfully or not (spec §4.8, §9).
pub trait RowIter {
    fn next(&mut self) -> Result<Option<Row>>;

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

pub type BoxedRowIter<'a> = Box<dyn RowIter + 'a>;

/// A zero-argument iterator with no rows, used by operators whose input
/// produced nothing worth iterating (e.g. an empty `Rows` source).
pub struct EmptyIter;

impl RowIter for EmptyIter {
    fn next(&mut self) -> Result<Option<Row>> {
        Ok(None)
    }
}

/// A node in the pipeline arena.
///
/// `inputs` reports the operator's upstream dependency (dataflow), which
/// doubles as the structural `Prev` link spec §9 describes; `Next` is
/// derived by scanning for a node whose `inputs` names this one, rather
/// than tracked as separate redundant state.
pub trait OperatorNode: std::fmt::Debug {
    fn inputs(&self) -> Vec<OperatorId>;

    /// Rewires this node's sole upstream input. Sources and multi-input
    /// operators (`Union`, `Concat`) override this to panic — the splice
    /// utilities below are only meaningful for single-input operators.
    fn set_upstream(&mut self, new: OperatorId) {
        let _ = new;
        panic!("{self:?} does not support upstream rewiring");
    }

    fn open<'a>(
        &'a self,
        stream: &'a Stream,
        ctx: &'a ExecCtx<'a>,
        params: &Arc<Params>,
    ) -> Result<BoxedRowIter<'a>>;

    /// One fragment of the explain string (spec §4.8); multi-input nodes
    /// recurse into `stream.explain(..)` for each branch.
    fn display(&self, stream: &Stream) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OperatorId(usize);

/// The arena owning every operator in a compiled pipeline, plus the
/// `InsertBefore`/`InsertAfter`/`Remove` splice utilities spec §9 calls for.
#[derive(Default)]
pub struct Stream {
    nodes: Vec<Box<dyn OperatorNode>>,
    root: Option<OperatorId>,
}

impl Stream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node to the arena and makes it the new root (the sink end
    /// the caller will pull from); building a pipeline left-to-right via
    /// repeated `push` calls naturally ends with the sink as root.
    pub fn push(&mut self, node: Box<dyn OperatorNode>) -> OperatorId {
        let id = OperatorId(self.nodes.len());
        self.nodes.push(node);
        self.root = Some(id);
        id
    }

    pub fn node(&self, id: OperatorId) -> &dyn OperatorNode {
        self.nodes[id.0].as_ref()
    }

    pub fn root(&self) -> Option<OperatorId> {
        self.root
    }

    pub fn set_root(&mut self, id: OperatorId) {
        self.root = Some(id);
    }

    fn consumers_of(&self, id: OperatorId) -> Vec<OperatorId> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.inputs().contains(&id))
            .map(|(i, _)| OperatorId(i))
            .collect()
    }

    /// Splices `new` immediately upstream of `at`: `at`'s former input
    /// becomes `new`'s input, and `at` now pulls from `new` (spec §4.8
    /// `InsertBefore`).
    pub fn insert_before(&mut self, at: OperatorId, new: OperatorId) {
        if let Some(&old_input) = self.node(at).inputs().first() {
            self.nodes[new.0].set_upstream(old_input);
        }
        self.nodes[at.0].set_upstream(new);
    }

    /// Splices `new` immediately downstream of `at`: every node that
    /// previously pulled from `at` now pulls from `new`, and `new` pulls
    /// from `at` (spec §4.8 `InsertAfter`).
    pub fn insert_after(&mut self, at: OperatorId, new: OperatorId) {
        self.nodes[new.0].set_upstream(at);
        for consumer in self.consumers_of(at) {
            if consumer != new {
                self.nodes[consumer.0].set_upstream(new);
            }
        }
        if self.root == Some(at) {
            self.root = Some(new);
        }
    }

    /// Splices `id` out of the pipeline: every consumer of `id` now pulls
    /// directly from `id`'s own input (spec §4.8 `Remove`).
    pub fn remove(&mut self, id: OperatorId) {
        let input = self.node(id).inputs().first().copied();
        for consumer in self.consumers_of(id) {
            if let Some(input) = input {
                self.nodes[consumer.0].set_upstream(input);
            }
        }
        if self.root == Some(id) {
            self.root = input;
        }
    }

    /// Opens a pull iterator rooted at `id`.
    pub fn open<'a>(
        &'a self,
        id: OperatorId,
        ctx: &'a ExecCtx<'a>,
        params: &Arc<Params>,
    ) -> Result<BoxedRowIter<'a>> {
        self.node(id).open(self, ctx, params)
    }

    /// Opens a pull iterator rooted at the pipeline's current root (the
    /// sink end, if one has been built).
    pub fn open_root<'a>(&'a self, ctx: &'a ExecCtx<'a>, params: &Arc<Params>) -> Result<BoxedRowIter<'a>> {
        let root = self
            .root
            .expect("Stream::open_root called on a pipeline with no operators");
        self.open(root, ctx, params)
    }

    /// Explain text for the sub-pipeline rooted at `id`: the pipe-joined
    /// string of each operator along its single-input chain (spec §4.8).
    pub fn explain(&self, id: OperatorId) -> String {
        let node = self.node(id);
        match node.inputs().as_slice() {
            [] => node.display(self),
            [only] => format!("{} | {}", self.explain(*only), node.display(self)),
            _ => node.display(self),
        }
    }

    /// Full explain text for the pipeline, rooted at the current root.
    pub fn to_explain_string(&self) -> String {
        match self.root {
            Some(id) => self.explain(id),
            None => String::new(),
        }
    }
}

/// The outer iteration boundary (spec §4.8, §7): drives `iter` to
/// exhaustion, calling `each` per row, and is the one place
/// [`Error::StreamClosed`] is absorbed rather than propagated. Every other
/// error surfaces unchanged; `close` always runs, even on error.
pub fn run(mut iter: BoxedRowIter<'_>, mut each: impl FnMut(Row) -> Result<()>) -> Result<()> {
    let result = (|| loop {
        match iter.next() {
            Ok(Some(row)) => each(row)?,
            Ok(None) => return Ok(()),
            Err(e) if e.is_stream_closed() => return Ok(()),
            Err(e) => return Err(e),
        }
    })();
    let close_result = iter.close();
    result.and(close_result)
}

pub(crate) fn stream_closed() -> Error {
    Error::StreamClosed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Rows;
    use crate::transform::Filter;
    use reldb_common::expr::{Column, Lit};
    use reldb_common::schema::DataType;
    use reldb_common::value::Value;
    use reldb_storage::catalog::Catalog;
    use reldb_storage::kv::memory::MemoryEngine;
    use reldb_storage::kv::Engine;

    fn ctx_fixture() -> (MemoryEngine, Catalog) {
        (MemoryEngine::new(), Catalog::new())
    }

    #[test]
    fn explain_pipe_joins_operators() {
        let mut stream = Stream::new();
        let rows = stream.push(Box::new(Rows::new(
            vec!["a".to_string()],
            vec![vec![Value::Integer(1)]],
            vec![DataType::Integer],
        )));
        let filter = stream.push(Box::new(Filter::new(
            rows,
            Box::new(reldb_common::expr::Lit(Value::Boolean(true))),
        )));
        stream.set_root(filter);
        assert_eq!(stream.to_explain_string(), "Rows | Filter(true)");
    }

    #[test]
    fn insert_before_splices_new_upstream() {
        let mut stream = Stream::new();
        let rows = stream.push(Box::new(Rows::new(
            vec!["a".to_string()],
            vec![vec![Value::Integer(1)]],
            vec![DataType::Integer],
        )));
        let filter_a = stream.push(Box::new(Filter::new(
            rows,
            Box::new(Lit(Value::Boolean(true))),
        )));
        stream.set_root(filter_a);

        let filter_b = stream.push(Box::new(Filter::new(
            rows, // placeholder input, rewired by insert_before
            Box::new(Column("a".to_string())),
        )));
        stream.insert_before(filter_a, filter_b);
        assert_eq!(stream.node(filter_a).inputs(), vec![filter_b]);
        assert_eq!(stream.node(filter_b).inputs(), vec![rows]);
    }

    #[test]
    fn run_drains_to_completion() {
        let (engine, catalog) = ctx_fixture();
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
        let rows = stream.push(Box::new(Rows::new(
            vec!["a".to_string()],
            vec![vec![Value::Integer(1)], vec![Value::Integer(2)]],
            vec![DataType::Integer],
        )));
        stream.set_root(rows);

        let iter = stream.open_root(&ctx, &params).unwrap();
        let mut seen = Vec::new();
        run(iter, |row| {
            seen.push(row.get("a").cloned().unwrap());
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec![Value::Integer(1), Value::Integer(2)]);
    }
}
