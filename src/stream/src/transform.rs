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

//! Single-input row transforms (spec §4.8): `Filter`, `Take`, `Skip`,
//! `Rename`, `Set`, `Unset`, `Project`.

use std::sync::Arc;

use reldb_common::env::Params;
use reldb_common::expr::BoxedExpr;
use reldb_common::row::Row;

use crate::error::{Error, Result};
use crate::operator::{ExecCtx, OperatorId, OperatorNode, RowIter, RowScope, Stream};

/// Keeps only rows for which `predicate` evaluates truthy (spec §4.8 `Filter`).
pub struct Filter {
    input: OperatorId,
    predicate: BoxedExpr,
}

impl std::fmt::Debug for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Filter({})", self.predicate.string())
    }
}

impl Filter {
    pub fn new(input: OperatorId, predicate: BoxedExpr) -> Self {
        Self { input, predicate }
    }
}

impl OperatorNode for Filter {
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
        Ok(Box::new(FilterIter {
            upstream,
            predicate: &self.predicate,
            params: params.clone(),
        }))
    }

    fn display(&self, _stream: &Stream) -> String {
        format!("Filter({})", self.predicate.string())
    }
}

struct FilterIter<'a> {
    upstream: Box<dyn RowIter + 'a>,
    predicate: &'a BoxedExpr,
    params: Arc<Params>,
}

impl RowIter for FilterIter<'_> {
    fn next(&mut self) -> Result<Option<Row>> {
        loop {
            let Some(row) = self.upstream.next()? else {
                return Ok(None);
            };
            let scope = RowScope {
                row: &row,
                params: self.params.clone(),
            };
            if self.predicate.eval(&scope)?.truthy() {
                return Ok(Some(row));
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        self.upstream.close()
    }
}

/// Yields at most `count` rows, then stops (spec §4.8 `Take`).
///
/// A negative or zero `count` yields nothing without ever pulling upstream.
/// Once satisfied, the upstream is closed eagerly and any further `next`
/// call returns [`Error::StreamClosed`] rather than repeating `Ok(None)` —
/// the one place this crate raises that sentinel itself, rather than
/// merely propagating it (spec §4.8, §9).
pub struct Take {
    input: OperatorId,
    count: i64,
}

impl std::fmt::Debug for Take {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Take({})", self.count)
    }
}

impl Take {
    pub fn new(input: OperatorId, count: i64) -> Self {
        Self { input, count }
    }
}

impl OperatorNode for Take {
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
        let remaining = self.count.max(0) as usize;
        let upstream = if remaining > 0 {
            Some(stream.open(self.input, ctx, params)?)
        } else {
            None
        };
        Ok(Box::new(TakeIter {
            upstream,
            remaining,
            exhausted: false,
        }))
    }

    fn display(&self, _stream: &Stream) -> String {
        format!("Take({})", self.count)
    }
}

struct TakeIter<'a> {
    upstream: Option<Box<dyn RowIter + 'a>>,
    remaining: usize,
    exhausted: bool,
}

impl RowIter for TakeIter<'_> {
    fn next(&mut self) -> Result<Option<Row>> {
        if self.exhausted {
            return Err(Error::StreamClosed);
        }
        if self.remaining == 0 {
            self.exhausted = true;
            return Ok(None);
        }
        let Some(upstream) = self.upstream.as_mut() else {
            self.exhausted = true;
            return Ok(None);
        };
        match upstream.next()? {
            Some(row) => {
                self.remaining -= 1;
                if self.remaining == 0 {
                    self.close()?;
                }
                Ok(Some(row))
            }
            None => {
                self.exhausted = true;
                Ok(None)
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        self.exhausted = true;
        match self.upstream.take() {
            Some(mut upstream) => upstream.close(),
            None => Ok(()),
        }
    }
}

/// Discards the first `count` rows, then yields the rest (spec §4.8 `Skip`).
/// A negative count is treated as zero.
pub struct Skip {
    input: OperatorId,
    count: i64,
}

impl std::fmt::Debug for Skip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Skip({})", self.count)
    }
}

impl Skip {
    pub fn new(input: OperatorId, count: i64) -> Self {
        Self { input, count }
    }
}

impl OperatorNode for Skip {
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
        Ok(Box::new(SkipIter {
            upstream,
            remaining: self.count.max(0) as usize,
        }))
    }

    fn display(&self, _stream: &Stream) -> String {
        format!("Skip({})", self.count)
    }
}

struct SkipIter<'a> {
    upstream: Box<dyn RowIter + 'a>,
    remaining: usize,
}

impl RowIter for SkipIter<'_> {
    fn next(&mut self) -> Result<Option<Row>> {
        while self.remaining > 0 {
            match self.upstream.next()? {
                Some(_) => self.remaining -= 1,
                None => return Ok(None),
            }
        }
        self.upstream.next()
    }

    fn close(&mut self) -> Result<()> {
        self.upstream.close()
    }
}

/// Renames every column positionally (spec §4.8 `Rename`); fails with
/// [`reldb_common::Error::RenameArityMismatch`] on the first row whose
/// arity disagrees.
pub struct Rename {
    input: OperatorId,
    names: Vec<String>,
}

impl std::fmt::Debug for Rename {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Rename({})", self.names.join(", "))
    }
}

impl Rename {
    pub fn new(input: OperatorId, names: Vec<String>) -> Self {
        Self { input, names }
    }
}

impl OperatorNode for Rename {
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
        Ok(Box::new(RenameIter {
            upstream,
            names: &self.names,
        }))
    }

    fn display(&self, _stream: &Stream) -> String {
        format!("Rename({})", self.names.join(", "))
    }
}

struct RenameIter<'a> {
    upstream: Box<dyn RowIter + 'a>,
    names: &'a [String],
}

impl RowIter for RenameIter<'_> {
    fn next(&mut self) -> Result<Option<Row>> {
        let Some(mut row) = self.upstream.next()? else {
            return Ok(None);
        };
        row.rename(self.names)?;
        Ok(Some(row))
    }

    fn close(&mut self) -> Result<()> {
        self.upstream.close()
    }
}

/// Overwrites (or appends) one or more columns, each evaluated against the
/// row as pulled from upstream (spec §4.8 `Set`). An assignment whose
/// expression fails with `Error::ColumnNotFound` is a no-op for that column
/// rather than a pipeline error (spec §4.8); every other evaluation error
/// still aborts iteration.
pub struct Set {
    input: OperatorId,
    assignments: Vec<(String, BoxedExpr)>,
}

impl std::fmt::Debug for Set {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .assignments
            .iter()
            .map(|(n, e)| format!("{n} = {}", e.string()))
            .collect();
        write!(f, "Set({})", parts.join(", "))
    }
}

impl Set {
    pub fn new(input: OperatorId, assignments: Vec<(String, BoxedExpr)>) -> Self {
        Self { input, assignments }
    }
}

impl OperatorNode for Set {
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
        Ok(Box::new(SetIter {
            upstream,
            assignments: &self.assignments,
            params: params.clone(),
        }))
    }

    fn display(&self, stream: &Stream) -> String {
        let _ = stream;
        format!("{self:?}")
    }
}

struct SetIter<'a> {
    upstream: Box<dyn RowIter + 'a>,
    assignments: &'a [(String, BoxedExpr)],
    params: Arc<Params>,
}

impl RowIter for SetIter<'_> {
    fn next(&mut self) -> Result<Option<Row>> {
        let Some(mut row) = self.upstream.next()? else {
            return Ok(None);
        };
        let scope = RowScope {
            row: &row,
            params: self.params.clone(),
        };
        let mut computed = Vec::with_capacity(self.assignments.len());
        for (name, expr) in self.assignments {
            match expr.eval(&scope) {
                Ok(value) => computed.push((name.clone(), value)),
                Err(Error::ColumnNotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        drop(scope);
        for (name, value) in computed {
            row.set(&name, value);
        }
        Ok(Some(row))
    }

    fn close(&mut self) -> Result<()> {
        self.upstream.close()
    }
}

/// Removes zero or more columns; absent names are a no-op (spec §4.8 `Unset`).
pub struct Unset {
    input: OperatorId,
    names: Vec<String>,
}

impl std::fmt::Debug for Unset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Unset({})", self.names.join(", "))
    }
}

impl Unset {
    pub fn new(input: OperatorId, names: Vec<String>) -> Self {
        Self { input, names }
    }
}

impl OperatorNode for Unset {
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
        Ok(Box::new(UnsetIter {
            upstream,
            names: &self.names,
        }))
    }

    fn display(&self, _stream: &Stream) -> String {
        format!("Unset({})", self.names.join(", "))
    }
}

struct UnsetIter<'a> {
    upstream: Box<dyn RowIter + 'a>,
    names: &'a [String],
}

impl RowIter for UnsetIter<'_> {
    fn next(&mut self) -> Result<Option<Row>> {
        let Some(mut row) = self.upstream.next()? else {
            return Ok(None);
        };
        for name in self.names {
            row.unset(name);
        }
        Ok(Some(row))
    }

    fn close(&mut self) -> Result<()> {
        self.upstream.close()
    }
}

/// Computes a new row from a list of `(alias, expression)` pairs,
/// discarding every other column; an absent alias defaults to the
/// expression's canonical text (spec §4.8 `Project`). The row's carried
/// key, if any, passes through unchanged so a projection upstream of a
/// `TableReplace`/`TableDelete` sink still addresses the right row.
pub struct Project {
    input: OperatorId,
    exprs: Vec<(Option<String>, BoxedExpr)>,
}

impl std::fmt::Debug for Project {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Project({})", self.column_names().join(", "))
    }
}

impl Project {
    pub fn new(input: OperatorId, exprs: Vec<(Option<String>, BoxedExpr)>) -> Self {
        Self { input, exprs }
    }

    fn column_names(&self) -> Vec<String> {
        self.exprs
            .iter()
            .map(|(alias, e)| alias.clone().unwrap_or_else(|| e.string()))
            .collect()
    }
}

impl OperatorNode for Project {
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
        Ok(Box::new(ProjectIter {
            upstream,
            exprs: &self.exprs,
            params: params.clone(),
        }))
    }

    fn display(&self, _stream: &Stream) -> String {
        format!("Project({})", self.column_names().join(", "))
    }
}

struct ProjectIter<'a> {
    upstream: Box<dyn RowIter + 'a>,
    exprs: &'a [(Option<String>, BoxedExpr)],
    params: Arc<Params>,
}

impl RowIter for ProjectIter<'_> {
    fn next(&mut self) -> Result<Option<Row>> {
        let Some(row) = self.upstream.next()? else {
            return Ok(None);
        };
        let scope = RowScope {
            row: &row,
            params: self.params.clone(),
        };
        let columns = self
            .exprs
            .iter()
            .map(|(alias, expr)| {
                let value = expr.eval(&scope)?;
                let name = alias.clone().unwrap_or_else(|| expr.string());
                Ok((name, value))
            })
            .collect::<Result<Vec<_>>>()?;
        drop(scope);
        Ok(Some(match &row.key {
            Some(key) => Row::with_key(columns, key.clone()),
            None => Row::new(columns),
        }))
    }

    fn close(&mut self) -> Result<()> {
        self.upstream.close()
    }
}
