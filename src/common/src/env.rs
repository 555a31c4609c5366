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

//! Per-row evaluation context (C6, spec §4.6).
//!
//! `Environment` is generic over a `Ctx` type rather than hard-wiring a
//! transaction/catalog type here, the way `reldb_storage`'s `StateTable<S:
//! StateStore>` is generic over its backend (`src/storage/src/table/state_table.rs`
//! in the teacher): `reldb_common` has no business knowing about
//! transactions or catalogs, but stream operators do need to reach them, so
//! the context is threaded through as an opaque reference.

use std::sync::Arc;

use crate::expr::EnvLike;
use crate::row::Row;
use crate::value::Value;

/// Positional and named bind parameters (spec §4.6).
#[derive(Debug, Clone, Default)]
pub struct Params {
    positional: Vec<Value>,
    named: Vec<(String, Value)>,
}

impl Params {
    pub fn new(positional: Vec<Value>, named: Vec<(String, Value)>) -> Self {
        Self { positional, named }
    }

    pub fn positional(&self, index: usize) -> Option<Value> {
        self.positional.get(index).cloned()
    }

    pub fn named(&self, name: &str) -> Option<Value> {
        self.named
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
    }

    /// Clones this parameter set with one additional named binding appended.
    /// Used by `OnConflict` (spec §4.8) to augment the environment it hands
    /// its alt-stream with the conflicting row's existing primary key.
    pub fn with_named(&self, name: impl Into<String>, value: Value) -> Self {
        let mut named = self.named.clone();
        named.push((name.into(), value));
        Self {
            positional: self.positional.clone(),
            named,
        }
    }
}

/// A stack-shaped evaluation context threaded through the pipeline.
///
/// Lookup of a column resolves only against `row` (never walks `outer`: a
/// row belongs to exactly one scope). Lookup of a parameter walks outward
/// through `outer` until found (spec §4.6).
#[derive(Clone)]
pub struct Environment<'a, Ctx> {
    row: Option<&'a Row>,
    context: Option<&'a Ctx>,
    params: Arc<Params>,
    outer: Option<&'a Environment<'a, Ctx>>,
}

impl<'a, Ctx> Environment<'a, Ctx> {
    pub fn root(context: Option<&'a Ctx>, params: Arc<Params>) -> Self {
        Self {
            row: None,
            context,
            params,
            outer: None,
        }
    }

    pub fn with_row(&'a self, row: &'a Row) -> Self {
        Self {
            row: Some(row),
            context: self.context,
            params: self.params.clone(),
            outer: Some(self),
        }
    }

    pub fn row(&self) -> Option<&'a Row> {
        self.row
    }

    pub fn context(&self) -> Option<&'a Ctx> {
        self.context.or_else(|| self.outer.and_then(|o| o.context()))
    }
}

impl<Ctx> EnvLike for Environment<'_, Ctx> {
    fn column(&self, name: &str) -> Option<Value> {
        self.row.and_then(|r| r.get(name)).cloned()
    }

    fn positional_param(&self, index: usize) -> Option<Value> {
        self.params
            .positional(index)
            .or_else(|| self.outer.and_then(|o| o.positional_param(index)))
    }

    fn named_param(&self, name: &str) -> Option<Value> {
        self.params
            .named(name)
            .or_else(|| self.outer.and_then(|o| o.named_param(name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_lookup_does_not_walk_outer() {
        let params = Arc::new(Params::default());
        let root: Environment<'_, ()> = Environment::root(None, params);
        let row = Row::new(vec![("a".to_string(), Value::Integer(1))]);
        let child = root.with_row(&row);
        assert_eq!(child.column("a"), Some(Value::Integer(1)));
        assert_eq!(root.column("a"), None);
    }

    #[test]
    fn param_lookup_walks_outward() {
        let params = Arc::new(Params::new(vec![Value::Integer(7)], vec![]));
        let root: Environment<'_, ()> = Environment::root(None, params);
        let row = Row::default();
        let child = root.with_row(&row);
        assert_eq!(child.positional_param(0), Some(Value::Integer(7)));
    }
}
