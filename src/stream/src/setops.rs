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

//! Multi-input set operators (spec §4.8): `Union`, `Concat`. Both take an
//! arbitrary number of upstream branches, so neither supports the
//! single-input `set_upstream` rewiring the splice utilities rely on (the
//! default `OperatorNode::set_upstream` panic is left in place, per its own
//! doc comment).

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use itertools::Itertools;
use reldb_common::codec::encode_key;
use reldb_common::env::Params;
use reldb_common::row::Row;

use crate::error::Result;
use crate::operator::{ExecCtx, OperatorId, OperatorNode, RowIter, Stream};
use crate::source::RowQueueIter;

/// Deduplicated concatenation of its branches (spec §4.8 `Union`):
/// materializes every branch into a transient ordered set keyed by the full
/// row's order-preserving encoding, so output order is the set's key order
/// rather than input-arrival order, and a row appearing in more than one
/// branch (or more than once within a branch) surfaces exactly once.
pub struct Union {
    inputs: Vec<OperatorId>,
}

impl std::fmt::Debug for Union {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Union({} branch(es))", self.inputs.len())
    }
}

impl Union {
    pub fn new(inputs: Vec<OperatorId>) -> Self {
        Self { inputs }
    }
}

impl OperatorNode for Union {
    fn inputs(&self) -> Vec<OperatorId> {
        self.inputs.clone()
    }

    fn open<'a>(
        &'a self,
        stream: &'a Stream,
        ctx: &'a ExecCtx<'a>,
        params: &Arc<Params>,
    ) -> Result<Box<dyn RowIter + 'a>> {
        let mut dedup: BTreeMap<Vec<u8>, Row> = BTreeMap::new();
        for &input in &self.inputs {
            let mut iter = stream.open(input, ctx, params)?;
            let result = (|| -> Result<()> {
                while let Some(row) = iter.next()? {
                    let key = encode_key(&row.values().cloned().collect_vec());
                    dedup.entry(key).or_insert(row);
                }
                Ok(())
            })();
            iter.close()?;
            result?;
        }
        let rows: VecDeque<Row> = dedup.into_values().collect();
        Ok(Box::new(RowQueueIter { rows }))
    }

    fn display(&self, stream: &Stream) -> String {
        let branches: Vec<String> = self.inputs.iter().map(|&id| stream.explain(id)).collect();
        format!("Union({})", branches.join(", "))
    }
}

/// Raw concatenation of its branches with no deduplication (spec §4.8
/// `Concat`): a lazy chain, pulling each branch to exhaustion in turn
/// before moving to the next.
pub struct Concat {
    inputs: Vec<OperatorId>,
}

impl std::fmt::Debug for Concat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Concat({} branch(es))", self.inputs.len())
    }
}

impl Concat {
    pub fn new(inputs: Vec<OperatorId>) -> Self {
        Self { inputs }
    }
}

impl OperatorNode for Concat {
    fn inputs(&self) -> Vec<OperatorId> {
        self.inputs.clone()
    }

    fn open<'a>(
        &'a self,
        stream: &'a Stream,
        ctx: &'a ExecCtx<'a>,
        params: &Arc<Params>,
    ) -> Result<Box<dyn RowIter + 'a>> {
        let iters: VecDeque<Box<dyn RowIter + 'a>> = self
            .inputs
            .iter()
            .map(|&id| stream.open(id, ctx, params))
            .collect::<Result<_>>()?;
        Ok(Box::new(ConcatIter { iters }))
    }

    fn display(&self, stream: &Stream) -> String {
        let branches: Vec<String> = self.inputs.iter().map(|&id| stream.explain(id)).collect();
        format!("Concat({})", branches.join(", "))
    }
}

struct ConcatIter<'a> {
    iters: VecDeque<Box<dyn RowIter + 'a>>,
}

impl RowIter for ConcatIter<'_> {
    fn next(&mut self) -> Result<Option<Row>> {
        while let Some(front) = self.iters.front_mut() {
            match front.next()? {
                Some(row) => return Ok(Some(row)),
                None => {
                    self.iters.pop_front().expect("front_mut just succeeded").close()?;
                }
            }
        }
        Ok(None)
    }

    fn close(&mut self) -> Result<()> {
        let mut result = Ok(());
        for mut iter in self.iters.drain(..) {
            result = result.and(iter.close());
        }
        result
    }
}
