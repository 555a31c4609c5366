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

//! `OnConflict` (spec §4.8): wraps a sink and reacts to a constraint
//! violation instead of letting it abort the pipeline.

use std::collections::VecDeque;
use std::sync::Arc;

use reldb_common::env::Params;
use reldb_common::row::Row;
use reldb_common::value::Value;

use crate::error::{Error, Result};
use crate::operator::{ExecCtx, OperatorId, OperatorNode, RowIter, Stream};

/// Named bind parameter `OnConflict` augments its alt-stream's environment
/// with: the conflicting row's existing encoded primary key, as a `Blob`
/// (spec §4.8 "augmented by the conflicting row's existing primary key").
/// Only a unique-index conflict carries this key (`Error::UniqueConstraintViolated`);
/// a bare duplicate-primary-key conflict does not, so the alt-stream runs
/// without it in that case (spec §7's `is_conflict` carve-out).
pub const CONFLICT_KEY_PARAM: &str = "__on_conflict_key";

/// Wraps `input` — typically a table/index sink chain — and catches any
/// constraint violation it raises (spec §4.8, §7 `Error::is_conflict`).
/// With no `alt`, the error is suppressed and iteration resumes at the next
/// upstream row. With an `alt`, that sub-pipeline runs once per conflict,
/// its own environment augmented via [`CONFLICT_KEY_PARAM`], and its output
/// rows (if any) are spliced into this operator's own output before
/// resuming upstream — this is how UPDATE-on-conflict semantics compose
/// out of an ordinary replace pipeline rather than needing its own sink
/// variant.
pub struct OnConflict {
    input: OperatorId,
    alt: Option<OperatorId>,
}

impl std::fmt::Debug for OnConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OnConflict(alt={:?})", self.alt)
    }
}

impl OnConflict {
    pub fn new(input: OperatorId, alt: Option<OperatorId>) -> Self {
        Self { input, alt }
    }
}

impl OperatorNode for OnConflict {
    fn inputs(&self) -> Vec<OperatorId> {
        let mut ids = vec![self.input];
        ids.extend(self.alt);
        ids
    }

    fn open<'a>(
        &'a self,
        stream: &'a Stream,
        ctx: &'a ExecCtx<'a>,
        params: &Arc<Params>,
    ) -> Result<Box<dyn RowIter + 'a>> {
        let upstream = stream.open(self.input, ctx, params)?;
        Ok(Box::new(OnConflictIter {
            upstream,
            stream,
            ctx,
            alt: self.alt,
            params: params.clone(),
            pending: VecDeque::new(),
        }))
    }

    fn display(&self, stream: &Stream) -> String {
        match self.alt {
            Some(alt) => format!("OnConflict({} | {})", stream.explain(self.input), stream.explain(alt)),
            None => format!("OnConflict({})", stream.explain(self.input)),
        }
    }
}

struct OnConflictIter<'a> {
    upstream: Box<dyn RowIter + 'a>,
    stream: &'a Stream,
    ctx: &'a ExecCtx<'a>,
    alt: Option<OperatorId>,
    params: Arc<Params>,
    pending: VecDeque<Row>,
}

impl OnConflictIter<'_> {
    /// Runs the alt-stream once, if one is configured, and buffers its rows
    /// into `pending`. A no-op when `alt` is `None` — the conflict is simply
    /// suppressed by the caller's loop (spec §4.8 "DO NOTHING").
    fn run_alt(&mut self, conflicting_key: Option<Vec<u8>>) -> Result<()> {
        let Some(alt) = self.alt else { return Ok(()) };
        let augmented = match conflicting_key {
            Some(key) => Arc::new(self.params.with_named(CONFLICT_KEY_PARAM, Value::Blob(key))),
            None => self.params.clone(),
        };
        let mut iter = self.stream.open(alt, self.ctx, &augmented)?;
        let result = (|| -> Result<()> {
            while let Some(row) = iter.next()? {
                self.pending.push_back(row);
            }
            Ok(())
        })();
        iter.close()?;
        result
    }
}

impl RowIter for OnConflictIter<'_> {
    fn next(&mut self) -> Result<Option<Row>> {
        loop {
            if let Some(row) = self.pending.pop_front() {
                return Ok(Some(row));
            }
            match self.upstream.next() {
                Ok(row) => return Ok(row),
                Err(e) if e.is_conflict() => {
                    let conflicting_key = match &e {
                        Error::UniqueConstraintViolated { conflicting_key, .. } => Some(conflicting_key.clone()),
                        _ => None,
                    };
                    self.run_alt(conflicting_key)?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        self.upstream.close()
    }
}
