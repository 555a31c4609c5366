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

//! Secondary index over a table's rows (C4).
//!
//! An index's backing store holds the composite encoding of the indexed
//! columns as its key (with the owning row's primary key appended whenever
//! the entry could otherwise collide with another row's — non-unique
//! indexes always, and unique indexes too when the tuple contains a `NULL`,
//! since uniqueness is skipped for `NULL`-bearing tuples and two rows may
//! legitimately share one, so several rows sharing a tuple still get
//! distinct keys) and the owning row's encoded primary key as its value, so
//! a scan can return the primary key directly without reparsing the key
//! suffix.

use bytes::Bytes;
use reldb_common::codec::{decode_key, encode_key};
use reldb_common::range::TypedRange;
use reldb_common::schema::IndexInfo;
use reldb_common::value::Value;
use reldb_common::CancellationToken;

use crate::error::{Error, Result};
use crate::kv::{BoxedStore, KeyRange};

pub struct Index<'a> {
    info: IndexInfo,
    store: BoxedStore<'a>,
}

impl<'a> Index<'a> {
    pub fn new(info: IndexInfo, store: BoxedStore<'a>) -> Self {
        Self { info, store }
    }

    pub fn info(&self) -> &IndexInfo {
        &self.info
    }

    /// Looks up an existing entry for `tuple`'s encoded prefix, returning
    /// the owning row's primary key if present. Used both by `set`'s
    /// uniqueness check and directly by callers validating ahead of an
    /// insert (spec's `IndexValidate` sink). Seeks the underlying scan
    /// directly to the prefix's byte range (spec §4.4: "start the
    /// underlying byte scan at the min ... stop when the cursor crosses the
    /// max") rather than scanning the whole store.
    fn lookup_prefix(&self, tuple: &[Value], token: &CancellationToken) -> Result<Option<Bytes>> {
        let prefix = encode_key(tuple);
        let range = prefix_key_range(&prefix);
        let mut iter = self.store.scan(range, false, token.clone())?;
        for item in &mut iter {
            let (key, value) = item?;
            if key.len() >= prefix.len() && key[..prefix.len()] == prefix[..] {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    /// Appends `row_key` whenever the bare tuple encoding could collide
    /// between two distinct rows: always for a non-unique index, and for a
    /// unique index too when `tuple` contains a `NULL` — uniqueness is
    /// skipped for `NULL`-bearing tuples (spec §3), so two rows may
    /// legitimately share one, and without the row key appended the second
    /// `set` would silently overwrite the first entry instead of adding a
    /// second one.
    fn entry_key(&self, tuple: &[Value], row_key: &[u8]) -> Bytes {
        let mut key = encode_key(tuple);
        if !self.info.unique || tuple.iter().any(Value::is_null) {
            key.extend_from_slice(row_key);
        }
        Bytes::from(key)
    }

    /// Inserts an entry for `tuple` owned by `row_key`. Unique indexes
    /// reject a duplicate non-null tuple with [`Error::UniqueConstraintViolated`],
    /// carrying the conflicting row's key so `OnConflict` can react to it.
    /// Any indexed column being `NULL` skips the uniqueness check (SQL
    /// three-valued-logic rule).
    pub fn set(&self, tuple: &[Value], row_key: &[u8], token: &CancellationToken) -> Result<()> {
        self.check_unique(tuple, token)?;
        let key = self.entry_key(tuple, row_key);
        self.store.put(key, Bytes::copy_from_slice(row_key))
    }

    /// Runs the uniqueness check `set` performs, without writing an entry.
    /// The `IndexValidate` stream sink uses this to pre-check a unique
    /// constraint ahead of a table mutation, so `OnConflict` can react
    /// before any index state has been written (spec §4.8).
    pub fn check_unique(&self, tuple: &[Value], token: &CancellationToken) -> Result<()> {
        let has_null = tuple.iter().any(Value::is_null);
        if self.info.unique && !has_null {
            if let Some(conflicting) = self.lookup_prefix(tuple, token)? {
                return Err(Error::UniqueConstraintViolated {
                    index: self.info.name.clone(),
                    conflicting_key: conflicting.to_vec(),
                });
            }
        }
        Ok(())
    }

    /// Removes the entry for `tuple` owned by `row_key`; both are required
    /// because non-unique index keys embed the row key.
    pub fn delete(&self, tuple: &[Value], row_key: &[u8]) -> Result<()> {
        let key = self.entry_key(tuple, row_key);
        self.store.delete(&key)
    }

    /// Whether a non-null, fully-specified `tuple` currently has an entry —
    /// the building block for `IndexValidate`, which runs a unique check
    /// ahead of mutating storage so `OnConflict` can react without leaving
    /// partially-applied index state.
    pub fn exists(&self, tuple: &[Value], token: &CancellationToken) -> Result<bool> {
        Ok(self.lookup_prefix(tuple, token)?.is_some())
    }

    /// Composite-prefix range scan (spec §4.4): a range over the first `k`
    /// of this index's `n` columns matches any entry whose first `k`
    /// decoded fields fall in the range; the remaining `n - k` columns are
    /// unconstrained. Invokes `f` with each matching entry's owning row
    /// key, in ascending or descending order per `range.reverse`.
    pub fn iterate_on_range(
        &self,
        range: &TypedRange,
        token: &CancellationToken,
        mut f: impl FnMut(Bytes) -> Result<()>,
    ) -> Result<()> {
        let key_range = typed_range_to_key_range(range);
        let mut iter = self.store.scan(key_range, range.reverse, token.clone())?;
        for item in &mut iter {
            token.check()?;
            let (key, row_key) = item?;
            let tuple = match decode_key(&key, self.info.columns.len()) {
                Ok(t) => t,
                Err(_) => continue,
            };
            if !matches_range(&tuple, range) {
                continue;
            }
            f(row_key)?;
        }
        Ok(())
    }

    /// Drops every entry in this index's store, used by `Table::truncate`.
    pub fn truncate(&self) -> Result<()> {
        self.store.truncate()
    }
}

/// The smallest byte string that sorts strictly after every string having
/// `prefix` as a prefix, or `None` if there is no such bound (`prefix` is
/// all `0xFF`, or empty). Used to turn a composite-prefix match into a
/// bounded `[prefix, successor)` byte range instead of a full store scan.
fn prefix_successor(prefix: &[u8]) -> Option<Bytes> {
    let mut bound = prefix.to_vec();
    while let Some(&last) = bound.last() {
        if last == 0xFF {
            bound.pop();
        } else {
            *bound.last_mut().unwrap() += 1;
            return Some(Bytes::from(bound));
        }
    }
    None
}

/// The byte range containing exactly the keys that start with `prefix`
/// (spec §4.4's "start the underlying byte scan at the min ... stop when
/// the cursor crosses the max").
fn prefix_key_range(prefix: &[u8]) -> KeyRange {
    KeyRange {
        min: Some(Bytes::copy_from_slice(prefix)),
        max: prefix_successor(prefix),
        min_exclusive: false,
        max_exclusive: true,
    }
}

/// Seeds a [`KeyRange`] from a [`TypedRange`]'s already-converted bound
/// tuples so `iterate_on_range`'s underlying scan starts at `min` and stops
/// past `max`, rather than walking the whole store (spec §4.4). The bound
/// is intentionally a conservative over-approximation — it admits every key
/// whose prefix equals the bound tuple's encoding regardless of the
/// `exact`/`exclusive` flags on a shorter-than-full-arity bound — because
/// `matches_range` still re-checks field-by-field exactness on every
/// candidate; this only has to avoid excluding anything it shouldn't.
fn typed_range_to_key_range(range: &TypedRange) -> KeyRange {
    if range.exact {
        return match &range.min {
            Some(min) => prefix_key_range(&encode_key(min)),
            None => KeyRange::all(),
        };
    }
    let min = range
        .min
        .as_ref()
        .map(|values| Bytes::from(encode_key(values)));
    let max = range
        .max
        .as_ref()
        .and_then(|values| prefix_successor(&encode_key(values)));
    KeyRange {
        min,
        max,
        min_exclusive: false,
        max_exclusive: true,
    }
}

/// Compares `tuple`'s leading fields against `range`'s bound tuples,
/// applying the composite-prefix rule: a bound narrower than the index's
/// full arity only constrains that many leading columns.
pub(crate) fn matches_range(tuple: &[Value], range: &TypedRange) -> bool {
    if range.exact {
        return match &range.min {
            Some(min) => compare_prefix(tuple, min) == Some(std::cmp::Ordering::Equal),
            None => true,
        };
    }
    if let Some(min) = &range.min {
        match compare_prefix(tuple, min) {
            Some(std::cmp::Ordering::Less) => return false,
            Some(std::cmp::Ordering::Equal) if range.exclusive => return false,
            None => return false,
            _ => {}
        }
    }
    if let Some(max) = &range.max {
        match compare_prefix(tuple, max) {
            Some(std::cmp::Ordering::Greater) => return false,
            Some(std::cmp::Ordering::Equal) if range.exclusive => return false,
            None => return false,
            _ => {}
        }
    }
    true
}

/// Lexicographically compares `tuple`'s first `bound.len()` fields against
/// `bound`; `None` if any pair is incomparable (e.g. a `NULL` column).
fn compare_prefix(tuple: &[Value], bound: &[Value]) -> Option<std::cmp::Ordering> {
    for (t, b) in tuple.iter().zip(bound.iter()) {
        match t.compare(b) {
            Some(std::cmp::Ordering::Equal) => continue,
            other => return other,
        }
    }
    Some(std::cmp::Ordering::Equal)
}
