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

//! The KV backend contract (C2, spec §4.2, §6): `Engine`, `Transaction`,
//! `Store`, and a bidirectional range iterator, generic so a future
//! disk-backed implementation can be swapped in behind the same surface.
//! This workspace ships exactly one implementation, [`memory::MemoryEngine`].

pub mod lock;
pub mod memory;

use bytes::Bytes;
use reldb_common::CancellationToken;

use crate::error::Result;

/// A `(min, max)` byte-range with an inclusive/exclusive pivot on each
/// side; `None` means unbounded on that side (spec §4.3 `Scan`).
#[derive(Debug, Clone)]
pub struct KeyRange {
    pub min: Option<Bytes>,
    pub max: Option<Bytes>,
    pub min_exclusive: bool,
    pub max_exclusive: bool,
}

impl KeyRange {
    pub fn all() -> Self {
        Self {
            min: None,
            max: None,
            min_exclusive: false,
            max_exclusive: false,
        }
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        if let Some(min) = &self.min {
            match key.cmp(min.as_ref()) {
                std::cmp::Ordering::Less => return false,
                std::cmp::Ordering::Equal if self.min_exclusive => return false,
                _ => {}
            }
        }
        if let Some(max) = &self.max {
            match key.cmp(max.as_ref()) {
                std::cmp::Ordering::Greater => return false,
                std::cmp::Ordering::Equal if self.max_exclusive => return false,
                _ => {}
            }
        }
        true
    }
}

/// One `(key, value)` pair yielded by a [`ScanIter`].
pub type KvPair = (Bytes, Bytes);

/// A bidirectional range-scan cursor over a [`Store`] (§6 `Iterator`
/// contract). Every call to `next` polls the cancellation token supplied at
/// `Store::scan` time (spec §5).
pub trait ScanIter: Iterator<Item = Result<KvPair>> + Send {}
impl<T: Iterator<Item = Result<KvPair>> + Send> ScanIter for T {}

pub type BoxedScanIter<'a> = Box<dyn Iterator<Item = Result<KvPair>> + 'a>;

/// A named, ordered byte-string store (spec §4.2).
pub trait Store {
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>>;

    fn put(&self, key: Bytes, value: Bytes) -> Result<()>;

    fn delete(&self, key: &[u8]) -> Result<()>;

    /// Drops every key in the store; the prior contents are unreachable
    /// from this handle afterwards (spec §4.3 `Truncate`).
    fn truncate(&self) -> Result<()>;

    /// Scans `range`, optionally in reverse order, returning an iterator
    /// whose traversal order may be snapshotted at open time (spec §4.2
    /// "Scan under concurrent mutation") but whose per-key liveness
    /// (tombstone/value) is checked live as the cursor advances.
    fn scan<'a>(
        &'a self,
        range: KeyRange,
        reverse: bool,
        token: CancellationToken,
    ) -> Result<BoxedScanIter<'a>>;
}

pub type BoxedStore<'a> = Box<dyn Store + 'a>;

/// A transaction opened in read or write mode (spec §4.2).
///
/// Mutating a [`Store`] handed out by a write transaction records an
/// inverse action on this transaction's undo list; `commit`/`rollback`
/// consume `self` so a discarded transaction cannot be reused (spec §4.2
/// "Failure semantics").
pub trait Transaction {
    fn is_writable(&self) -> bool;

    /// Opens a handle to an existing store, failing with
    /// [`reldb_common::Error::StoreNotFound`] if absent.
    fn get_store<'a>(&'a self, name: &str) -> Result<BoxedStore<'a>>;

    /// Creates a new, empty store, failing with
    /// [`reldb_common::Error::StoreAlreadyExists`] if one exists already.
    fn create_store<'a>(&'a self, name: &str) -> Result<BoxedStore<'a>>;

    /// Removes a store entirely (distinct from `truncate`, which keeps the
    /// store registered but empty).
    fn drop_store(&self, name: &str) -> Result<()>;

    fn commit(self: Box<Self>) -> Result<()>;

    fn rollback(self: Box<Self>) -> Result<()>;
}

pub type BoxedTransaction = Box<dyn Transaction>;

/// The KV engine contract (spec §4.2, §6): opens transactions under the
/// multi-reader/single-writer lock.
pub trait Engine: Send + Sync {
    fn begin(&self, writable: bool, token: &CancellationToken) -> Result<BoxedTransaction>;

    fn is_closed(&self) -> bool;

    fn close(&self);
}

pub type BoxedEngine = Box<dyn Engine>;
