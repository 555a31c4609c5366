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

//! A process-wide registry of schema-object descriptors (C5): tables,
//! indexes, and sequences, keyed by name. The registry itself is not a
//! `Store` — it is an in-memory map guarded by a [`TxnLock`][crate::kv::lock::TxnLock]-style
//! exclusion discipline, with the same CREATE/DROP-installs-an-inverse-action
//! rule as a KV transaction's undo list.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use reldb_common::schema::{IndexInfo, TableInfo};
use reldb_common::Error;

use crate::error::Result;

#[derive(Default)]
struct CatalogState {
    tables: BTreeMap<String, TableInfo>,
    indexes: BTreeMap<String, IndexInfo>,
    sequences: BTreeMap<String, i64>,
}

/// Shared handle to the registry; cloning shares the same underlying map.
#[derive(Clone, Default)]
pub struct Catalog {
    state: Arc<RwLock<CatalogState>>,
}

enum CatalogUndo {
    RemoveTable(String),
    RestoreTable(String, TableInfo),
    RemoveIndex(String),
    RestoreIndex(String, IndexInfo),
    RemoveSequence(String),
    RestoreSequence(String, i64),
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a transactional handle bound to this registry's lifetime.
    /// `writable` mirrors the KV transaction it is meant to travel
    /// alongside; `begin_tx` does not itself take any lock — callers are
    /// expected to have already acquired the engine's write/read
    /// exclusion before mutating a writable catalog transaction.
    pub fn begin(&self, writable: bool) -> CatalogTransaction {
        CatalogTransaction {
            state: self.state.clone(),
            writable,
            undo: if writable {
                Some(Mutex::new(Vec::new()))
            } else {
                None
            },
            discarded: AtomicBool::new(false),
        }
    }
}

pub struct CatalogTransaction {
    state: Arc<RwLock<CatalogState>>,
    writable: bool,
    undo: Option<Mutex<Vec<CatalogUndo>>>,
    discarded: AtomicBool,
}

impl CatalogTransaction {
    fn check_open(&self) -> Result<()> {
        if self.discarded.load(Ordering::SeqCst) {
            Err(Error::TransactionDiscarded)
        } else {
            Ok(())
        }
    }

    fn check_writable(&self) -> Result<()> {
        if !self.writable {
            return Err(Error::ReadOnlyTransaction);
        }
        Ok(())
    }

    fn record(&self, action: CatalogUndo) {
        if let Some(undo) = &self.undo {
            undo.lock().push(action);
        }
    }

    pub fn table(&self, name: &str) -> Result<TableInfo> {
        self.check_open()?;
        self.state
            .read()
            .tables
            .get(name)
            .cloned()
            .ok_or_else(|| Error::TableNotFound(name.to_string()))
    }

    pub fn has_table(&self, name: &str) -> Result<bool> {
        self.check_open()?;
        Ok(self.state.read().tables.contains_key(name))
    }

    /// Registers `info`, and — if the table has a surrogate `rowid` key —
    /// an associated sequence starting at zero (spec.md §4.3's auto-key
    /// rule; SPEC_FULL §3 makes the sequence a catalog entry so it
    /// survives a reopen).
    pub fn create_table(&self, info: TableInfo) -> Result<()> {
        self.check_open()?;
        self.check_writable()?;
        let name = info.name.clone();
        let mut state = self.state.write();
        if state.tables.contains_key(&name) {
            return Err(Error::AlreadyExists(name));
        }
        let surrogate = info.has_surrogate_key();
        state.tables.insert(name.clone(), info);
        if surrogate {
            state.sequences.insert(name.clone(), 0);
        }
        drop(state);
        self.record(CatalogUndo::RemoveTable(name.clone()));
        if surrogate {
            self.record(CatalogUndo::RemoveSequence(name));
        }
        Ok(())
    }

    pub fn drop_table(&self, name: &str) -> Result<()> {
        self.check_open()?;
        self.check_writable()?;
        let mut state = self.state.write();
        let info = state
            .tables
            .remove(name)
            .ok_or_else(|| Error::TableNotFound(name.to_string()))?;
        let sequence = state.sequences.remove(name);
        drop(state);
        self.record(CatalogUndo::RestoreTable(name.to_string(), info));
        if let Some(value) = sequence {
            self.record(CatalogUndo::RestoreSequence(name.to_string(), value));
        }
        Ok(())
    }

    pub fn index(&self, name: &str) -> Result<IndexInfo> {
        self.check_open()?;
        self.state
            .read()
            .indexes
            .get(name)
            .cloned()
            .ok_or_else(|| Error::IndexNotFound(name.to_string()))
    }

    /// Every index registered against `table`, in declaration order.
    pub fn indexes_on(&self, table: &str) -> Result<Vec<IndexInfo>> {
        self.check_open()?;
        Ok(self
            .state
            .read()
            .indexes
            .values()
            .filter(|ix| ix.table == table)
            .cloned()
            .collect())
    }

    pub fn create_index(&self, info: IndexInfo) -> Result<()> {
        self.check_open()?;
        self.check_writable()?;
        let name = info.name.clone();
        let mut state = self.state.write();
        if state.indexes.contains_key(&name) {
            return Err(Error::AlreadyExists(name));
        }
        state.indexes.insert(name.clone(), info);
        drop(state);
        self.record(CatalogUndo::RemoveIndex(name));
        Ok(())
    }

    pub fn drop_index(&self, name: &str) -> Result<()> {
        self.check_open()?;
        self.check_writable()?;
        let mut state = self.state.write();
        let info = state
            .indexes
            .remove(name)
            .ok_or_else(|| Error::IndexNotFound(name.to_string()))?;
        drop(state);
        self.record(CatalogUndo::RestoreIndex(name.to_string(), info));
        Ok(())
    }

    /// Atomically advances `table`'s surrogate-key sequence and returns the
    /// freshly issued value (spec §4.3). Itself transactional: rollback
    /// resets the counter, matching the catalog's general inverse-action rule.
    pub fn next_sequence_value(&self, table: &str) -> Result<i64> {
        self.check_open()?;
        self.check_writable()?;
        let mut state = self.state.write();
        let current = *state
            .sequences
            .get(table)
            .ok_or_else(|| Error::NotFound(format!("sequence for table {table}")))?;
        let next = current + 1;
        state.sequences.insert(table.to_string(), next);
        drop(state);
        self.record(CatalogUndo::RestoreSequence(table.to_string(), current));
        Ok(next)
    }

    pub fn commit(self) -> Result<()> {
        self.check_open()?;
        self.discarded.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn rollback(self) -> Result<()> {
        self.check_open()?;
        self.discarded.store(true, Ordering::SeqCst);
        if let Some(undo) = &self.undo {
            let actions = std::mem::take(&mut *undo.lock());
            let mut state = self.state.write();
            for action in actions.into_iter().rev() {
                match action {
                    CatalogUndo::RemoveTable(name) => {
                        state.tables.remove(&name);
                    }
                    CatalogUndo::RestoreTable(name, info) => {
                        state.tables.insert(name, info);
                    }
                    CatalogUndo::RemoveIndex(name) => {
                        state.indexes.remove(&name);
                    }
                    CatalogUndo::RestoreIndex(name, info) => {
                        state.indexes.insert(name, info);
                    }
                    CatalogUndo::RemoveSequence(name) => {
                        state.sequences.remove(&name);
                    }
                    CatalogUndo::RestoreSequence(name, value) => {
                        state.sequences.insert(name, value);
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use reldb_common::schema::{Column, DataType};

    use super::*;

    fn table(name: &str, pk: Vec<String>) -> TableInfo {
        TableInfo::new(name, vec![Column::new("a", DataType::Integer)], pk)
    }

    #[test]
    fn create_and_lookup() {
        let catalog = Catalog::new();
        let txn = catalog.begin(true);
        txn.create_table(table("t", vec!["a".into()])).unwrap();
        assert!(txn.table("t").is_ok());
        txn.commit().unwrap();

        let txn2 = catalog.begin(false);
        assert!(txn2.table("t").is_ok());
    }

    #[test]
    fn rollback_undoes_create() {
        let catalog = Catalog::new();
        let txn = catalog.begin(true);
        txn.create_table(table("t", vec!["a".into()])).unwrap();
        txn.rollback().unwrap();

        let txn2 = catalog.begin(false);
        assert!(matches!(txn2.table("t"), Err(Error::TableNotFound(_))));
    }

    #[test]
    fn surrogate_key_gets_a_sequence() {
        let catalog = Catalog::new();
        let txn = catalog.begin(true);
        txn.create_table(table("t", vec![])).unwrap();
        assert_eq!(txn.next_sequence_value("t").unwrap(), 1);
        assert_eq!(txn.next_sequence_value("t").unwrap(), 2);
        txn.rollback().unwrap();

        let txn2 = catalog.begin(true);
        txn2.create_table(table("t", vec![])).unwrap();
        assert_eq!(txn2.next_sequence_value("t").unwrap(), 1);
    }

    #[test]
    fn duplicate_name_fails() {
        let catalog = Catalog::new();
        let txn = catalog.begin(true);
        txn.create_table(table("t", vec!["a".into()])).unwrap();
        assert!(matches!(
            txn.create_table(table("t", vec!["a".into()])),
            Err(Error::AlreadyExists(_))
        ));
    }
}
