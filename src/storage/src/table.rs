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

//! Row storage above the KV layer (C3): primary-key encoding, DEFAULT/NOT
//! NULL/CHECK enforcement, and index maintenance for insert/replace/delete.

use bytes::Bytes;
use reldb_common::codec::{decode_key, decode_row, encode_key, encode_row};
use reldb_common::expr::EnvLike;
use reldb_common::row::Row;
use reldb_common::schema::{DataType, IndexInfo, TableInfo};
use reldb_common::value::Value;
use reldb_common::CancellationToken;

use crate::catalog::CatalogTransaction;
use crate::error::{Error, Result};
use crate::index::{matches_range, Index};
use crate::kv::{BoxedStore, KeyRange, Transaction};

/// Evaluation context for DEFAULT/CHECK expressions: looks columns up
/// against a single row, with no parameters and no outer scope — table
/// constraints do not bind to the pipeline's evaluation stack (C6).
struct RowEnv<'a>(&'a Row);

impl EnvLike for RowEnv<'_> {
    fn column(&self, name: &str) -> Option<Value> {
        self.0.get(name).cloned()
    }

    fn positional_param(&self, _index: usize) -> Option<Value> {
        None
    }

    fn named_param(&self, _name: &str) -> Option<Value> {
        None
    }
}

pub struct Table<'a> {
    info: TableInfo,
    store: BoxedStore<'a>,
    indexes: Vec<Index<'a>>,
}

/// Opens a table's row store plus every index registered against it
/// (spec §4.5's catalog lookup feeding §4.3's table operations).
pub fn open<'a>(
    txn: &'a dyn Transaction,
    catalog: &CatalogTransaction,
    name: &str,
) -> Result<Table<'a>> {
    let info = catalog.table(name)?;
    let store = txn.get_store(name)?;
    let index_infos = catalog.indexes_on(name)?;
    let mut indexes = Vec::with_capacity(index_infos.len());
    for info in index_infos {
        let index_store = txn.get_store(&info.name)?;
        indexes.push(Index::new(info, index_store));
    }
    Ok(Table {
        info,
        store,
        indexes,
    })
}

/// Opens a table's row store without loading any of its indexes.
///
/// The stream pipeline's `TableInsert`/`TableReplace`/`TableDelete` sinks
/// (C8) use this: in that model, index maintenance is a separate, explicit
/// `IndexInsert`/`IndexDelete` stage the planner chains after the table
/// sink (spec §4.8's "emit the affected row with its key attached so
/// downstream operators ... can run"), rather than something the table
/// mutation performs on its own. [`open`]'s self-maintaining behavior
/// remains the direct C3 primitive for callers outside the streaming
/// pipeline.
pub fn open_without_indexes<'a>(
    txn: &'a dyn Transaction,
    catalog: &CatalogTransaction,
    name: &str,
) -> Result<Table<'a>> {
    let info = catalog.table(name)?;
    let store = txn.get_store(name)?;
    Ok(Table {
        info,
        store,
        indexes: Vec::new(),
    })
}

fn index_tuple(row: &Row, info: &IndexInfo) -> Vec<Value> {
    info.columns
        .iter()
        .map(|c| row.get(c).cloned().unwrap_or(Value::Null))
        .collect()
}

impl<'a> Table<'a> {
    pub fn info(&self) -> &TableInfo {
        &self.info
    }

    fn column_types(&self) -> Vec<DataType> {
        self.info.columns.iter().map(|c| c.data_type).collect()
    }

    fn row_from_values(&self, values: Vec<Value>, key: &[u8]) -> Row {
        let columns = self
            .info
            .columns
            .iter()
            .map(|c| c.name.clone())
            .zip(values)
            .collect::<Vec<_>>();
        Row::with_key(columns, key.to_vec())
    }

    /// Resolves `input` into the table's declared column order: fills
    /// absent columns from DEFAULT (evaluated against `input` itself),
    /// converts every value to its declared type, and enforces NOT NULL.
    /// Runs column CHECKs, then table-level CHECKs, in that order.
    fn build_row(&self, input: &Row) -> Result<(Vec<Value>, Row)> {
        let env = RowEnv(input);
        let mut values = Vec::with_capacity(self.info.columns.len());
        for column in &self.info.columns {
            let raw = match input.get(&column.name) {
                Some(v) => v.clone(),
                None => match column.default() {
                    Some(expr) => expr.eval(&env)?,
                    None => Value::Null,
                },
            };
            let converted = raw.convert(column.data_type)?;
            if converted.is_null() && column.is_not_null() {
                return Err(Error::NotNullViolated(column.name.clone()));
            }
            values.push(converted);
        }
        let built = self.row_from_values_no_key(values.clone());

        let built_env = RowEnv(&built);
        for column in &self.info.columns {
            for check in column.checks() {
                if !check.eval(&built_env)?.truthy() {
                    return Err(Error::CheckViolated(column.name.clone()));
                }
            }
        }
        for check in &self.info.table_checks {
            if !check.eval(&built_env)?.truthy() {
                return Err(Error::CheckViolated(check.string()));
            }
        }
        Ok((values, built))
    }

    fn row_from_values_no_key(&self, values: Vec<Value>) -> Row {
        let columns = self
            .info
            .columns
            .iter()
            .map(|c| c.name.clone())
            .zip(values)
            .collect::<Vec<_>>();
        Row::new(columns)
    }

    /// Resolves the key a `TableReplace`/`TableDelete` sink should act on:
    /// the row's own carried key if present (the usual case — the row came
    /// from a scan or a prior sink), otherwise encoded fresh from the
    /// declared primary-key columns. Never touches a surrogate-key
    /// sequence; a surrogate-keyed row reaching a replace/delete sink
    /// without a carried key is a planner error.
    pub fn key_for(&self, row: &Row) -> Result<Vec<u8>> {
        if let Some(key) = &row.key {
            return Ok(key.clone());
        }
        if self.info.has_surrogate_key() {
            return Err(Error::ColumnNotFound("rowid".to_string()));
        }
        let values: Vec<Value> = self
            .info
            .primary_key
            .iter()
            .map(|name| {
                row.get(name)
                    .cloned()
                    .ok_or_else(|| Error::ColumnNotFound(name.clone()))
            })
            .collect::<Result<_>>()?;
        Ok(encode_key(&values))
    }

    fn primary_key(&self, row: &Row, catalog: &CatalogTransaction) -> Result<Vec<u8>> {
        if self.info.has_surrogate_key() {
            let rowid = catalog.next_sequence_value(&self.info.name)?;
            Ok(encode_key(&[Value::Bigint(rowid)]))
        } else {
            let values: Vec<Value> = self
                .info
                .primary_key
                .iter()
                .map(|name| {
                    row.get(name)
                        .cloned()
                        .ok_or_else(|| Error::ColumnNotFound(name.clone()))
                })
                .collect::<Result<_>>()?;
            Ok(encode_key(&values))
        }
    }

    /// Inserts `input`, failing with [`Error::PrimaryKeyAlreadyExists`] if
    /// the computed key is already present, or with
    /// [`Error::UniqueConstraintViolated`] if any unique index rejects the
    /// row — in which case the partial table/index writes already applied
    /// for this call are undone before the error is returned, leaving the
    /// transaction open for the caller to retry or rollback (spec §4.3).
    pub fn insert(&self, input: &Row, catalog: &CatalogTransaction, token: &CancellationToken) -> Result<Row> {
        token.check()?;
        if self.info.read_only {
            return Err(Error::ReadOnlyTransaction);
        }
        let (values, built) = self.build_row(input)?;
        let key = self.primary_key(&built, catalog)?;

        if self.store.get(&key)?.is_some() {
            return Err(Error::PrimaryKeyAlreadyExists);
        }

        let mut applied = Vec::with_capacity(self.indexes.len());
        for index in &self.indexes {
            let tuple = index_tuple(&built, index.info());
            if let Err(e) = index.set(&tuple, &key, token) {
                for (applied_index, applied_tuple) in applied.iter().rev() {
                    let _ = applied_index.delete(applied_tuple, &key);
                }
                return Err(e);
            }
            applied.push((index, tuple));
        }

        let mut bytes = Vec::new();
        encode_row(&values, &mut bytes);
        if let Err(e) = self.store.put(Bytes::copy_from_slice(&key), Bytes::from(bytes)) {
            for (applied_index, applied_tuple) in applied.into_iter().rev() {
                let _ = applied_index.delete(&applied_tuple, &key);
            }
            return Err(e);
        }

        Ok(self.row_from_values(values, &key))
    }

    /// Overwrites the row at `key`, deleting old index entries and
    /// installing new ones (spec §4.3 `Replace`). Fails with
    /// [`Error::KeyNotFound`] if `key` is absent.
    pub fn replace(
        &self,
        key: &[u8],
        input: &Row,
        catalog: &CatalogTransaction,
        token: &CancellationToken,
    ) -> Result<Row> {
        token.check()?;
        if self.info.read_only {
            return Err(Error::ReadOnlyTransaction);
        }
        let old_bytes = self
            .store
            .get(key)?
            .ok_or(Error::KeyNotFound)?;
        let old_values = decode_row(&old_bytes, &self.column_types())?;
        let old_row = self.row_from_values_no_key(old_values);

        let (new_values, built) = self.build_row(input)?;

        let mut old_tuples = Vec::with_capacity(self.indexes.len());
        for index in &self.indexes {
            let tuple = index_tuple(&old_row, index.info());
            index.delete(&tuple, key)?;
            old_tuples.push(tuple);
        }

        let mut applied = 0usize;
        for index in &self.indexes {
            let tuple = index_tuple(&built, index.info());
            if let Err(e) = index.set(&tuple, key, token) {
                for index2 in self.indexes[..applied].iter().rev() {
                    let t2 = index_tuple(&built, index2.info());
                    let _ = index2.delete(&t2, key);
                }
                for (index2, old_tuple) in self.indexes.iter().zip(old_tuples.iter()) {
                    let _ = index2.set(old_tuple, key, token);
                }
                return Err(e);
            }
            applied += 1;
        }

        let mut bytes = Vec::new();
        encode_row(&new_values, &mut bytes);
        self.store.put(Bytes::copy_from_slice(key), Bytes::from(bytes))?;
        Ok(self.row_from_values(new_values, key))
    }

    /// Removes the row at `key` and its contribution to every index
    /// (spec §4.3 `Delete`).
    pub fn delete(&self, key: &[u8]) -> Result<Row> {
        if self.info.read_only {
            return Err(Error::ReadOnlyTransaction);
        }
        let bytes = self.store.get(key)?.ok_or(Error::KeyNotFound)?;
        let values = decode_row(&bytes, &self.column_types())?;
        let row = self.row_from_values(values, key);
        for index in &self.indexes {
            let tuple = index_tuple(&row, index.info());
            index.delete(&tuple, key)?;
        }
        self.store.delete(key)?;
        Ok(row)
    }

    /// Atomically empties the table's row store and every index on it
    /// (spec §4.3 `Truncate`).
    pub fn truncate(&self) -> Result<()> {
        if self.info.read_only {
            return Err(Error::ReadOnlyTransaction);
        }
        self.store.truncate()?;
        for index in &self.indexes {
            index.truncate()?;
        }
        Ok(())
    }

    /// Range-bounded ordered iteration over primary-key space (spec §4.3
    /// `Scan`); `range` is expressed over the primary-key tuple's declared
    /// types.
    pub fn scan(
        &self,
        range: &reldb_common::range::TypedRange,
        token: &CancellationToken,
        mut f: impl FnMut(Row) -> Result<()>,
    ) -> Result<()> {
        let pk_len = if self.info.has_surrogate_key() {
            1
        } else {
            self.info.primary_key.len()
        };
        let mut iter = self.store.scan(KeyRange::all(), range.reverse, token.clone())?;
        for item in &mut iter {
            token.check()?;
            let (key, value) = item?;
            let pk_tuple = match decode_key(&key, pk_len) {
                Ok(t) => t,
                Err(_) => continue,
            };
            if !matches_range(&pk_tuple, range) {
                continue;
            }
            let values = decode_row(&value, &self.column_types())?;
            f(self.row_from_values(values, &key))?;
        }
        Ok(())
    }

    /// Point lookup by encoded primary key, used by `IndexScan` (C8) to
    /// fetch the owning row once the index has yielded its key.
    pub fn get(&self, key: &[u8]) -> Result<Option<Row>> {
        match self.store.get(key)? {
            Some(bytes) => {
                let values = decode_row(&bytes, &self.column_types())?;
                Ok(Some(self.row_from_values(values, key)))
            }
            None => Ok(None),
        }
    }
}
