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

use thiserror::Error;

/// The closed error taxonomy for the core engine.
///
/// Every variant here is surfaced to callers except [`Error::StreamClosed`],
/// which is an internal sentinel absorbed at the pipeline's outer iteration
/// boundary (spec §7) and must never escape a [`crate::env::Environment`]-level
/// API.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    // --- engine state ---
    #[error("engine is closed")]
    EngineClosed,
    #[error("transaction discarded")]
    TransactionDiscarded,
    #[error("read-only transaction")]
    ReadOnlyTransaction,

    // --- schema ---
    #[error("store not found: {0}")]
    StoreNotFound(String),
    #[error("store already exists: {0}")]
    StoreAlreadyExists(String),
    #[error("table not found: {0}")]
    TableNotFound(String),
    #[error("index not found: {0}")]
    IndexNotFound(String),
    #[error("{0} already exists")]
    AlreadyExists(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("primary key already exists")]
    PrimaryKeyAlreadyExists,
    #[error("unique constraint violated on index {index}")]
    UniqueConstraintViolated {
        index: String,
        /// encoded primary key of the row that already holds the tuple,
        /// carried so `OnConflict` can resume against it (spec §4.8/§7).
        conflicting_key: Vec<u8>,
    },
    #[error("not-null constraint violated on column {0}")]
    NotNullViolated(String),
    #[error("check constraint violated: {0}")]
    CheckViolated(String),
    #[error("type mismatch: cannot convert {from} to {to}")]
    TypeMismatch { from: String, to: String },

    // --- data ---
    #[error("key not found")]
    KeyNotFound,
    #[error("value not found")]
    ValueNotFound,
    #[error("column not found: {0}")]
    ColumnNotFound(String),
    #[error("duplicate column: {0}")]
    DuplicateColumn(String),
    #[error("rename arity mismatch: row has {actual} columns, expected {expected}")]
    RenameArityMismatch { actual: usize, expected: usize },
    #[error("expression must evaluate to a row")]
    ExpressionMustEvaluateToRow,
    #[error("scan arity mismatch: row has {actual} columns, caller supplied {expected} slots")]
    ScanArityMismatch { actual: usize, expected: usize },
    #[error("no current row: call Rows::next() first")]
    NoCurrentRow,

    // --- lookup / internal sentinel ---
    /// Never surfaced to a caller; absorbed at the outer iteration boundary.
    #[error("stream closed")]
    StreamClosed,

    // --- external ---
    #[error("cancelled")]
    Cancelled,
    #[error("io error: {0}")]
    Io(String),
    #[error("corrupt encoding: {0}")]
    CorruptEncoding(String),
}

impl Error {
    /// `true` for the internal sentinel that the pipeline's outer boundary
    /// absorbs rather than propagating to the caller (spec §4.8, §7).
    pub fn is_stream_closed(&self) -> bool {
        matches!(self, Error::StreamClosed)
    }

    /// `true` for the one error `OnConflict` is permitted to catch (spec §4.8).
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Error::UniqueConstraintViolated { .. })
    }

    /// `true` for any constraint violation `OnConflict` reacts to: a
    /// duplicate primary key as well as a unique-index conflict (spec §4.8
    /// scenario 7 inserts a duplicate primary key under `OnConflict(null)`).
    /// Only [`Error::UniqueConstraintViolated`] carries the conflicting row's
    /// key for the alt-stream augmentation; a primary-key collision is
    /// suppressible but does not carry one.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Error::PrimaryKeyAlreadyExists | Error::UniqueConstraintViolated { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
