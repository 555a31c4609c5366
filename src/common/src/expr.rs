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

//! The expression-evaluator contract (spec §1, §6).
//!
//! The evaluator itself — parsing, binding, arithmetic, casts — is an
//! external collaborator. The core only consumes [`Expr::eval`], given an
//! [`EnvLike`] context, and [`Expr::string`] for explain output and
//! default column naming (spec §4.8, §6).

use crate::error::{Error, Result};
use crate::row::Row;
use crate::value::Value;

/// What an expression needs from its evaluation context: column lookup
/// against the current row, and parameter lookup walking outward through
/// enclosing scopes (spec §4.6).
pub trait EnvLike {
    fn column(&self, name: &str) -> Option<Value>;
    fn positional_param(&self, index: usize) -> Option<Value>;
    fn named_param(&self, name: &str) -> Option<Value>;
}

pub trait Expr: std::fmt::Debug + Send + Sync {
    fn eval(&self, env: &dyn EnvLike) -> Result<Value>;

    /// Canonical text form; the default column name in projection and the
    /// group-column name in aggregation (spec §4.8, §6).
    fn string(&self) -> String;
}

pub type BoxedExpr = Box<dyn Expr>;

/// A constant value. Used by the crate's own tests; not a general
/// expression language (spec §1 explicitly scopes that out).
#[derive(Debug, Clone)]
pub struct Lit(pub Value);

impl Expr for Lit {
    fn eval(&self, _env: &dyn EnvLike) -> Result<Value> {
        Ok(self.0.clone())
    }

    fn string(&self) -> String {
        match &self.0 {
            Value::Null => "null".to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Bigint(i) => i.to_string(),
            Value::Double(d) => d.to_string(),
            Value::Timestamp(t) => t.to_string(),
            Value::Text(s) => format!("'{s}'"),
            Value::Blob(_) => "<blob>".to_string(),
        }
    }
}

/// A bare column reference, failing with [`crate::error::Error::ColumnNotFound`]
/// when absent from the current row.
#[derive(Debug, Clone)]
pub struct Column(pub String);

impl Expr for Column {
    fn eval(&self, env: &dyn EnvLike) -> Result<Value> {
        env.column(&self.0)
            .ok_or_else(|| crate::error::Error::ColumnNotFound(self.0.clone()))
    }

    fn string(&self) -> String {
        self.0.clone()
    }
}

/// A row-producing expression (spec §4.8 `Expressions` source).
///
/// [`Value`] has no row/document variant (spec §3 enumerates exactly eight
/// scalar kinds), so a row-shaped result is a distinct evaluation contract
/// from [`Expr::eval`] rather than a [`Value`] arm. Concrete row expressions
/// are an external collaborator's concern (the bind-parameter/VALUES layer,
/// out of scope per spec §1); this crate supplies only [`RowLit`] for tests
/// and [`ExprAsRow`], which documents the open question in spec §9 — a bare
/// scalar expression has no row to produce, so it always fails loudly.
pub trait RowExpr: std::fmt::Debug + Send + Sync {
    fn eval(&self, env: &dyn EnvLike) -> Result<Row>;
}

pub type BoxedRowExpr = Box<dyn RowExpr>;

/// A constant row. Used by this workspace's own tests.
#[derive(Debug, Clone)]
pub struct RowLit(pub Row);

impl RowExpr for RowLit {
    fn eval(&self, _env: &dyn EnvLike) -> Result<Row> {
        Ok(self.0.clone())
    }
}

/// Wraps a scalar [`Expr`] as a [`RowExpr`] that always fails with
/// [`Error::ExpressionMustEvaluateToRow`] — spec §9's resolved open
/// question: no coercion from scalar to row is attempted.
#[derive(Debug)]
pub struct ExprAsRow(pub BoxedExpr);

impl RowExpr for ExprAsRow {
    fn eval(&self, env: &dyn EnvLike) -> Result<Row> {
        self.0.eval(env)?;
        Err(Error::ExpressionMustEvaluateToRow)
    }
}
