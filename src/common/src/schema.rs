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

use std::sync::Arc;

use crate::expr::BoxedExpr;

/// The type tag of a [`crate::value::Value`] (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Boolean,
    Integer,
    Bigint,
    Double,
    Timestamp,
    Text,
    Blob,
}

impl DataType {
    pub fn name(&self) -> &'static str {
        match self {
            DataType::Boolean => "boolean",
            DataType::Integer => "integer",
            DataType::Bigint => "bigint",
            DataType::Double => "double",
            DataType::Timestamp => "timestamp",
            DataType::Text => "text",
            DataType::Blob => "blob",
        }
    }
}

/// A per-column constraint, evaluated during row encoding (`Default`) or
/// post-encoding (`Check`) per spec §3.
#[derive(Clone)]
pub enum Constraint {
    NotNull,
    Unique,
    PrimaryKey,
    Default(Arc<BoxedExpr>),
    Check(Arc<BoxedExpr>),
}

impl std::fmt::Debug for Constraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Constraint::NotNull => write!(f, "NotNull"),
            Constraint::Unique => write!(f, "Unique"),
            Constraint::PrimaryKey => write!(f, "PrimaryKey"),
            Constraint::Default(e) => write!(f, "Default({})", e.string()),
            Constraint::Check(e) => write!(f, "Check({})", e.string()),
        }
    }
}

/// A name, a type, and a set of constraints (spec §3).
#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
    pub constraints: Vec<Constraint>,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            constraints: Vec::new(),
        }
    }

    pub fn not_null(mut self) -> Self {
        self.constraints.push(Constraint::NotNull);
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.constraints.push(Constraint::PrimaryKey);
        self.constraints.push(Constraint::NotNull);
        self
    }

    pub fn unique(mut self) -> Self {
        self.constraints.push(Constraint::Unique);
        self
    }

    pub fn default_expr(mut self, expr: Arc<BoxedExpr>) -> Self {
        self.constraints.push(Constraint::Default(expr));
        self
    }

    pub fn check(mut self, expr: Arc<BoxedExpr>) -> Self {
        self.constraints.push(Constraint::Check(expr));
        self
    }

    pub fn is_not_null(&self) -> bool {
        self.constraints
            .iter()
            .any(|c| matches!(c, Constraint::NotNull))
    }

    pub fn is_primary_key(&self) -> bool {
        self.constraints
            .iter()
            .any(|c| matches!(c, Constraint::PrimaryKey))
    }

    pub fn default(&self) -> Option<&BoxedExpr> {
        self.constraints.iter().find_map(|c| match c {
            Constraint::Default(e) => Some(e.as_ref()),
            _ => None,
        })
    }

    pub fn checks(&self) -> impl Iterator<Item = &BoxedExpr> {
        self.constraints.iter().filter_map(|c| match c {
            Constraint::Check(e) => Some(e.as_ref()),
            _ => None,
        })
    }
}

/// A table's schema (`TableInfo`, spec §3).
///
/// `primary_key` names the PK columns in declaration order. An empty list
/// means the table has a surrogate `rowid` primary key (spec §4.3):
/// `Table::insert` then fetches the next value from the table's sequence
/// rather than encoding declared column values.
#[derive(Debug, Clone)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<Column>,
    pub primary_key: Vec<String>,
    pub table_checks: Vec<Arc<BoxedExpr>>,
    pub read_only: bool,
}

impl TableInfo {
    pub fn new(name: impl Into<String>, columns: Vec<Column>, primary_key: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
            primary_key,
            table_checks: Vec::new(),
            read_only: false,
        }
    }

    pub fn has_surrogate_key(&self) -> bool {
        self.primary_key.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// A secondary index's descriptor (`IndexInfo`, spec §3).
#[derive(Debug, Clone)]
pub struct IndexInfo {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

impl IndexInfo {
    pub fn new(
        name: impl Into<String>,
        table: impl Into<String>,
        columns: Vec<String>,
        unique: bool,
    ) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            columns,
            unique,
        }
    }
}
