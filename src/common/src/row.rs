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

use crate::value::Value;

/// A sequence of `(column name, value)` pairs (spec §3).
///
/// Carries an optional encoded primary key: absent until the row has been
/// inserted into a table, present afterwards so downstream operators (index
/// maintenance, `OnConflict`) can address the row without re-encoding it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    columns: Vec<(String, Value)>,
    pub key: Option<Vec<u8>>,
}

impl Row {
    pub fn new(columns: Vec<(String, Value)>) -> Self {
        Self { columns, key: None }
    }

    pub fn with_key(columns: Vec<(String, Value)>, key: Vec<u8>) -> Self {
        Self {
            columns,
            key: Some(key),
        }
    }

    pub fn columns(&self) -> &[(String, Value)] {
        &self.columns
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn arity(&self) -> usize {
        self.columns.len()
    }

    /// Replaces or appends a single column (spec §4.8 `Set`).
    pub fn set(&mut self, name: &str, value: Value) {
        if let Some(slot) = self.columns.iter_mut().find(|(n, _)| n == name) {
            slot.1 = value;
        } else {
            self.columns.push((name.to_string(), value));
        }
    }

    /// Removes a column, a no-op if absent (spec §4.8 `Unset`).
    pub fn unset(&mut self, name: &str) {
        self.columns.retain(|(n, _)| n != name);
    }

    /// Renames columns positionally; errors if arity differs (spec §4.8 `Rename`).
    pub fn rename(&mut self, names: &[String]) -> Result<(), crate::error::Error> {
        if names.len() != self.columns.len() {
            return Err(crate::error::Error::RenameArityMismatch {
                actual: self.columns.len(),
                expected: names.len(),
            });
        }
        for ((name, _), new_name) in self.columns.iter_mut().zip(names) {
            *name = new_name.clone();
        }
        Ok(())
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.columns.iter().map(|(_, v)| v)
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Row::new(iter.into_iter().collect())
    }
}
