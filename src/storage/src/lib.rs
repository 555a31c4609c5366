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

//! Storage layer: the KV backend contract and its in-memory reference
//! implementation (C2), row storage (C3), secondary indexes (C4), and the
//! schema-object registry (C5).

pub mod catalog;
pub mod error;
pub mod index;
pub mod kv;
pub mod table;

pub use catalog::{Catalog, CatalogTransaction};
pub use index::Index;
pub use table::Table;
