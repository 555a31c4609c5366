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

//! The driver-facing facade (C9, spec §6): `Database`, `Connection`,
//! `Transaction`, `Statement`, and the `Rows` result adapter. Planning and
//! SQL parsing are explicitly out of scope (spec §1) — a `Statement` wraps
//! a pipeline the caller has already built (a `reldb_stream::Stream`),
//! exactly the "parser/planner contract" boundary spec §6 describes.

pub mod db;
pub mod error;
pub mod result;

pub use db::{Connection, Database, Statement, Transaction};
pub use error::{Error, Result};
pub use reldb_common::env::Params;
pub use reldb_common::CancellationToken;
pub use reldb_stream::Stream;
pub use result::Rows;
