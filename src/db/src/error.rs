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

//! Reuses the single closed error taxonomy defined in `reldb_common` (spec
//! §7); the driver facade introduces no error variant of its own beyond
//! the `ScanArityMismatch`/`NoCurrentRow` pair already added there for the
//! `Rows` adapter (C9, spec §4.9/§6).

pub use reldb_common::{Error, Result};
