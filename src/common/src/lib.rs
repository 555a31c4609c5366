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

//! Shared foundations for the reldb core: typed values, the order-preserving
//! codec, schema descriptors, the expression-evaluator contract, the
//! per-row environment, range descriptors, and the closed error taxonomy.

pub mod cancellation;
pub mod codec;
pub mod env;
pub mod error;
pub mod expr;
pub mod range;
pub mod row;
pub mod schema;
pub mod value;

pub use cancellation::CancellationToken;
pub use error::{Error, Result};
