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

//! The streaming operator pipeline (C8): a pull-based tree of row
//! iterators built from leaf sources, single-input transforms, multi-input
//! set operators, sort/aggregate staging, table/index sinks, and the
//! `OnConflict` reaction wrapper.

pub mod conflict;
pub mod error;
pub mod operator;
pub mod setops;
pub mod sink;
pub mod sort;
pub mod source;
pub mod transform;

pub use error::{Error, Result};
pub use operator::{
    root_env, run, BoxedRowIter, EmptyIter, ExecCtx, OperatorId, OperatorNode, RowEnv, RowIter,
    RowScope, Stream,
};
