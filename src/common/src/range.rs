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

//! Range descriptors (C7, spec §4.7): compile-time expressions that
//! evaluate, once per scan, into typed and then encoded byte-range bounds.

use crate::error::Result;
use crate::expr::{BoxedExpr, EnvLike};
use crate::schema::DataType;
use crate::value::Value;

/// A compile-time range descriptor: optional min/max composite-prefix
/// bound expressions plus the exclusive/exact/reverse flags (spec §4.7).
#[derive(Debug)]
pub struct RangeExpr {
    pub min: Option<Vec<BoxedExpr>>,
    pub max: Option<Vec<BoxedExpr>>,
    pub exclusive: bool,
    /// min-only, restricted to equal keys.
    pub exact: bool,
    pub reverse: bool,
}

impl RangeExpr {
    /// An unbounded range: no min, no max, forward order. The common case
    /// for a full `TableScan`/`IndexScan` with no `WHERE`-derived bound.
    pub fn unbounded() -> Self {
        Self {
            min: None,
            max: None,
            exclusive: false,
            exact: false,
            reverse: false,
        }
    }

    /// Evaluates this descriptor's expressions against `env`, then applies
    /// the numeric-conversion rule (spec §4.7) against `column_types` — the
    /// declared types of the columns the bound tuples range over, in
    /// order. Produces a [`TypedRange`] of already-converted [`Value`]s.
    pub fn evaluate(&self, env: &dyn EnvLike, column_types: &[DataType]) -> Result<TypedRange> {
        let min = self
            .min
            .as_ref()
            .map(|exprs| eval_tuple(exprs, env))
            .transpose()?;
        let max = self
            .max
            .as_ref()
            .map(|exprs| eval_tuple(exprs, env))
            .transpose()?;

        let both_present = min.is_some() && max.is_some();
        let mut exclusive = self.exclusive;

        let min = min
            .map(|tuple| convert_tuple(tuple, column_types, Side::Min, both_present, &mut exclusive))
            .transpose()?;
        let max = max
            .map(|tuple| convert_tuple(tuple, column_types, Side::Max, both_present, &mut exclusive))
            .transpose()?;

        Ok(TypedRange {
            min,
            max,
            exclusive,
            exact: self.exact,
            reverse: self.reverse,
        })
    }

    /// Planner-facing cost estimate (spec §4.7); does not affect correctness.
    pub fn cost(&self) -> u32 {
        if self.exact {
            1
        } else if self.min.is_some() && self.max.is_some() {
            50
        } else if self.min.is_some() || self.max.is_some() {
            100
        } else {
            200
        }
    }
}

fn eval_tuple(exprs: &[BoxedExpr], env: &dyn EnvLike) -> Result<Vec<Value>> {
    exprs.iter().map(|e| e.eval(env)).collect()
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Side {
    Min,
    Max,
}

/// Already-evaluated, type-converted range bounds ready for byte encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedRange {
    pub min: Option<Vec<Value>>,
    pub max: Option<Vec<Value>>,
    pub exclusive: bool,
    pub exact: bool,
    pub reverse: bool,
}

fn convert_tuple(
    tuple: Vec<Value>,
    column_types: &[DataType],
    side: Side,
    both_present: bool,
    exclusive: &mut bool,
) -> Result<Vec<Value>> {
    tuple
        .into_iter()
        .zip(column_types.iter())
        .map(|(v, &ty)| convert_bound(v, ty, side, both_present, exclusive))
        .collect()
}

/// The numeric-conversion rule of spec §4.7: a double bound against an
/// integer(-family) column must be converted without silently losing
/// ordering semantics. Mutates `exclusive` in place per the min/max/BETWEEN
/// rules; leaves it untouched for every other combination.
fn convert_bound(
    value: Value,
    column_type: DataType,
    side: Side,
    both_present: bool,
    exclusive: &mut bool,
) -> Result<Value> {
    let is_integer_column = matches!(column_type, DataType::Integer | DataType::Bigint);
    if let (Value::Double(d), true) = (&value, is_integer_column) {
        if d.fract() == 0.0 {
            // round-valued double against an integer column: cast directly.
            return value.convert(column_type);
        }
        let ceiled = d.ceil();
        let ceiled_value = if matches!(column_type, DataType::Integer) {
            Value::Integer(ceiled as i32)
        } else {
            Value::Bigint(ceiled as i64)
        };
        match side {
            Side::Min => {
                *exclusive = false;
            }
            Side::Max => {
                *exclusive = !both_present;
            }
        }
        return Ok(ceiled_value);
    }
    value.convert(column_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Lit;

    struct NoEnv;
    impl EnvLike for NoEnv {
        fn column(&self, _name: &str) -> Option<Value> {
            None
        }
        fn positional_param(&self, _index: usize) -> Option<Value> {
            None
        }
        fn named_param(&self, _name: &str) -> Option<Value> {
            None
        }
    }

    fn range(min: Option<f64>, max: Option<f64>, exclusive: bool) -> RangeExpr {
        RangeExpr {
            min: min.map(|v| vec![Box::new(Lit(Value::Double(v))) as BoxedExpr]),
            max: max.map(|v| vec![Box::new(Lit(Value::Double(v))) as BoxedExpr]),
            exclusive,
            exact: false,
            reverse: false,
        }
    }

    #[test]
    fn max_side_non_round_double_against_bigint() {
        // a < 1.1 over a BIGINT column becomes a < 2 (scenario 3, spec §8).
        let r = range(None, Some(1.1), true);
        let typed = r.evaluate(&NoEnv, &[DataType::Bigint]).unwrap();
        assert_eq!(typed.max, Some(vec![Value::Bigint(2)]));
        assert!(typed.exclusive);
    }

    #[test]
    fn between_double_bounds_against_bigint() {
        // BETWEEN 1.1 AND 2.2 over BIGINT becomes >= 2 AND <= 3 (scenario 4).
        let r = range(Some(1.1), Some(2.2), false);
        let typed = r.evaluate(&NoEnv, &[DataType::Bigint, DataType::Bigint]).unwrap();
        assert_eq!(typed.min, Some(vec![Value::Bigint(2)]));
        assert_eq!(typed.max, Some(vec![Value::Bigint(3)]));
        assert!(!typed.exclusive);
    }

    #[test]
    fn round_valued_double_casts_directly() {
        let r = range(None, Some(2.0), false);
        let typed = r.evaluate(&NoEnv, &[DataType::Integer]).unwrap();
        assert_eq!(typed.max, Some(vec![Value::Integer(2)]));
        assert!(!typed.exclusive);
    }

    #[test]
    fn cost_estimate() {
        assert_eq!(
            RangeExpr {
                min: None,
                max: None,
                exclusive: false,
                exact: true,
                reverse: false
            }
            .cost(),
            1
        );
        assert_eq!(range(Some(1.0), Some(2.0), false).cost(), 50);
        assert_eq!(range(Some(1.0), None, false).cost(), 100);
        assert_eq!(range(None, None, false).cost(), 200);
    }
}
