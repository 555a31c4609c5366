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

use std::cmp::Ordering;

use chrono::{DateTime, TimeZone, Utc};

use crate::error::{Error, Result};
use crate::schema::DataType;

/// A typed value, tagged by variant (spec §3).
///
/// `Timestamp` holds a UTC instant at microsecond precision, stored as
/// microseconds since the Unix epoch (matches the key-encoding epoch used
/// in `codec.rs`).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i32),
    Bigint(i64),
    Double(f64),
    Timestamp(i64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::Boolean(_) => Some(DataType::Boolean),
            Value::Integer(_) => Some(DataType::Integer),
            Value::Bigint(_) => Some(DataType::Bigint),
            Value::Double(_) => Some(DataType::Double),
            Value::Timestamp(_) => Some(DataType::Timestamp),
            Value::Text(_) => Some(DataType::Text),
            Value::Blob(_) => Some(DataType::Blob),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric-promoting comparison (spec §3): null equals only null;
    /// integer/bigint/double compare after lossless-preferring promotion to
    /// `f64`, with NaN ordered consistently greater than every other double
    /// (matching the sign-bit-flip encoding in `codec.rs`).
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        use Value::*;
        match (self, other) {
            (Null, Null) => Some(Ordering::Equal),
            (Null, _) | (_, Null) => None,
            (Boolean(a), Boolean(b)) => a.partial_cmp(b),
            (Text(a), Text(b)) => a.partial_cmp(b),
            (Blob(a), Blob(b)) => a.partial_cmp(b),
            (Timestamp(a), Timestamp(b)) => a.partial_cmp(b),
            (Integer(a), Integer(b)) => a.partial_cmp(b),
            (Bigint(a), Bigint(b)) => a.partial_cmp(b),
            (Integer(a), Bigint(b)) => (*a as i64).partial_cmp(b),
            (Bigint(a), Integer(b)) => a.partial_cmp(&(*b as i64)),
            (Double(a), Double(b)) => cmp_f64(*a, *b),
            (Integer(a), Double(b)) => cmp_f64(*a as f64, *b),
            (Double(a), Integer(b)) => cmp_f64(*a, *b as f64),
            (Bigint(a), Double(b)) => cmp_f64(*a as f64, *b),
            (Double(a), Bigint(b)) => cmp_f64(*a, *b as f64),
            _ => None,
        }
    }

    pub fn truthy(&self) -> bool {
        matches!(self, Value::Boolean(true))
    }

    /// Converts `self` into a value bound to `target`, applying the
    /// write-path conversion rules of spec §4.1.
    pub fn convert(&self, target: DataType) -> Result<Value> {
        use Value::*;
        if matches!(self, Null) {
            return Ok(Null);
        }
        match (self, target) {
            (Boolean(_), DataType::Boolean) => Ok(self.clone()),
            (Text(_), DataType::Text) => Ok(self.clone()),
            (Blob(_), DataType::Blob) => Ok(self.clone()),
            (Timestamp(_), DataType::Timestamp) => Ok(self.clone()),

            (Integer(v), DataType::Integer) => Ok(Integer(*v)),
            (Integer(v), DataType::Bigint) => Ok(Bigint(*v as i64)),
            (Bigint(v), DataType::Bigint) => Ok(Bigint(*v)),
            (Bigint(v), DataType::Integer) => i32::try_from(*v)
                .map(Integer)
                .map_err(|_| mismatch(self, target)),

            (Integer(v), DataType::Double) => Ok(Double(*v as f64)),
            (Bigint(v), DataType::Double) => {
                if is_lossless_i64_to_f64(*v) {
                    Ok(Double(*v as f64))
                } else {
                    Err(mismatch(self, target))
                }
            }
            (Double(v), DataType::Integer) => {
                if v.fract() == 0.0 && *v >= i32::MIN as f64 && *v <= i32::MAX as f64 {
                    Ok(Integer(*v as i32))
                } else {
                    Err(mismatch(self, target))
                }
            }
            (Double(v), DataType::Bigint) => {
                if v.fract() == 0.0 && *v >= i64::MIN as f64 && *v <= i64::MAX as f64 {
                    Ok(Bigint(*v as i64))
                } else {
                    Err(mismatch(self, target))
                }
            }
            (Double(v), DataType::Double) => Ok(Double(*v)),

            _ => Err(mismatch(self, target)),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Bigint(_) => "bigint",
            Value::Double(_) => "double",
            Value::Timestamp(_) => "timestamp",
            Value::Text(_) => "text",
            Value::Blob(_) => "blob",
        }
    }

    /// Wraps a UTC instant as a [`Value::Timestamp`], converting down to
    /// microsecond precision (spec §3's storage granularity).
    pub fn from_datetime(dt: DateTime<Utc>) -> Value {
        Value::Timestamp(dt.timestamp_micros())
    }

    /// Recovers the UTC instant a [`Value::Timestamp`] denotes, for display
    /// or external formatting. `None` for any other variant.
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(micros) => Utc.timestamp_micros(*micros).single(),
            _ => None,
        }
    }
}

fn is_lossless_i64_to_f64(v: i64) -> bool {
    const MAX_EXACT: i64 = 1 << 53;
    (-MAX_EXACT..=MAX_EXACT).contains(&v)
}

fn cmp_f64(a: f64, b: f64) -> Option<Ordering> {
    // NaN sorts consistently greater than every other double, matching the
    // bit-flip transform in `codec.rs` (spec §4.1).
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Some(Ordering::Equal),
        (true, false) => Some(Ordering::Greater),
        (false, true) => Some(Ordering::Less),
        (false, false) => a.partial_cmp(&b),
    }
}

fn mismatch(value: &Value, target: DataType) -> Error {
    Error::TypeMismatch {
        from: value.type_name().to_string(),
        to: target.name().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_equals_only_null() {
        assert_eq!(Value::Null.compare(&Value::Null), Some(Ordering::Equal));
        assert_eq!(Value::Null.compare(&Value::Integer(0)), None);
    }

    #[test]
    fn cross_type_numeric_promotion() {
        assert_eq!(
            Value::Integer(1).compare(&Value::Double(1.0)),
            Some(Ordering::Equal)
        );
        assert_eq!(
            Value::Integer(1).compare(&Value::Double(1.5)),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn bigint_to_integer_overflow_is_type_mismatch() {
        let v = Value::Bigint(i64::MAX);
        assert!(v.convert(DataType::Integer).is_err());
    }

    #[test]
    fn non_round_double_to_integer_fails() {
        let v = Value::Double(1.5);
        assert!(v.convert(DataType::Integer).is_err());
        assert!(Value::Double(2.0).convert(DataType::Integer).is_ok());
    }

    #[test]
    fn datetime_roundtrips_through_timestamp() {
        let dt = chrono::Utc.with_ymd_and_hms(2024, 3, 5, 12, 30, 0).unwrap();
        let value = Value::from_datetime(dt);
        assert_eq!(value, Value::Timestamp(dt.timestamp_micros()));
        assert_eq!(value.as_datetime(), Some(dt));
    }
}
