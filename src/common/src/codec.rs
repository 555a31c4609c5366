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

//! Type-tagged, order-preserving binary codec (C1, spec §4.1).
//!
//! Two independent encodings live here:
//!
//! - [`encode_key`]/[`decode_key`]: order-preserving, used for primary keys
//!   and indexed column tuples. `memcmp` of two encodings must equal the
//!   logical comparison of the decoded tuples.
//! - [`encode_row`]/[`decode_row`]: read-optimized, used for the row bytes
//!   stored under a table's primary key. Not order preserving.

use byteorder::{BigEndian, ByteOrder};
use bytes::{Buf, BufMut};
use tracing::warn;

use crate::error::{Error, Result};
use crate::schema::DataType;
use crate::value::Value;

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_BIGINT: u8 = 3;
const TAG_DOUBLE: u8 = 4;
const TAG_TIMESTAMP: u8 = 5;
const TAG_TEXT: u8 = 6;
const TAG_BLOB: u8 = 7;

fn tag_of(value: &Value) -> u8 {
    match value {
        Value::Null => TAG_NULL,
        Value::Boolean(_) => TAG_BOOL,
        Value::Integer(_) => TAG_INT,
        Value::Bigint(_) => TAG_BIGINT,
        Value::Double(_) => TAG_DOUBLE,
        Value::Timestamp(_) => TAG_TIMESTAMP,
        Value::Text(_) => TAG_TEXT,
        Value::Blob(_) => TAG_BLOB,
    }
}

// ---- order-preserving integer encodings ----

fn encode_i32_ordered(v: i32) -> [u8; 4] {
    let flipped = (v as u32) ^ 0x8000_0000;
    flipped.to_be_bytes()
}

fn decode_i32_ordered(bytes: &[u8]) -> i32 {
    let flipped = BigEndian::read_u32(bytes);
    (flipped ^ 0x8000_0000) as i32
}

fn encode_i64_ordered(v: i64) -> [u8; 8] {
    let flipped = (v as u64) ^ 0x8000_0000_0000_0000;
    flipped.to_be_bytes()
}

fn decode_i64_ordered(bytes: &[u8]) -> i64 {
    let flipped = BigEndian::read_u64(bytes);
    (flipped ^ 0x8000_0000_0000_0000) as i64
}

/// IEEE-754 big-endian with sign-dependent bit flip (spec §4.1): flips the
/// sign bit for non-negative doubles, flips every bit for negative ones.
/// This yields `memcmp` order equal to numeric order, with NaN sorting
/// consistently at the high end (matching [`Value::compare`]'s rule).
fn encode_f64_ordered(v: f64) -> [u8; 8] {
    let bits = v.to_bits();
    let flipped = if bits & 0x8000_0000_0000_0000 == 0 {
        bits | 0x8000_0000_0000_0000
    } else {
        !bits
    };
    flipped.to_be_bytes()
}

fn decode_f64_ordered(bytes: &[u8]) -> f64 {
    let flipped = BigEndian::read_u64(bytes);
    let bits = if flipped & 0x8000_0000_0000_0000 != 0 {
        flipped & !0x8000_0000_0000_0000
    } else {
        !flipped
    };
    f64::from_bits(bits)
}

/// Escapes embedded `0x00` bytes as `0x00 0xFF` and appends the `0x00`
/// terminator (spec §4.1), so order is preserved and the terminator is
/// unambiguous.
fn encode_bytes_ordered(bytes: &[u8], out: &mut Vec<u8>) {
    for &b in bytes {
        if b == 0x00 {
            out.put_u8(0x00);
            out.put_u8(0xFF);
        } else {
            out.put_u8(b);
        }
    }
    out.put_u8(0x00);
}

/// Reads an escaped, terminated byte string; returns the unescaped bytes
/// and the number of input bytes consumed (including the terminator).
fn decode_bytes_ordered(input: &[u8]) -> Result<(Vec<u8>, usize)> {
    let mut out = Vec::new();
    let mut i = 0;
    loop {
        if i >= input.len() {
            return Err(Error::CorruptEncoding(
                "unterminated escaped byte string".to_string(),
            ));
        }
        let b = input[i];
        if b == 0x00 {
            if i + 1 < input.len() && input[i + 1] == 0xFF {
                out.push(0x00);
                i += 2;
            } else {
                // bare terminator
                i += 1;
                return Ok((out, i));
            }
        } else {
            out.push(b);
            i += 1;
        }
    }
}

/// Encodes one value into its order-preserving byte form and appends it to
/// `out` (spec §4.1). Composite keys concatenate these per-field.
pub fn encode_value(value: &Value, out: &mut Vec<u8>) {
    out.put_u8(tag_of(value));
    match value {
        Value::Null => {}
        Value::Boolean(b) => out.put_u8(if *b { 1 } else { 0 }),
        Value::Integer(v) => out.extend_from_slice(&encode_i32_ordered(*v)),
        Value::Bigint(v) => out.extend_from_slice(&encode_i64_ordered(*v)),
        Value::Double(v) => out.extend_from_slice(&encode_f64_ordered(*v)),
        Value::Timestamp(v) => out.extend_from_slice(&encode_i64_ordered(*v)),
        Value::Text(s) => encode_bytes_ordered(s.as_bytes(), out),
        Value::Blob(b) => encode_bytes_ordered(b, out),
    }
}

/// Decodes one value from the front of `input`; returns the value and the
/// number of bytes consumed, so a composite key can be split unambiguously.
pub fn decode_value(input: &[u8]) -> Result<(Value, usize)> {
    if input.is_empty() {
        return Err(Error::CorruptEncoding("empty input".to_string()));
    }
    let tag = input[0];
    let rest = &input[1..];
    match tag {
        TAG_NULL => Ok((Value::Null, 1)),
        TAG_BOOL => {
            let b = *rest
                .first()
                .ok_or_else(|| Error::CorruptEncoding("truncated boolean".to_string()))?;
            Ok((Value::Boolean(b != 0), 2))
        }
        TAG_INT => {
            if rest.len() < 4 {
                return Err(Error::CorruptEncoding("truncated integer".to_string()));
            }
            Ok((Value::Integer(decode_i32_ordered(&rest[..4])), 5))
        }
        TAG_BIGINT => {
            if rest.len() < 8 {
                return Err(Error::CorruptEncoding("truncated bigint".to_string()));
            }
            Ok((Value::Bigint(decode_i64_ordered(&rest[..8])), 9))
        }
        TAG_DOUBLE => {
            if rest.len() < 8 {
                return Err(Error::CorruptEncoding("truncated double".to_string()));
            }
            Ok((Value::Double(decode_f64_ordered(&rest[..8])), 9))
        }
        TAG_TIMESTAMP => {
            if rest.len() < 8 {
                return Err(Error::CorruptEncoding("truncated timestamp".to_string()));
            }
            Ok((Value::Timestamp(decode_i64_ordered(&rest[..8])), 9))
        }
        TAG_TEXT => {
            let (bytes, consumed) = decode_bytes_ordered(rest)?;
            let s = String::from_utf8(bytes)
                .map_err(|e| Error::CorruptEncoding(format!("invalid utf8: {e}")))?;
            Ok((Value::Text(s), 1 + consumed))
        }
        TAG_BLOB => {
            let (bytes, consumed) = decode_bytes_ordered(rest)?;
            Ok((Value::Blob(bytes), 1 + consumed))
        }
        other => {
            warn!(tag = other, "decode_value: unknown type tag, encoding is corrupt");
            Err(Error::CorruptEncoding(format!("unknown type tag {other}")))
        }
    }
}

/// Concatenates the order-preserving encoding of each value in `values`
/// (spec §4.1): primary keys and indexed composite tuples both use this.
pub fn encode_key(values: &[Value]) -> Vec<u8> {
    let mut out = Vec::new();
    for v in values {
        encode_value(v, &mut out);
    }
    out
}

/// Decodes exactly `count` values from the front of a composite key.
pub fn decode_key(mut input: &[u8], count: usize) -> Result<Vec<Value>> {
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        let (v, consumed) = decode_value(input)?;
        values.push(v);
        input = &input[consumed..];
    }
    Ok(values)
}

/// Decodes every value packed into `input`, consuming the buffer fully.
pub fn decode_key_all(mut input: &[u8]) -> Result<Vec<Value>> {
    let mut values = Vec::new();
    while !input.is_empty() {
        let (v, consumed) = decode_value(input)?;
        values.push(v);
        input = &input[consumed..];
    }
    Ok(values)
}

// ---- row encoding (read-optimized, not order preserving) ----

/// Encodes a row's values against `schema` in declaration order (spec
/// §4.1). Each field is a type tag followed by fixed-width bytes for
/// scalars or a length-prefixed payload for `Text`/`Blob`; `Null` is a
/// single tag byte with no payload.
pub fn encode_row(values: &[Value], out: &mut Vec<u8>) {
    for v in values {
        out.put_u8(tag_of(v));
        match v {
            Value::Null => {}
            Value::Boolean(b) => out.put_u8(if *b { 1 } else { 0 }),
            Value::Integer(i) => out.put_i32(*i),
            Value::Bigint(i) => out.put_i64(*i),
            Value::Double(d) => out.put_f64(*d),
            Value::Timestamp(t) => out.put_i64(*t),
            Value::Text(s) => {
                out.put_u32(s.len() as u32);
                out.extend_from_slice(s.as_bytes());
            }
            Value::Blob(b) => {
                out.put_u32(b.len() as u32);
                out.extend_from_slice(b);
            }
        }
    }
}

/// Decodes a row's values against `schema`; the byte stream carries no
/// column names (spec §4.1) — the caller zips the result with `schema` to
/// recover a [`crate::row::Row`].
pub fn decode_row(mut input: &[u8], schema: &[DataType]) -> Result<Vec<Value>> {
    let mut values = Vec::with_capacity(schema.len());
    for _ in schema {
        if input.is_empty() {
            return Err(Error::CorruptEncoding("truncated row".to_string()));
        }
        let tag = input.get_u8();
        let value = match tag {
            TAG_NULL => Value::Null,
            TAG_BOOL => Value::Boolean(input.get_u8() != 0),
            TAG_INT => Value::Integer(input.get_i32()),
            TAG_BIGINT => Value::Bigint(input.get_i64()),
            TAG_DOUBLE => Value::Double(input.get_f64()),
            TAG_TIMESTAMP => Value::Timestamp(input.get_i64()),
            TAG_TEXT => {
                let len = input.get_u32() as usize;
                if input.remaining() < len {
                    return Err(Error::CorruptEncoding("truncated text".to_string()));
                }
                let bytes = input.copy_to_bytes(len);
                Value::Text(
                    String::from_utf8(bytes.to_vec())
                        .map_err(|e| Error::CorruptEncoding(format!("invalid utf8: {e}")))?,
                )
            }
            TAG_BLOB => {
                let len = input.get_u32() as usize;
                if input.remaining() < len {
                    return Err(Error::CorruptEncoding("truncated blob".to_string()));
                }
                Value::Blob(input.copy_to_bytes(len).to_vec())
            }
            other => return Err(Error::CorruptEncoding(format!("unknown type tag {other}"))),
        };
        values.push(value);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Ordering;

    fn roundtrip(v: Value) {
        let mut buf = Vec::new();
        encode_value(&v, &mut buf);
        let (decoded, consumed) = decode_value(&buf).unwrap();
        assert_eq!(decoded, v);
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn roundtrips_every_variant() {
        roundtrip(Value::Null);
        roundtrip(Value::Boolean(true));
        roundtrip(Value::Boolean(false));
        roundtrip(Value::Integer(-42));
        roundtrip(Value::Integer(i32::MIN));
        roundtrip(Value::Integer(i32::MAX));
        roundtrip(Value::Bigint(i64::MIN));
        roundtrip(Value::Bigint(i64::MAX));
        roundtrip(Value::Double(-1.5));
        roundtrip(Value::Double(0.0));
        roundtrip(Value::Double(f64::NAN));
        roundtrip(Value::Timestamp(-1));
        roundtrip(Value::Text("he\x00llo".to_string()));
        roundtrip(Value::Text(String::new()));
        roundtrip(Value::Blob(vec![0x00, 0xFF, 0x01]));
    }

    fn check_order(a: Value, b: Value) {
        let mut ea = Vec::new();
        let mut eb = Vec::new();
        encode_value(&a, &mut ea);
        encode_value(&b, &mut eb);
        let byte_order = ea.cmp(&eb);
        let logical_order = a.compare(&b).unwrap();
        assert_eq!(byte_order, logical_order, "{a:?} vs {b:?}");
    }

    #[test]
    fn memcmp_matches_logical_order_integers() {
        check_order(Value::Integer(-5), Value::Integer(5));
        check_order(Value::Integer(i32::MIN), Value::Integer(i32::MAX));
        check_order(Value::Integer(3), Value::Integer(3));
    }

    #[test]
    fn memcmp_matches_logical_order_bigint() {
        check_order(Value::Bigint(i64::MIN), Value::Bigint(0));
        check_order(Value::Bigint(-1), Value::Bigint(1));
    }

    #[test]
    fn memcmp_matches_logical_order_double() {
        check_order(Value::Double(-1.0), Value::Double(1.0));
        check_order(Value::Double(-0.5), Value::Double(-0.25));
        check_order(Value::Double(0.0), Value::Double(1.0));
        check_order(Value::Double(1e10), Value::Double(f64::NAN));
    }

    #[test]
    fn memcmp_matches_logical_order_text_and_blob() {
        check_order(Value::Text("a".to_string()), Value::Text("b".to_string()));
        check_order(
            Value::Text("ab".to_string()),
            Value::Text("abc".to_string()),
        );
        check_order(Value::Blob(vec![1, 2]), Value::Blob(vec![1, 2, 3]));
    }

    #[test]
    fn composite_key_matches_tuple_order() {
        let x = vec![Value::Integer(1), Value::Integer(9)];
        let y = vec![Value::Integer(1), Value::Integer(10)];
        let ex = encode_key(&x);
        let ey = encode_key(&y);
        assert_eq!(ex.cmp(&ey), Ordering::Less);
    }

    #[test]
    fn composite_key_decodes_unambiguously() {
        let values = vec![
            Value::Text("a\x00b".to_string()),
            Value::Integer(7),
            Value::Null,
        ];
        let encoded = encode_key(&values);
        let decoded = decode_key_all(&encoded).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn row_roundtrip() {
        let schema = vec![DataType::Integer, DataType::Text, DataType::Boolean];
        let values = vec![
            Value::Integer(5),
            Value::Text("hi".to_string()),
            Value::Null,
        ];
        let mut buf = Vec::new();
        encode_row(&values, &mut buf);
        let decoded = decode_row(&buf, &schema).unwrap();
        assert_eq!(decoded, values);
    }
}
