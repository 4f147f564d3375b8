//! Values and row serialization for MiniDB
//!
//! This module defines how data values are represented in memory and how a
//! row of values is laid out inside a page slot.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A value in the database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    /// NULL value
    Null,
    /// 64-bit integer
    Int(i64),
    /// 64-bit float
    Float(f64),
    /// String value
    Varchar(String),
}

/// A row is an ordered tuple of values.
pub type Row = Vec<Value>;

// Implement PartialEq manually so Float compares bitwise, which lets rows
// serve as grouping keys in hash maps.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Varchar(a), Value::Varchar(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl std::hash::Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Int(v) => v.hash(state),
            Value::Float(v) => v.to_bits().hash(state),
            Value::Varchar(v) => v.hash(state),
        }
    }
}

impl Value {
    /// Check if this value is NULL
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get the type name of this value
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Int(_) => "INT",
            Value::Float(_) => "FLOAT",
            Value::Varchar(_) => "VARCHAR",
        }
    }

    /// Try to view this value as a float, promoting integers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Compare two values.
    ///
    /// Returns `Ok(None)` when either side is NULL (the comparison is
    /// unknown), an ordering for compatible variants, and a type error for
    /// incompatible ones. Integers and floats promote.
    pub fn compare(&self, other: &Value) -> Result<Option<Ordering>> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => Ok(None),
            (Value::Int(a), Value::Int(b)) => Ok(Some(a.cmp(b))),
            (Value::Varchar(a), Value::Varchar(b)) => Ok(Some(a.cmp(b))),
            (Value::Float(a), Value::Float(b)) => Ok(a.partial_cmp(b)),
            (Value::Int(a), Value::Float(b)) => Ok((*a as f64).partial_cmp(b)),
            (Value::Float(a), Value::Int(b)) => Ok(a.partial_cmp(&(*b as f64))),
            _ => Err(Error::Type(format!(
                "cannot compare {} with {}",
                self.type_name(),
                other.type_name()
            ))),
        }
    }

    /// Add two values with int/float promotion.
    pub fn add(&self, other: &Value) -> Result<Value> {
        self.arith(other, "+", |a, b| a.checked_add(b), |a, b| a + b)
    }

    /// Subtract two values with int/float promotion.
    pub fn sub(&self, other: &Value) -> Result<Value> {
        self.arith(other, "-", |a, b| a.checked_sub(b), |a, b| a - b)
    }

    /// Multiply two values with int/float promotion.
    pub fn mul(&self, other: &Value) -> Result<Value> {
        self.arith(other, "*", |a, b| a.checked_mul(b), |a, b| a * b)
    }

    /// Divide two values with int/float promotion.
    pub fn div(&self, other: &Value) -> Result<Value> {
        match other {
            Value::Int(0) => return Err(Error::Runtime("division by zero".to_string())),
            Value::Float(f) if *f == 0.0 => {
                return Err(Error::Runtime("division by zero".to_string()))
            }
            _ => {}
        }
        self.arith(other, "/", |a, b| a.checked_div(b), |a, b| a / b)
    }

    fn arith(
        &self,
        other: &Value,
        op: &str,
        int_op: impl Fn(i64, i64) -> Option<i64>,
        float_op: impl Fn(f64, f64) -> f64,
    ) -> Result<Value> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
            (Value::Int(a), Value::Int(b)) => int_op(*a, *b)
                .map(Value::Int)
                .ok_or_else(|| Error::Runtime(format!("integer overflow in {} {} {}", a, op, b))),
            (Value::Float(a), Value::Float(b)) => Ok(Value::Float(float_op(*a, *b))),
            (Value::Int(a), Value::Float(b)) => Ok(Value::Float(float_op(*a as f64, *b))),
            (Value::Float(a), Value::Int(b)) => Ok(Value::Float(float_op(*a, *b as f64))),
            _ => Err(Error::Type(format!(
                "cannot apply '{}' to {} and {}",
                op,
                self.type_name(),
                other.type_name()
            ))),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(n) => write!(f, "{}", n),
            Value::Varchar(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Varchar(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Varchar(v)
    }
}

// Value tags in the serialized row format.
const TAG_NULL: u8 = 0;
const TAG_INT: u8 = 1;
const TAG_FLOAT: u8 = 2;
const TAG_VARCHAR: u8 = 3;

/// Serialize a row to its on-page byte layout: one tag byte per value, then
/// an 8-byte little-endian payload for INT/FLOAT or a 4-byte length plus
/// UTF-8 bytes for VARCHAR. NULL is the tag alone.
pub fn encode_row(row: &[Value]) -> Vec<u8> {
    let mut bytes = Vec::new();
    for value in row {
        match value {
            Value::Null => bytes.push(TAG_NULL),
            Value::Int(i) => {
                bytes.push(TAG_INT);
                bytes.extend_from_slice(&i.to_le_bytes());
            }
            Value::Float(f) => {
                bytes.push(TAG_FLOAT);
                bytes.extend_from_slice(&f.to_le_bytes());
            }
            Value::Varchar(s) => {
                bytes.push(TAG_VARCHAR);
                let s_bytes = s.as_bytes();
                bytes.extend_from_slice(&(s_bytes.len() as u32).to_le_bytes());
                bytes.extend_from_slice(s_bytes);
            }
        }
    }
    bytes
}

/// Deserialize a row from its on-page byte layout. The slot length bounds
/// the buffer, so decoding runs until the buffer is exhausted.
pub fn decode_row(bytes: &[u8]) -> Result<Row> {
    let mut values = Vec::new();
    let mut offset = 0;

    while offset < bytes.len() {
        let tag = bytes[offset];
        offset += 1;

        match tag {
            TAG_NULL => values.push(Value::Null),
            TAG_INT => {
                let raw: [u8; 8] = bytes
                    .get(offset..offset + 8)
                    .and_then(|s| s.try_into().ok())
                    .ok_or_else(|| Error::Runtime("truncated INT value in row".to_string()))?;
                values.push(Value::Int(i64::from_le_bytes(raw)));
                offset += 8;
            }
            TAG_FLOAT => {
                let raw: [u8; 8] = bytes
                    .get(offset..offset + 8)
                    .and_then(|s| s.try_into().ok())
                    .ok_or_else(|| Error::Runtime("truncated FLOAT value in row".to_string()))?;
                values.push(Value::Float(f64::from_le_bytes(raw)));
                offset += 8;
            }
            TAG_VARCHAR => {
                let raw: [u8; 4] = bytes
                    .get(offset..offset + 4)
                    .and_then(|s| s.try_into().ok())
                    .ok_or_else(|| Error::Runtime("truncated VARCHAR length in row".to_string()))?;
                let len = u32::from_le_bytes(raw) as usize;
                offset += 4;
                let s_bytes = bytes
                    .get(offset..offset + len)
                    .ok_or_else(|| Error::Runtime("truncated VARCHAR value in row".to_string()))?;
                let s = String::from_utf8(s_bytes.to_vec())
                    .map_err(|e| Error::Runtime(format!("invalid UTF-8 in row: {}", e)))?;
                values.push(Value::Varchar(s));
                offset += len;
            }
            _ => return Err(Error::Runtime(format!("unknown value tag: {}", tag))),
        }
    }

    Ok(values)
}
