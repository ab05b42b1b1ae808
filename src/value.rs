// src/value.rs - Telemetry reading values
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, VigilError};

/// A single telemetry reading
///
/// Readings are booleans, integers or floats, mirroring the parameter
/// dtypes a device configuration can declare. Serialized untagged so that
/// snapshots can carry plain JSON scalars.
///
/// # Examples
///
/// ```rust
/// use vigil::Value;
///
/// let int_val = Value::Int(42);
///
/// assert_eq!(int_val.as_float(), Some(42.0));
/// assert!(Value::Bool(true).to_numeric().is_err());
/// assert!(int_val.same_reading(&Value::Float(42.0)));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Boolean value
    Bool(bool),
    /// Integer value (64-bit)
    Int(i64),
    /// Floating-point value (64-bit)
    Float(f64),
}

impl Value {
    /// Convert to float if possible
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        }
    }

    /// Float view of a numeric reading, failing for booleans
    pub fn to_numeric(&self) -> Result<f64> {
        match self {
            Value::Float(f) => Ok(*f),
            Value::Int(i) => Ok(*i as f64),
            Value::Bool(_) => Err(VigilError::TypeMismatch {
                expected: "numeric",
                actual: self.type_name(),
            }),
        }
    }

    /// Exact comparison across numeric representations
    ///
    /// `Int(5)` and `Float(5.0)` are the same reading; booleans only match
    /// booleans.
    pub fn same_reading(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Bool(_), _) | (_, Value::Bool(_)) => false,
            (Value::Int(a), Value::Int(b)) => a == b,
            (a, b) => a.as_float() == b.as_float(),
        }
    }

    /// Get the type name of this value
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}
