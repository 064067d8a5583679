//! # Scalar Value Types
//!
//! The closed set of scalar types carried by relations: `int` (32-bit
//! signed), `long` (64-bit signed), `real` (IEEE-754 64-bit) and `string`
//! (byte length bounded by [`MAX_STRING`](crate::limits::MAX_STRING)).
//!
//! Literal parsing is overflow-checked: values are accumulated in an
//! unsigned 64-bit intermediate and rejected when they leave the target
//! type's range, so `2147483648` fails to parse as an `int` while
//! `-2147483648` succeeds. Reals accept only the plain `[-+]?ddd[.ddd]`
//! form, which keeps rendered values re-parseable.

use std::cmp::Ordering;
use std::fmt;

use crate::error::{ValueError, ValueResult};
use crate::limits::MAX_STRING;

/// Scalar type tags, rendered as `int`, `long`, `real`, `string`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Int,
    Long,
    Real,
    Str,
}

impl DataType {
    /// Parse a type name as it appears in CSV headers and program source
    pub fn from_name(name: &str) -> Option<DataType> {
        match name {
            "int" => Some(DataType::Int),
            "long" => Some(DataType::Long),
            "real" => Some(DataType::Real),
            "string" => Some(DataType::Str),
            _ => None,
        }
    }

    pub fn is_numeric(self) -> bool {
        !matches!(self, DataType::Str)
    }

    /// Parse a literal into a value of this type
    pub fn parse(self, s: &str) -> ValueResult<Value> {
        let bad = || ValueError::BadLiteral(s.to_string(), self);
        match self {
            DataType::Int => parse_int(s).map(Value::Int).ok_or_else(bad),
            DataType::Long => parse_long(s).map(Value::Long).ok_or_else(bad),
            DataType::Real => parse_real(s).map(Value::Real).ok_or_else(bad),
            DataType::Str => {
                if s.len() > MAX_STRING {
                    Err(ValueError::StringTooLong(MAX_STRING))
                } else {
                    Ok(Value::Str(s.to_string()))
                }
            }
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Int => "int",
            DataType::Long => "long",
            DataType::Real => "real",
            DataType::Str => "string",
        };
        write!(f, "{name}")
    }
}

/// A typed scalar value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i32),
    Long(i64),
    Real(f64),
    Str(String),
}

impl Value {
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Int(_) => DataType::Int,
            Value::Long(_) => DataType::Long,
            Value::Real(_) => DataType::Real,
            Value::Str(_) => DataType::Str,
        }
    }

    /// Type-directed ordering: numeric compare for numeric types,
    /// lexicographic for strings. Values of different types never meet in
    /// one attribute position.
    pub fn cmp_value(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Int(l), Value::Int(r)) => l.cmp(r),
            (Value::Long(l), Value::Long(r)) => l.cmp(r),
            (Value::Real(l), Value::Real(r)) => l.partial_cmp(r).unwrap_or(Ordering::Equal),
            (Value::Str(l), Value::Str(r)) => l.cmp(r),
            _ => unreachable!("comparing values of different types"),
        }
    }

    /// Number of bytes [`encode`](Self::encode) appends
    pub fn encoded_size(&self) -> usize {
        match self {
            Value::Int(_) => 4,
            Value::Long(_) | Value::Real(_) => 8,
            Value::Str(s) => s.len(),
        }
    }

    /// Append the little-endian binary form
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Value::Int(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::Long(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::Real(v) => out.extend_from_slice(&v.to_bits().to_le_bytes()),
            Value::Str(s) => out.extend_from_slice(s.as_bytes()),
        }
    }

    /// Decode `size` bytes of `ty`-typed data. `None` on short or malformed
    /// input.
    pub fn decode(bytes: &[u8], ty: DataType) -> Option<Value> {
        match ty {
            DataType::Int => Some(Value::Int(i32::from_le_bytes(bytes.try_into().ok()?))),
            DataType::Long => Some(Value::Long(i64::from_le_bytes(bytes.try_into().ok()?))),
            DataType::Real => Some(Value::Real(f64::from_bits(u64::from_le_bytes(
                bytes.try_into().ok()?,
            )))),
            DataType::Str => Some(Value::Str(String::from_utf8(bytes.to_vec()).ok()?)),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Long(v) => write!(f, "{v}"),
            Value::Real(v) => write!(f, "{v}"),
            Value::Str(s) => write!(f, "{s}"),
        }
    }
}

fn split_sign(s: &str) -> Option<(i8, &str)> {
    let mut chars = s.chars();
    match chars.next()? {
        '-' => Some((-1, &s[1..])),
        '+' => Some((1, &s[1..])),
        c if c.is_ascii_digit() || c == '.' => Some((1, s)),
        _ => None,
    }
}

/// Unsigned accumulation with overflow detection
fn parse_unsigned(s: &str) -> Option<u64> {
    if s.is_empty() {
        return None;
    }
    let mut val: u64 = 0;
    for c in s.chars() {
        let d = c.to_digit(10)? as u64;
        val = val.checked_mul(10)?.checked_add(d)?;
    }
    Some(val)
}

pub(crate) fn parse_int(s: &str) -> Option<i32> {
    let (sign, digits) = split_sign(s)?;
    let mag = parse_unsigned(digits)?;
    if sign > 0 && mag > i32::MAX as u64 {
        return None;
    }
    if sign < 0 && mag > i32::MAX as u64 + 1 {
        return None;
    }
    Some((i64::from(sign) * mag as i64) as i32)
}

pub(crate) fn parse_long(s: &str) -> Option<i64> {
    let (sign, digits) = split_sign(s)?;
    let mag = parse_unsigned(digits)?;
    if sign > 0 && mag > i64::MAX as u64 {
        return None;
    }
    if sign < 0 && mag > i64::MAX as u64 + 1 {
        return None;
    }
    Some((i128::from(sign) * mag as i128) as i64)
}

/// Plain decimal reals only; no exponent form, and a trailing `.` is
/// rejected.
pub(crate) fn parse_real(s: &str) -> Option<f64> {
    let (sign, rest) = split_sign(s)?;
    if rest.is_empty() {
        return None;
    }

    let (whole, fract) = match rest.find('.') {
        Some(idx) => {
            let fract = &rest[idx + 1..];
            if fract.is_empty() {
                return None;
            }
            (&rest[..idx], Some(fract))
        }
        None => (rest, None),
    };

    let mut val: f64 = 0.0;
    for c in whole.chars() {
        val = 10.0 * val + f64::from(c.to_digit(10)?);
    }
    if let Some(fract) = fract {
        let mut div = 10.0;
        for c in fract.chars() {
            val += f64::from(c.to_digit(10)?) / div;
            div *= 10.0;
        }
    }

    Some(f64::from(sign) * val)
}
