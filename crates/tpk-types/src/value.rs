use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::tag::TypeTag;
use crate::wire;

/// The closed set of column types a packer can store.
///
/// Each type carries its own [`TypeTag`] and its encode/decode functions;
/// [`ColumnType::from_tag`] resolves a stored tag back to the type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    Bool,
    I32,
    I64,
    U32,
    U64,
    F32,
    F64,
    /// UTF-8 string, length-prefixed.
    Str,
    /// Opaque byte string, length-prefixed.
    Bytes,
}

/// Current on-disk version of every built-in column encoding.
const SCALAR_VERSION: u32 = 1;

impl ColumnType {
    pub const ALL: [ColumnType; 9] = [
        Self::Bool,
        Self::I32,
        Self::I64,
        Self::U32,
        Self::U64,
        Self::F32,
        Self::F64,
        Self::Str,
        Self::Bytes,
    ];

    /// Short type name used in tags.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::U32 => "u32",
            Self::U64 => "u64",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::Str => "str",
            Self::Bytes => "bytes",
        }
    }

    pub fn tag(&self) -> TypeTag {
        TypeTag::new(self.name(), SCALAR_VERSION)
    }

    /// Resolve a stored tag to the column type that can decode it.
    pub fn from_tag(tag: &TypeTag) -> Result<Self, TypeError> {
        let ty = Self::ALL
            .into_iter()
            .find(|ty| ty.name() == tag.name())
            .ok_or_else(|| TypeError::UnknownType(tag.to_string()))?;
        ty.tag().ensure_compatible(tag)?;
        Ok(ty)
    }

    /// Fixed encoded width, or `None` for length-prefixed types.
    pub fn fixed_width(&self) -> Option<usize> {
        match self {
            Self::Bool => Some(1),
            Self::I32 | Self::U32 | Self::F32 => Some(4),
            Self::I64 | Self::U64 | Self::F64 => Some(8),
            Self::Str | Self::Bytes => None,
        }
    }

    /// The value a freshly allocated row holds in a column of this type.
    pub fn default_value(&self) -> Value {
        match self {
            Self::Bool => Value::Bool(false),
            Self::I32 => Value::I32(0),
            Self::I64 => Value::I64(0),
            Self::U32 => Value::U32(0),
            Self::U64 => Value::U64(0),
            Self::F32 => Value::F32(0.0),
            Self::F64 => Value::F64(0.0),
            Self::Str => Value::Str(String::new()),
            Self::Bytes => Value::Bytes(Vec::new()),
        }
    }

    /// Append the encoding of `value`. Scalars are little-endian.
    pub fn encode(&self, value: &Value, buf: &mut Vec<u8>) -> Result<(), TypeError> {
        match (self, value) {
            (Self::Bool, Value::Bool(v)) => buf.push(u8::from(*v)),
            (Self::I32, Value::I32(v)) => buf.extend_from_slice(&v.to_le_bytes()),
            (Self::I64, Value::I64(v)) => buf.extend_from_slice(&v.to_le_bytes()),
            (Self::U32, Value::U32(v)) => buf.extend_from_slice(&v.to_le_bytes()),
            (Self::U64, Value::U64(v)) => buf.extend_from_slice(&v.to_le_bytes()),
            (Self::F32, Value::F32(v)) => buf.extend_from_slice(&v.to_le_bytes()),
            (Self::F64, Value::F64(v)) => buf.extend_from_slice(&v.to_le_bytes()),
            (Self::Str, Value::Str(v)) => wire::put_str(buf, v),
            (Self::Bytes, Value::Bytes(v)) => wire::put_bytes(buf, v),
            _ => {
                return Err(TypeError::ValueMismatch {
                    expected: self.name().to_string(),
                    actual: value.column_type().name().to_string(),
                })
            }
        }
        Ok(())
    }

    /// Decode one value of this type from the front of the cursor.
    pub fn decode(&self, input: &mut &[u8]) -> Result<Value, TypeError> {
        let value = match self {
            Self::Bool => Value::Bool(wire::take_array::<1>(input)?[0] != 0),
            Self::I32 => Value::I32(i32::from_le_bytes(wire::take_array(input)?)),
            Self::I64 => Value::I64(i64::from_le_bytes(wire::take_array(input)?)),
            Self::U32 => Value::U32(u32::from_le_bytes(wire::take_array(input)?)),
            Self::U64 => Value::U64(u64::from_le_bytes(wire::take_array(input)?)),
            Self::F32 => Value::F32(f32::from_le_bytes(wire::take_array(input)?)),
            Self::F64 => Value::F64(f64::from_le_bytes(wire::take_array(input)?)),
            Self::Str => Value::Str(wire::take_str(input)?),
            Self::Bytes => Value::Bytes(wire::take_bytes(input)?.to_vec()),
        };
        Ok(value)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single cell value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    I32(i32),
    I64(i64),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Str(String),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn column_type(&self) -> ColumnType {
        match self {
            Self::Bool(_) => ColumnType::Bool,
            Self::I32(_) => ColumnType::I32,
            Self::I64(_) => ColumnType::I64,
            Self::U32(_) => ColumnType::U32,
            Self::U64(_) => ColumnType::U64,
            Self::F32(_) => ColumnType::F32,
            Self::F64(_) => ColumnType::F64,
            Self::Str(_) => ColumnType::Str,
            Self::Bytes(_) => ColumnType::Bytes,
        }
    }

    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::I32(v) => Some(f64::from(*v)),
            Self::I64(v) => Some(*v as f64),
            Self::U32(v) => Some(f64::from(*v)),
            Self::U64(v) => Some(*v as f64),
            Self::F32(v) => Some(f64::from(*v)),
            Self::F64(v) => Some(*v),
            Self::Bool(_) | Self::Str(_) | Self::Bytes(_) => None,
        }
    }

    fn as_integer(&self) -> Option<i128> {
        match self {
            Self::I32(v) => Some(i128::from(*v)),
            Self::I64(v) => Some(i128::from(*v)),
            Self::U32(v) => Some(i128::from(*v)),
            Self::U64(v) => Some(i128::from(*v)),
            _ => None,
        }
    }

    /// Equality by content rather than representation: numbers compare by
    /// value across widths and signedness, so `I32(5)`, `U64(5)` and
    /// `F64(5.0)` are all equal. Non-numeric values must match exactly.
    pub fn content_eq(&self, other: &Value) -> bool {
        if let (Some(a), Some(b)) = (self.as_integer(), other.as_integer()) {
            return a == b;
        }
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => a == b,
            (None, None) => self == other,
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::I32(v) => write!(f, "{v}"),
            Self::I64(v) => write!(f, "{v}"),
            Self::U32(v) => write!(f, "{v}"),
            Self::U64(v) => write!(f, "{v}"),
            Self::F32(v) => write!(f, "{v}"),
            Self::F64(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "{v:?}"),
            Self::Bytes(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

macro_rules! value_conversions {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Self::$variant(v)
                }
            }

            impl TryFrom<Value> for $ty {
                type Error = TypeError;

                fn try_from(value: Value) -> Result<Self, Self::Error> {
                    match value {
                        Value::$variant(v) => Ok(v),
                        other => Err(TypeError::ValueMismatch {
                            expected: ColumnType::$variant.name().to_string(),
                            actual: other.column_type().name().to_string(),
                        }),
                    }
                }
            }
        )*
    };
}

value_conversions! {
    Bool => bool,
    I32 => i32,
    I64 => i64,
    U32 => u32,
    U64 => u64,
    F32 => f32,
    F64 => f64,
    Str => String,
    Bytes => Vec<u8>,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

/// A row: one value per schema column, in schema order.
pub type Row = Vec<Value>;
