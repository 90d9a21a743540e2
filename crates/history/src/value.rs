//! State values: the tagged union stored in every interval.
//!
//! Every encoded value starts with a one-byte type tag, so a reader never
//! needs a schema to decode it:
//!
//! | Tag | Variant  | Payload                                  |
//! |-----|----------|------------------------------------------|
//! | 0   | `Null`   | none                                     |
//! | 1   | `Int`    | varint                                   |
//! | 2   | `Long`   | varint                                   |
//! | 3   | `Double` | 8 bytes, IEEE-754 little-endian          |
//! | 4   | `String` | varint length + UTF-8 bytes              |
//! | 5   | `Custom` | type id (u8) + varint length + raw bytes |

use crate::codec::{self, Encode};
use crate::error::{Result, StateError};
use std::fmt;
use std::io::{Read, Write};

const TAG_NULL: u8 = 0;
const TAG_INT: u8 = 1;
const TAG_LONG: u8 = 2;
const TAG_DOUBLE: u8 = 3;
const TAG_STRING: u8 = 4;
const TAG_CUSTOM: u8 = 5;

/// Upper bound on decoded string and custom payload lengths.
pub const MAX_PAYLOAD_LEN: usize = 16 * 1024 * 1024;

/// Value held by an attribute during an interval.
#[derive(Debug, Clone, Default)]
pub enum StateValue {
    /// Unknown or unset.
    #[default]
    Null,
    /// 32-bit integer.
    Int(i32),
    /// 64-bit integer.
    Long(i64),
    /// Double-precision float.
    Double(f64),
    /// UTF-8 string.
    String(String),
    /// Opaque payload interpreted by the caller, tagged with its own type id.
    Custom {
        /// Caller-defined payload type.
        type_id: u8,
        /// Raw payload bytes.
        payload: Vec<u8>,
    },
}

impl StateValue {
    /// Returns true for [`StateValue::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Short name of the value's type, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Int(_) => "int",
            Self::Long(_) => "long",
            Self::Double(_) => "double",
            Self::String(_) => "string",
            Self::Custom { .. } => "custom",
        }
    }

    /// Returns the integer if this is an `Int`.
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the integer if this is a `Long` or an `Int`.
    pub fn as_long(&self) -> Option<i64> {
        match self {
            Self::Long(v) => Some(*v),
            Self::Int(v) => Some(*v as i64),
            _ => None,
        }
    }

    /// Returns the float if this is a `Double`.
    pub fn as_double(&self) -> Option<f64> {
        match self {
            Self::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the string slice if this is a `String`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    fn tag(&self) -> u8 {
        match self {
            Self::Null => TAG_NULL,
            Self::Int(_) => TAG_INT,
            Self::Long(_) => TAG_LONG,
            Self::Double(_) => TAG_DOUBLE,
            Self::String(_) => TAG_STRING,
            Self::Custom { .. } => TAG_CUSTOM,
        }
    }

    /// Reads a value written by [`Encode::encode`].
    ///
    /// # Errors
    ///
    /// Returns `StateError::StoreCorrupted` on an unknown tag, an
    /// out-of-range int, or invalid UTF-8.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut tag = [0u8; 1];
        reader.read_exact(&mut tag)?;

        match tag[0] {
            TAG_NULL => Ok(Self::Null),
            TAG_INT => {
                let raw = codec::read_varint(reader)?;
                let value = i32::try_from(raw).map_err(|_| {
                    StateError::StoreCorrupted(format!("int state value {} out of range", raw))
                })?;
                Ok(Self::Int(value))
            }
            TAG_LONG => Ok(Self::Long(codec::read_varint(reader)?)),
            TAG_DOUBLE => {
                let mut buf = [0u8; 8];
                reader.read_exact(&mut buf)?;
                Ok(Self::Double(f64::from_le_bytes(buf)))
            }
            TAG_STRING => {
                let bytes = codec::read_bytes(reader, MAX_PAYLOAD_LEN)?;
                let s = String::from_utf8(bytes).map_err(|e| {
                    StateError::StoreCorrupted(format!("Invalid UTF-8 in string value: {}", e))
                })?;
                Ok(Self::String(s))
            }
            TAG_CUSTOM => {
                let mut type_id = [0u8; 1];
                reader.read_exact(&mut type_id)?;
                let payload = codec::read_bytes(reader, MAX_PAYLOAD_LEN)?;
                Ok(Self::Custom {
                    type_id: type_id[0],
                    payload,
                })
            }
            other => Err(StateError::StoreCorrupted(format!(
                "unknown state value tag {}",
                other
            ))),
        }
    }
}

impl Encode for StateValue {
    fn size_on_disk(&self) -> usize {
        1 + match self {
            Self::Null => 0,
            Self::Int(v) => codec::encoded_len(*v as i64),
            Self::Long(v) => codec::encoded_len(*v),
            Self::Double(_) => 8,
            Self::String(s) => codec::bytes_len(s.as_bytes()),
            Self::Custom { payload, .. } => 1 + codec::bytes_len(payload),
        }
    }

    fn encode<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&[self.tag()])?;
        match self {
            Self::Null => {}
            Self::Int(v) => codec::write_varint(writer, *v as i64)?,
            Self::Long(v) => codec::write_varint(writer, *v)?,
            Self::Double(v) => writer.write_all(&v.to_le_bytes())?,
            Self::String(s) => codec::write_bytes(writer, s.as_bytes())?,
            Self::Custom { type_id, payload } => {
                writer.write_all(&[*type_id])?;
                codec::write_bytes(writer, payload)?;
            }
        }
        Ok(())
    }
}

// Doubles compare by bit pattern so a NaN value equals itself and an
// unchanged NaN does not open a new interval.
impl PartialEq for StateValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Long(a), Self::Long(b)) => a == b,
            (Self::Double(a), Self::Double(b)) => a.to_bits() == b.to_bits(),
            (Self::String(a), Self::String(b)) => a == b,
            (
                Self::Custom { type_id: ta, payload: pa },
                Self::Custom { type_id: tb, payload: pb },
            ) => ta == tb && pa == pb,
            _ => false,
        }
    }
}

impl Eq for StateValue {}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Int(v) => write!(f, "{}", v),
            Self::Long(v) => write!(f, "{}", v),
            Self::Double(v) => write!(f, "{}", v),
            Self::String(s) => write!(f, "{}", s),
            Self::Custom { type_id, payload } => {
                write!(f, "custom#{}[{} bytes]", type_id, payload.len())
            }
        }
    }
}

impl From<i32> for StateValue {
    fn from(value: i32) -> Self {
        Self::Int(value)
    }
}

impl From<i64> for StateValue {
    fn from(value: i64) -> Self {
        Self::Long(value)
    }
}

impl From<f64> for StateValue {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<&str> for StateValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for StateValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl<T: Into<StateValue>> From<Option<T>> for StateValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}
