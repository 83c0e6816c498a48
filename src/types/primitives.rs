//! Primitive type implementations (bool, integers, floats).

use crate::error::{Error, Result};
use crate::protocol::types::{FormatCode, Oid, oid};

use super::{FromValue, ToWireValue, Value, preferred_format, write_len_prefixed};

fn decode_error(value: &Value, target: &str) -> Error {
    Error::Decode(format!("cannot decode {} value as {}", value.kind(), target))
}

/// Encode an integer for an integer target with range checking, or as decimal
/// text for targets exchanged in text format (e.g. NUMERIC).
fn encode_int(v: i64, from: &str, natural: Oid, target_oid: Oid, buf: &mut Vec<u8>) -> Result<()> {
    match target_oid {
        oid::INT2 => {
            let v = i16::try_from(v).map_err(|_| Error::overflow(from, "INT2"))?;
            buf.extend_from_slice(&2_i32.to_be_bytes());
            buf.extend_from_slice(&v.to_be_bytes());
        }
        oid::INT4 => {
            let v = i32::try_from(v).map_err(|_| Error::overflow(from, "INT4"))?;
            buf.extend_from_slice(&4_i32.to_be_bytes());
            buf.extend_from_slice(&v.to_be_bytes());
        }
        oid::INT8 => {
            buf.extend_from_slice(&8_i32.to_be_bytes());
            buf.extend_from_slice(&v.to_be_bytes());
        }
        oid::OID => {
            let v = u32::try_from(v).map_err(|_| Error::overflow(from, "OID"))?;
            buf.extend_from_slice(&4_i32.to_be_bytes());
            buf.extend_from_slice(&v.to_be_bytes());
        }
        _ if preferred_format(target_oid) == FormatCode::Text => {
            write_len_prefixed(buf, v.to_string().as_bytes())?;
        }
        _ => return Err(Error::type_mismatch(natural, target_oid)),
    }
    Ok(())
}

// === Boolean ===

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Bool(v) => Ok(v),
            Value::Null => Err(Error::Decode("unexpected NULL value".into())),
            other => Err(decode_error(&other, "bool")),
        }
    }
}

impl ToWireValue for bool {
    fn natural_oid(&self) -> Oid {
        oid::BOOL
    }

    fn encode(&self, target_oid: Oid, buf: &mut Vec<u8>) -> Result<()> {
        match target_oid {
            oid::BOOL => {
                buf.extend_from_slice(&1_i32.to_be_bytes());
                buf.push(u8::from(*self));
                Ok(())
            }
            oid::UNKNOWN => write_len_prefixed(buf, if *self { b"t" } else { b"f" }),
            _ => Err(Error::type_mismatch(self.natural_oid(), target_oid)),
        }
    }
}

// === Integer types ===

macro_rules! impl_int_to_wire {
    ($ty:ty, $natural:expr) => {
        impl ToWireValue for $ty {
            fn natural_oid(&self) -> Oid {
                $natural
            }

            fn encode(&self, target_oid: Oid, buf: &mut Vec<u8>) -> Result<()> {
                encode_int(i64::from(*self), stringify!($ty), $natural, target_oid, buf)
            }
        }
    };
}

// PostgreSQL has no INT1 or unsigned types; pick the smallest type that holds every value.
impl_int_to_wire!(i8, oid::INT2);
impl_int_to_wire!(u8, oid::INT2);
impl_int_to_wire!(i16, oid::INT2);
impl_int_to_wire!(u16, oid::INT4);
impl_int_to_wire!(i32, oid::INT4);
impl_int_to_wire!(u32, oid::INT8);
impl_int_to_wire!(i64, oid::INT8);

impl ToWireValue for u64 {
    fn natural_oid(&self) -> Oid {
        oid::INT8
    }

    fn encode(&self, target_oid: Oid, buf: &mut Vec<u8>) -> Result<()> {
        let v = i64::try_from(*self).map_err(|_| Error::overflow("u64", "INT8"))?;
        encode_int(v, "u64", oid::INT8, target_oid, buf)
    }
}

impl FromValue for i16 {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Int2(v) => Ok(v),
            Value::Null => Err(Error::Decode("unexpected NULL value".into())),
            other => Err(decode_error(&other, "i16")),
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Int2(v) => Ok(v as i32),
            Value::Int4(v) => Ok(v),
            Value::Null => Err(Error::Decode("unexpected NULL value".into())),
            other => Err(decode_error(&other, "i32")),
        }
    }
}

impl FromValue for i64 {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Int2(v) => Ok(v as i64),
            Value::Int4(v) => Ok(v as i64),
            Value::Int8(v) => Ok(v),
            Value::Null => Err(Error::Decode("unexpected NULL value".into())),
            other => Err(decode_error(&other, "i64")),
        }
    }
}

// === Floating point types ===

impl FromValue for f32 {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Float4(v) => Ok(v),
            Value::Null => Err(Error::Decode("unexpected NULL value".into())),
            other => Err(decode_error(&other, "f32")),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Float4(v) => Ok(v as f64),
            Value::Float8(v) => Ok(v),
            Value::Numeric(s) => match s.as_str() {
                "NaN" => Ok(f64::NAN),
                _ => s
                    .parse()
                    .map_err(|e| Error::Decode(format!("invalid numeric {:?}: {}", s, e))),
            },
            Value::Null => Err(Error::Decode("unexpected NULL value".into())),
            other => Err(decode_error(&other, "f64")),
        }
    }
}

impl ToWireValue for f32 {
    fn natural_oid(&self) -> Oid {
        oid::FLOAT4
    }

    fn encode(&self, target_oid: Oid, buf: &mut Vec<u8>) -> Result<()> {
        match target_oid {
            oid::FLOAT4 => {
                buf.extend_from_slice(&4_i32.to_be_bytes());
                buf.extend_from_slice(&self.to_be_bytes());
                Ok(())
            }
            _ => (*self as f64).encode(target_oid, buf),
        }
    }
}

impl ToWireValue for f64 {
    fn natural_oid(&self) -> Oid {
        oid::FLOAT8
    }

    fn encode(&self, target_oid: Oid, buf: &mut Vec<u8>) -> Result<()> {
        match target_oid {
            oid::FLOAT4 => {
                let v = *self as f32;
                if self.is_finite() && !v.is_finite() {
                    return Err(Error::overflow("f64", "FLOAT4"));
                }
                buf.extend_from_slice(&4_i32.to_be_bytes());
                buf.extend_from_slice(&v.to_be_bytes());
                Ok(())
            }
            oid::FLOAT8 => {
                buf.extend_from_slice(&8_i32.to_be_bytes());
                buf.extend_from_slice(&self.to_be_bytes());
                Ok(())
            }
            _ if preferred_format(target_oid) == FormatCode::Text => {
                let text = if self.is_nan() {
                    "NaN".to_string()
                } else if self.is_infinite() {
                    if *self > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
                } else {
                    self.to_string()
                };
                write_len_prefixed(buf, text.as_bytes())
            }
            _ => Err(Error::type_mismatch(self.natural_oid(), target_oid)),
        }
    }
}
