//! Decoded column values.

use crate::error::{Error, Result};
use crate::protocol::types::{FormatCode, Oid, oid};

/// A single decoded column value.
///
/// SQL NULL is its own variant and is only ever produced from the -1 length
/// marker on the wire, never from the content of a value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    /// NUMERIC in its exact decimal text form
    Numeric(String),
    Text(String),
    Bytea(Vec<u8>),
    /// A type without a dedicated decoder, kept as its text representation.
    Other { type_oid: Oid, text: String },
}

impl Value {
    /// Decode one field of a DataRow.
    pub fn decode(type_oid: Oid, format: FormatCode, raw: Option<&[u8]>) -> Result<Self> {
        match raw {
            None => Ok(Value::Null),
            Some(bytes) => match format {
                FormatCode::Binary => decode_binary(type_oid, bytes),
                FormatCode::Text => decode_text(type_oid, bytes),
            },
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short type name used in decode error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "bool",
            Value::Int2(_) => "int2",
            Value::Int4(_) => "int4",
            Value::Int8(_) => "int8",
            Value::Float4(_) => "float4",
            Value::Float8(_) => "float8",
            Value::Numeric(_) => "numeric",
            Value::Text(_) => "text",
            Value::Bytea(_) => "bytea",
            Value::Other { .. } => "other",
        }
    }
}

fn utf8(bytes: &[u8]) -> Result<&str> {
    simdutf8::compat::from_utf8(bytes).map_err(|e| Error::Decode(format!("invalid UTF-8: {}", e)))
}

fn fixed<const N: usize>(type_oid: Oid, bytes: &[u8]) -> Result<[u8; N]> {
    bytes.try_into().map_err(|_| {
        Error::Decode(format!(
            "invalid length {} for binary value of oid {}",
            bytes.len(),
            type_oid
        ))
    })
}

fn decode_binary(type_oid: Oid, bytes: &[u8]) -> Result<Value> {
    Ok(match type_oid {
        oid::BOOL => Value::Bool(fixed::<1>(type_oid, bytes)?[0] != 0),
        oid::INT2 => Value::Int2(i16::from_be_bytes(fixed(type_oid, bytes)?)),
        oid::INT4 => Value::Int4(i32::from_be_bytes(fixed(type_oid, bytes)?)),
        oid::INT8 => Value::Int8(i64::from_be_bytes(fixed(type_oid, bytes)?)),
        oid::OID => Value::Int8(u32::from_be_bytes(fixed(type_oid, bytes)?) as i64),
        oid::FLOAT4 => Value::Float4(f32::from_be_bytes(fixed(type_oid, bytes)?)),
        oid::FLOAT8 => Value::Float8(f64::from_be_bytes(fixed(type_oid, bytes)?)),
        oid::BYTEA => Value::Bytea(bytes.to_vec()),
        oid::TEXT | oid::VARCHAR | oid::BPCHAR | oid::NAME | oid::CHAR | oid::UNKNOWN => {
            Value::Text(utf8(bytes)?.to_owned())
        }
        _ => {
            return Err(Error::Decode(format!(
                "no binary decoder for oid {}",
                type_oid
            )));
        }
    })
}

fn decode_text(type_oid: Oid, bytes: &[u8]) -> Result<Value> {
    let s = utf8(bytes)?;
    Ok(match type_oid {
        oid::BOOL => match s {
            "t" | "true" => Value::Bool(true),
            "f" | "false" => Value::Bool(false),
            _ => return Err(Error::Decode(format!("invalid boolean: {:?}", s))),
        },
        oid::INT2 => Value::Int2(parse(s, "int2")?),
        oid::INT4 => Value::Int4(parse(s, "int4")?),
        oid::INT8 | oid::OID => Value::Int8(parse(s, "int8")?),
        oid::FLOAT4 => Value::Float4(parse_float(s)? as f32),
        oid::FLOAT8 => Value::Float8(parse_float(s)?),
        oid::NUMERIC => Value::Numeric(s.to_owned()),
        oid::BYTEA => Value::Bytea(decode_bytea_hex(s)?),
        oid::TEXT | oid::VARCHAR | oid::BPCHAR | oid::NAME | oid::CHAR | oid::UNKNOWN => {
            Value::Text(s.to_owned())
        }
        _ => Value::Other {
            type_oid,
            text: s.to_owned(),
        },
    })
}

fn parse<T: std::str::FromStr>(s: &str, name: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    s.parse()
        .map_err(|e| Error::Decode(format!("invalid {}: {:?}: {}", name, s, e)))
}

fn parse_float(s: &str) -> Result<f64> {
    match s {
        "NaN" => Ok(f64::NAN),
        "Infinity" => Ok(f64::INFINITY),
        "-Infinity" => Ok(f64::NEG_INFINITY),
        _ => parse(s, "float"),
    }
}

/// Decode the `\x0a1b` hex output format of bytea.
fn decode_bytea_hex(s: &str) -> Result<Vec<u8>> {
    let hex = s
        .strip_prefix("\\x")
        .ok_or_else(|| Error::Decode("bytea text value is not in hex format".into()))?;
    if hex.len() % 2 != 0 {
        return Err(Error::Decode("odd number of hex digits in bytea".into()));
    }
    hex.as_bytes()
        .chunks_exact(2)
        .map(|pair| {
            let hi = hex_digit(pair[0])?;
            let lo = hex_digit(pair[1])?;
            Ok((hi << 4) | lo)
        })
        .collect()
}

fn hex_digit(c: u8) -> Result<u8> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err(Error::Decode(format!("invalid hex digit {:?}", c as char))),
    }
}
