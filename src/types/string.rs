//! String and byte-string implementations.

use crate::error::{Error, Result};
use crate::protocol::types::{FormatCode, Oid, oid};

use super::{FromValue, ToWireValue, Value, preferred_format, write_len_prefixed};

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Text(s) | Value::Numeric(s) => Ok(s),
            Value::Other { text, .. } => Ok(text),
            Value::Null => Err(Error::Decode("unexpected NULL value".into())),
            other => Err(Error::Decode(format!(
                "cannot decode {} value as String",
                other.kind()
            ))),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Bytea(bytes) => Ok(bytes),
            Value::Null => Err(Error::Decode("unexpected NULL value".into())),
            other => Err(Error::Decode(format!(
                "cannot decode {} value as Vec<u8>",
                other.kind()
            ))),
        }
    }
}

impl ToWireValue for str {
    fn natural_oid(&self) -> Oid {
        oid::TEXT
    }

    /// Text types take the UTF-8 bytes as their binary form. Any type sent in
    /// text format accepts the string as its literal input.
    fn encode(&self, target_oid: Oid, buf: &mut Vec<u8>) -> Result<()> {
        match target_oid {
            oid::TEXT | oid::VARCHAR | oid::BPCHAR | oid::NAME | oid::CHAR => {
                write_len_prefixed(buf, self.as_bytes())
            }
            _ if preferred_format(target_oid) == FormatCode::Text => {
                write_len_prefixed(buf, self.as_bytes())
            }
            _ => Err(Error::type_mismatch(self.natural_oid(), target_oid)),
        }
    }
}

impl ToWireValue for String {
    fn natural_oid(&self) -> Oid {
        oid::TEXT
    }

    fn encode(&self, target_oid: Oid, buf: &mut Vec<u8>) -> Result<()> {
        self.as_str().encode(target_oid, buf)
    }
}

impl ToWireValue for [u8] {
    fn natural_oid(&self) -> Oid {
        oid::BYTEA
    }

    fn encode(&self, target_oid: Oid, buf: &mut Vec<u8>) -> Result<()> {
        match target_oid {
            oid::BYTEA => write_len_prefixed(buf, self),
            _ => Err(Error::type_mismatch(self.natural_oid(), target_oid)),
        }
    }
}

impl ToWireValue for Vec<u8> {
    fn natural_oid(&self) -> Oid {
        oid::BYTEA
    }

    fn encode(&self, target_oid: Oid, buf: &mut Vec<u8>) -> Result<()> {
        self.as_slice().encode(target_oid, buf)
    }
}
