//! Result set messages: row metadata, rows and command completion.

use std::mem::size_of;

use zerocopy::byteorder::big_endian::{I16 as I16BE, I32 as I32BE, U16 as U16BE, U32 as U32BE};
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::error::{Error, Result};
use crate::protocol::codec::{read_bytes, read_cstr, read_i16, read_i32};
use crate::protocol::types::{FormatCode, Oid};

/// Everything in a field description after the column name.
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
pub struct FieldDescriptionTail {
    /// Table OID (0 if not a table column)
    pub table_oid: U32BE,
    /// Column attribute number (0 if not a table column)
    pub column_id: I16BE,
    pub type_oid: U32BE,
    /// Type size (-1 for variable, -2 for null-terminated)
    pub type_size: I16BE,
    pub type_modifier: I32BE,
    /// Format code (0=text, 1=binary)
    pub format: U16BE,
}

/// One column of a RowDescription.
#[derive(Debug, Clone, Copy)]
pub struct FieldDescription<'a> {
    pub name: &'a str,
    pub tail: &'a FieldDescriptionTail,
}

impl FieldDescription<'_> {
    pub fn table_oid(&self) -> Oid {
        self.tail.table_oid.get()
    }

    pub fn column_id(&self) -> i16 {
        self.tail.column_id.get()
    }

    pub fn type_oid(&self) -> Oid {
        self.tail.type_oid.get()
    }

    pub fn type_size(&self) -> i16 {
        self.tail.type_size.get()
    }

    pub fn type_modifier(&self) -> i32 {
        self.tail.type_modifier.get()
    }

    /// Format code as reported by the server.
    ///
    /// In the response to a statement Describe this is always text, since
    /// the result formats are only chosen at Bind.
    pub fn format(&self) -> FormatCode {
        FormatCode::from_u16(self.tail.format.get())
    }
}

/// RowDescription ('T').
#[derive(Debug)]
pub struct RowDescription<'a> {
    fields: Vec<FieldDescription<'a>>,
}

impl<'a> RowDescription<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        const TAIL_SIZE: usize = size_of::<FieldDescriptionTail>();

        let (num_fields, mut data) = read_i16(payload)?;
        let num_fields = u16::try_from(num_fields)
            .map_err(|_| Error::Protocol(format!("RowDescription: bad field count {num_fields}")))?;
        let mut fields = Vec::with_capacity(num_fields as usize);

        for _ in 0..num_fields {
            let (name, rest) = read_cstr(data)?;
            let (tail_bytes, rest) = read_bytes(rest, TAIL_SIZE)?;
            let tail = FieldDescriptionTail::ref_from_bytes(tail_bytes)?;

            fields.push(FieldDescription { name, tail });
            data = rest;
        }

        Ok(Self { fields })
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &[FieldDescription<'a>] {
        &self.fields
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldDescription<'a>> {
        self.fields.iter()
    }
}

/// Column count at the start of a DataRow.
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
pub struct DataRowHead {
    pub num_columns: U16BE,
}

/// DataRow ('D'). Values stay in the read buffer until decoded.
#[derive(Debug, Clone, Copy)]
pub struct DataRow<'a> {
    num_columns: u16,
    columns_data: &'a [u8],
}

impl<'a> DataRow<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (head, columns_data) = DataRowHead::ref_from_prefix(payload)?;

        Ok(Self {
            num_columns: head.num_columns.get(),
            columns_data,
        })
    }

    pub fn len(&self) -> usize {
        self.num_columns as usize
    }

    pub fn is_empty(&self) -> bool {
        self.num_columns == 0
    }

    /// Each item is `Ok(None)` for SQL NULL (length -1) and `Ok(Some(bytes))`
    /// otherwise. A value that runs past the end of the message yields `Err`.
    pub fn iter(&self) -> DataRowIter<'a> {
        DataRowIter {
            remaining_columns: self.num_columns,
            remaining: self.columns_data,
        }
    }
}

/// Raw column values of a DataRow, in column order.
#[derive(Debug, Clone)]
pub struct DataRowIter<'a> {
    remaining_columns: u16,
    remaining: &'a [u8],
}

impl<'a> DataRowIter<'a> {
    fn read_value(&mut self) -> Result<Option<&'a [u8]>> {
        let (len, rest) = read_i32(self.remaining)?;
        if len == -1 {
            self.remaining = rest;
            return Ok(None);
        }
        let len = usize::try_from(len)
            .map_err(|_| Error::Protocol(format!("DataRow: negative value length {len}")))?;
        let (value, rest) = read_bytes(rest, len)?;
        self.remaining = rest;
        Ok(Some(value))
    }
}

impl<'a> Iterator for DataRowIter<'a> {
    type Item = Result<Option<&'a [u8]>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining_columns == 0 {
            return None;
        }
        self.remaining_columns -= 1;
        let item = self.read_value();
        if item.is_err() {
            self.remaining_columns = 0;
        }
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining_columns as usize;
        (n, Some(n))
    }
}

/// CommandComplete ('C').
#[derive(Debug, Clone, Copy)]
pub struct CommandComplete<'a> {
    /// e.g. `SELECT 5`, `INSERT 0 1`, `UPDATE 10`
    pub tag: &'a str,
}

impl<'a> CommandComplete<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (tag, _) = read_cstr(payload)?;
        Ok(Self { tag })
    }

    /// Row count from the tag; `None` for commands that carry no count.
    pub fn rows_affected(&self) -> Option<u64> {
        let mut parts = self.tag.split_whitespace();
        let command = parts.next()?;
        let count = match command {
            // INSERT carries a legacy oid before the row count
            "INSERT" => parts.nth(1)?,
            "SELECT" | "UPDATE" | "DELETE" | "MERGE" | "COPY" | "MOVE" | "FETCH" => parts.next()?,
            _ => return None,
        };
        count.parse().ok()
    }

    /// First word of the tag.
    pub fn command(&self) -> Option<&str> {
        self.tag.split_whitespace().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::oid;

    fn field(name: &str, type_oid: Oid) -> Vec<u8> {
        let mut out = name.as_bytes().to_vec();
        out.push(0);
        out.extend_from_slice(&0_u32.to_be_bytes());
        out.extend_from_slice(&0_i16.to_be_bytes());
        out.extend_from_slice(&type_oid.to_be_bytes());
        out.extend_from_slice(&4_i16.to_be_bytes());
        out.extend_from_slice(&(-1_i32).to_be_bytes());
        out.extend_from_slice(&0_u16.to_be_bytes());
        out
    }

    #[test]
    fn test_row_description() {
        let mut payload = 2_i16.to_be_bytes().to_vec();
        payload.extend(field("id", oid::INT4));
        payload.extend(field("name", oid::TEXT));

        let desc = RowDescription::parse(&payload).unwrap();
        assert_eq!(desc.len(), 2);
        assert_eq!(desc.fields()[0].name, "id");
        assert_eq!(desc.fields()[0].type_oid(), oid::INT4);
        assert_eq!(desc.fields()[1].name, "name");
        assert_eq!(desc.fields()[1].format(), FormatCode::Text);
    }

    #[test]
    fn test_row_description_truncated() {
        let mut payload = 1_i16.to_be_bytes().to_vec();
        payload.extend(field("id", oid::INT4));
        payload.truncate(payload.len() - 3);
        assert!(RowDescription::parse(&payload).is_err());
        assert!(RowDescription::parse(&[0]).is_err());
    }

    #[test]
    fn test_data_row_null_and_empty() {
        let mut payload = 3_u16.to_be_bytes().to_vec();
        payload.extend_from_slice(&(-1_i32).to_be_bytes());
        payload.extend_from_slice(&0_i32.to_be_bytes());
        payload.extend_from_slice(&2_i32.to_be_bytes());
        payload.extend_from_slice(b"hi");

        let row = DataRow::parse(&payload).unwrap();
        assert_eq!(row.len(), 3);
        let values: Vec<_> = row.iter().collect::<Result<_>>().unwrap();
        assert_eq!(values, vec![None, Some(&b""[..]), Some(&b"hi"[..])]);
    }

    #[test]
    fn test_data_row_truncated_value() {
        let mut payload = 1_u16.to_be_bytes().to_vec();
        payload.extend_from_slice(&10_i32.to_be_bytes());
        payload.extend_from_slice(b"short");

        let row = DataRow::parse(&payload).unwrap();
        let mut iter = row.iter();
        assert!(iter.next().unwrap().is_err());
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_rows_affected() {
        let tag = |tag| CommandComplete { tag };
        assert_eq!(tag("SELECT 5").rows_affected(), Some(5));
        assert_eq!(tag("INSERT 0 3").rows_affected(), Some(3));
        assert_eq!(tag("UPDATE 10").rows_affected(), Some(10));
        assert_eq!(tag("DO").rows_affected(), None);
        assert_eq!(tag("CREATE TABLE").rows_affected(), None);
        assert_eq!(tag("DO").command(), Some("DO"));
    }
}
