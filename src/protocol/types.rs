//! Type identifiers, format codes and transaction status.

/// PostgreSQL Object Identifier (OID), the server's type descriptor.
pub type Oid = u32;

/// Well-known type OIDs from `pg_type`.
pub mod oid {
    use super::Oid;

    pub const BOOL: Oid = 16;
    pub const BYTEA: Oid = 17;
    pub const CHAR: Oid = 18;
    pub const NAME: Oid = 19;
    pub const INT8: Oid = 20;
    pub const INT2: Oid = 21;
    pub const INT4: Oid = 23;
    pub const TEXT: Oid = 25;
    pub const OID: Oid = 26;
    pub const FLOAT4: Oid = 700;
    pub const FLOAT8: Oid = 701;
    /// Untyped string literal, e.g. `SELECT 'x'`
    pub const UNKNOWN: Oid = 705;
    pub const BPCHAR: Oid = 1042;
    pub const VARCHAR: Oid = 1043;
    pub const NUMERIC: Oid = 1700;
    pub const VOID: Oid = 2278;
}

/// Wire representation of a field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u16)]
pub enum FormatCode {
    #[default]
    Text = 0,
    Binary = 1,
}

impl FormatCode {
    /// Anything but `1` is text.
    pub fn from_u16(value: u16) -> Self {
        if value == 1 {
            FormatCode::Binary
        } else {
            FormatCode::Text
        }
    }
}

/// Status byte carried by every ReadyForQuery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum TransactionStatus {
    /// Not inside a transaction block
    #[default]
    Idle = b'I',
    InTransaction = b'T',
    /// Inside a failed transaction block; statements fail until ROLLBACK
    Failed = b'E',
}

impl TransactionStatus {
    pub fn from_byte(value: u8) -> Option<Self> {
        [Self::Idle, Self::InTransaction, Self::Failed]
            .into_iter()
            .find(|status| *status as u8 == value)
    }

    /// True inside a transaction block, failed or not.
    pub fn in_transaction(self) -> bool {
        self != TransactionStatus::Idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_status() {
        assert_eq!(TransactionStatus::from_byte(b'T'), Some(TransactionStatus::InTransaction));
        assert_eq!(TransactionStatus::from_byte(b'?'), None);
        assert!(TransactionStatus::Failed.in_transaction());
        assert!(!TransactionStatus::Idle.in_transaction());
    }

    #[test]
    fn test_format_code() {
        assert_eq!(FormatCode::from_u16(1), FormatCode::Binary);
        assert_eq!(FormatCode::from_u16(0), FormatCode::Text);
    }
}
