//! Field metadata (column definition) decoder.
//!
//! After a result-set header announcing N columns, the server sends N of
//! these packets. Six length-encoded strings in fixed order, a fixed-length
//! block, and an optional default value that only legacy COM_FIELD_LIST
//! responses carry.

#![allow(clippy::cast_possible_truncation)]

use mywire_core::Result;

use crate::protocol::lenenc::Lenenc;
use crate::protocol::packets::{self, ErrPacket, truncated};
use crate::protocol::reader::PacketReader;
use crate::protocol::{EOF_MARKER, ERROR_MARKER};
use crate::types::{FieldType, column_flags};

/// Column definition from a result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    /// Catalog name (always "def")
    pub catalog: String,
    /// Schema (database) name
    pub schema: String,
    /// Table name (or alias)
    pub table: String,
    /// Original table name
    pub org_table: String,
    /// Column name (or alias)
    pub name: String,
    /// Original column name
    pub org_name: String,
    /// Character set number
    pub charset: u16,
    /// Column byte length
    pub column_length: u32,
    /// Column type
    pub column_type: FieldType,
    /// Column flags (NUM_FLAG is inferred locally, see `parse`)
    pub flags: u16,
    /// Number of decimals
    pub decimals: u8,
    /// Default value; only present in COM_FIELD_LIST responses
    pub default_value: Option<String>,
}

impl ColumnDef {
    /// Check if the column is NOT NULL.
    #[must_use]
    pub const fn is_not_null(&self) -> bool {
        self.flags & column_flags::NOT_NULL != 0
    }

    /// Check if the column is a primary key.
    #[must_use]
    pub const fn is_primary_key(&self) -> bool {
        self.flags & column_flags::PRIMARY_KEY != 0
    }

    /// Check if the column is unsigned.
    #[must_use]
    pub const fn is_unsigned(&self) -> bool {
        self.flags & column_flags::UNSIGNED != 0
    }

    /// Check if the column is numeric (includes the inferred NUM_FLAG).
    #[must_use]
    pub const fn is_numeric(&self) -> bool {
        self.flags & column_flags::NUM != 0
    }

    /// Check if the column is binary.
    #[must_use]
    pub const fn is_binary(&self) -> bool {
        self.flags & column_flags::BINARY != 0
    }
}

/// A decoded field-metadata packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldPacket {
    /// An ordinary column definition
    Field(ColumnDef),
    /// The server reported an error instead
    Err(ErrPacket),
    /// Premature EOF terminating a legacy COM_FIELD_LIST response
    Eof,
}

/// Read one of the six leading length-encoded name fields.
///
/// A zero-length value maps to the empty string without touching the
/// payload; the NULL sentinel is a protocol violation.
fn read_name_field(reader: &mut PacketReader<'_>) -> Result<String> {
    match reader.read_lenenc() {
        None => Err(truncated("RSET_FIELD", reader)),
        Some(Lenenc::Null) => {
            tracing::warn!("server sent NULL_LENGTH in field metadata");
            Err(packets::protocol_error(
                "Protocol error. Server sent NULL_LENGTH. The server is faulty",
            ))
        }
        Some(Lenenc::Int(0)) => Ok(String::new()),
        Some(Lenenc::Int(len)) => reader
            .read_string(len as usize)
            .ok_or_else(|| truncated("RSET_FIELD", reader)),
    }
}

impl FieldPacket {
    /// Decode a field-metadata payload.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut reader = PacketReader::new(payload);

        match reader.peek() {
            None => return Err(truncated("RSET_FIELD", &reader)),
            Some(ERROR_MARKER) => {
                reader.skip(1);
                return Ok(FieldPacket::Err(ErrPacket::parse(reader.read_rest())));
            }
            Some(EOF_MARKER) if payload.len() < 8 => {
                // Premature EOF. That should be COM_FIELD_LIST.
                return Ok(FieldPacket::Eof);
            }
            Some(_) => {}
        }

        let catalog = read_name_field(&mut reader)?;
        let schema = read_name_field(&mut reader)?;
        let table = read_name_field(&mut reader)?;
        let org_table = read_name_field(&mut reader)?;
        let name = read_name_field(&mut reader)?;
        let org_name = read_name_field(&mut reader)?;

        // Length of the fixed-size block; always 12
        let block_len = reader
            .read_u8()
            .ok_or_else(|| truncated("RSET_FIELD", &reader))?;
        if block_len != 12 {
            tracing::warn!(
                got = block_len,
                "protocol inconsistency: server sent false length, expected 12"
            );
        }

        let charset = reader
            .read_u16_le()
            .ok_or_else(|| truncated("RSET_FIELD", &reader))?;
        let column_length = reader
            .read_u32_le()
            .ok_or_else(|| truncated("RSET_FIELD", &reader))?;
        let type_code = reader
            .read_u8()
            .ok_or_else(|| truncated("RSET_FIELD", &reader))?;
        let mut flags = reader
            .read_u16_le()
            .ok_or_else(|| truncated("RSET_FIELD", &reader))?;
        let decimals = reader
            .read_u8()
            .ok_or_else(|| truncated("RSET_FIELD", &reader))?;
        reader
            .skip(2)
            .ok_or_else(|| truncated("RSET_FIELD", &reader))?;

        // libmysql sets NUM_FLAG client-side for the integer/decimal family;
        // TIMESTAMP only counts in its numeric display widths
        if (type_code <= FieldType::Int24 as u8
            && (type_code != FieldType::Timestamp as u8
                || column_length == 14
                || column_length == 8))
            || type_code == FieldType::Year as u8
        {
            flags |= column_flags::NUM;
        }

        // Optional default value; NULL_LENGTH here means a NULL default
        // from COM_FIELD_LIST, not a faulty server
        let default_value = if reader.is_empty() {
            None
        } else {
            match reader.read_lenenc() {
                None => return Err(truncated("RSET_FIELD", &reader)),
                Some(Lenenc::Null | Lenenc::Int(0)) => None,
                Some(Lenenc::Int(len)) => {
                    let s = reader
                        .read_string(len as usize)
                        .ok_or_else(|| truncated("RSET_FIELD", &reader))?;
                    Some(s)
                }
            }
        };

        Ok(FieldPacket::Field(ColumnDef {
            catalog,
            schema,
            table,
            org_table,
            name,
            org_name,
            charset,
            column_length,
            column_type: FieldType::from_u8(type_code),
            flags,
            decimals,
            default_value,
        }))
    }
}
