//! Result-set row decoding, text and binary protocol.
//!
//! A reassembled row payload is first checked for the two row-level
//! sentinels (server error, end-of-data EOF); only then is it decoded
//! column by column against the result set's field metadata.

#![allow(clippy::cast_possible_truncation)]

use std::fmt::Write as _;

use mywire_core::{Result, Value};

use crate::protocol::column::ColumnDef;
use crate::protocol::lenenc::Lenenc;
use crate::protocol::packets::{ErrPacket, truncated};
use crate::protocol::reader::PacketReader;
use crate::protocol::{EOF_MARKER, ERROR_MARKER};
use crate::types::{
    FieldType, decode_text_value, format_binary_date, format_binary_datetime, format_binary_time,
};

/// A decoded row payload.
#[derive(Debug, Clone, PartialEq)]
pub enum RowPacket {
    /// A data row
    Row(Vec<Value>),
    /// End of the result set
    Eof { warnings: u16, status_flags: u16 },
    /// The server embedded an error mid-result
    Err(ErrPacket),
}

/// Check the row-level sentinels shared by both encodings.
fn classify(payload: &[u8]) -> Option<RowPacket> {
    match payload.first() {
        Some(&ERROR_MARKER) => Some(RowPacket::Err(ErrPacket::parse(&payload[1..]))),
        Some(&EOF_MARKER) if payload.len() < 8 => {
            let mut reader = PacketReader::new(&payload[1..]);
            let (warnings, status_flags) = if payload.len() > 1 {
                (
                    reader.read_u16_le().unwrap_or(0),
                    reader.read_u16_le().unwrap_or(0),
                )
            } else {
                (0, 0)
            };
            Some(RowPacket::Eof {
                warnings,
                status_flags,
            })
        }
        _ => None,
    }
}

/// Conservative scratch size for re-expressing BIT columns as text:
/// worst case one decimal digit per bit, plus a terminator, per column.
pub fn bit_scratch_estimate(columns: &[ColumnDef]) -> usize {
    columns
        .iter()
        .filter(|c| c.column_type == FieldType::Bit)
        .map(|c| c.column_length as usize + 1)
        .sum()
}

/// Interpret up to 8 raw big-endian bytes as an unsigned integer.
fn bits_to_u64(data: &[u8]) -> u64 {
    data.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
}

impl RowPacket {
    /// Decode a text-protocol row payload.
    ///
    /// Each column is a length-encoded byte string; the NULL sentinel is a
    /// NULL cell. BIT columns arrive as the raw bit mask, which takes less
    /// space than its textual form, so the text is built in a scratch
    /// region sized up front rather than in place.
    pub fn parse_text(payload: &[u8], columns: &[ColumnDef]) -> Result<Self> {
        if let Some(sentinel) = classify(payload) {
            return Ok(sentinel);
        }

        let mut reader = PacketReader::new(payload);
        let mut values = Vec::with_capacity(columns.len());
        let mut bit_scratch = String::with_capacity(bit_scratch_estimate(columns));

        for col in columns {
            match reader.read_lenenc() {
                None => return Err(truncated("ROW", &reader)),
                Some(Lenenc::Null) => values.push(Value::Null),
                Some(Lenenc::Int(len)) => {
                    let data = reader
                        .read_bytes(len as usize)
                        .ok_or_else(|| truncated("ROW", &reader))?;
                    if col.column_type == FieldType::Bit && data.len() <= 8 {
                        let start = bit_scratch.len();
                        let _ = write!(bit_scratch, "{}", bits_to_u64(data));
                        values.push(Value::Text(bit_scratch[start..].to_string()));
                        bit_scratch.push('\0');
                    } else {
                        values.push(decode_text_value(col.column_type, data, col.is_unsigned()));
                    }
                }
            }
        }

        Ok(RowPacket::Row(values))
    }

    /// Decode a binary-protocol row payload.
    ///
    /// Layout: one status byte, a NULL bitmap of `(columns + 9) / 8` bytes
    /// whose first two bits are reserved, then one type-specific value per
    /// non-NULL column.
    pub fn parse_binary(payload: &[u8], columns: &[ColumnDef]) -> Result<Self> {
        if let Some(sentinel) = classify(payload) {
            return Ok(sentinel);
        }

        let mut reader = PacketReader::new(payload);
        reader.skip(1).ok_or_else(|| truncated("ROW", &reader))?;

        let bitmap_len = (columns.len() + 9) / 8;
        let bitmap = reader
            .read_bytes(bitmap_len)
            .ok_or_else(|| truncated("ROW", &reader))?
            .to_vec();

        let mut values = Vec::with_capacity(columns.len());
        for (i, col) in columns.iter().enumerate() {
            let bit = i + 2; // first 2 bits are reserved
            if bitmap[bit / 8] & (1 << (bit % 8)) != 0 {
                values.push(Value::Null);
            } else {
                values.push(read_binary_value(&mut reader, col)?);
            }
        }

        Ok(RowPacket::Row(values))
    }
}

/// Decode one binary-protocol cell, advancing the cursor by the width the
/// column type dictates.
fn read_binary_value(reader: &mut PacketReader<'_>, col: &ColumnDef) -> Result<Value> {
    let unsigned = col.is_unsigned();
    let value = match col.column_type {
        FieldType::Tiny => {
            let v = reader.read_u8().ok_or_else(|| truncated("ROW", reader))?;
            if unsigned {
                Value::SmallInt(i16::from(v))
            } else {
                Value::TinyInt(v as i8)
            }
        }
        FieldType::Short | FieldType::Year => {
            let v = reader
                .read_u16_le()
                .ok_or_else(|| truncated("ROW", reader))?;
            if unsigned {
                Value::Int(i32::from(v))
            } else {
                Value::SmallInt(v as i16)
            }
        }
        FieldType::Long | FieldType::Int24 => {
            let v = reader
                .read_u32_le()
                .ok_or_else(|| truncated("ROW", reader))?;
            if unsigned {
                Value::BigInt(i64::from(v))
            } else {
                Value::Int(v as i32)
            }
        }
        FieldType::LongLong => {
            let v = reader
                .read_u64_le()
                .ok_or_else(|| truncated("ROW", reader))?;
            if unsigned {
                Value::UBigInt(v)
            } else {
                Value::BigInt(v as i64)
            }
        }
        FieldType::Float => {
            let v = reader
                .read_u32_le()
                .ok_or_else(|| truncated("ROW", reader))?;
            Value::Float(f32::from_bits(v))
        }
        FieldType::Double => {
            let v = reader
                .read_u64_le()
                .ok_or_else(|| truncated("ROW", reader))?;
            Value::Double(f64::from_bits(v))
        }
        FieldType::Null => Value::Null,
        FieldType::Date | FieldType::NewDate => {
            let body = read_length_prefixed(reader)?;
            Value::Text(format_binary_date(body))
        }
        FieldType::Time => {
            let body = read_length_prefixed(reader)?;
            Value::Text(format_binary_time(body))
        }
        FieldType::DateTime | FieldType::Timestamp => {
            let body = read_length_prefixed(reader)?;
            Value::Text(format_binary_datetime(body))
        }
        FieldType::Bit => {
            let data = reader
                .read_lenenc_bytes()
                .ok_or_else(|| truncated("ROW", reader))?;
            if data.len() <= 8 {
                Value::UBigInt(bits_to_u64(data))
            } else {
                Value::Bytes(data.to_vec())
            }
        }
        FieldType::Decimal | FieldType::NewDecimal => {
            let data = reader
                .read_lenenc_bytes()
                .ok_or_else(|| truncated("ROW", reader))?;
            Value::Decimal(String::from_utf8_lossy(data).into_owned())
        }
        FieldType::Json => {
            let data = reader
                .read_lenenc_bytes()
                .ok_or_else(|| truncated("ROW", reader))?;
            let text = String::from_utf8_lossy(data);
            serde_json::from_str(&text)
                .map_or_else(|_| Value::Text(text.into_owned()), Value::Json)
        }
        other => {
            let data = reader
                .read_lenenc_bytes()
                .ok_or_else(|| truncated("ROW", reader))?;
            if other.is_blob() {
                Value::Bytes(data.to_vec())
            } else {
                Value::Text(String::from_utf8_lossy(data).into_owned())
            }
        }
    };
    Ok(value)
}

/// Temporal binary values carry their own one-byte length.
fn read_length_prefixed<'a>(reader: &mut PacketReader<'a>) -> Result<&'a [u8]> {
    let len = reader.read_u8().ok_or_else(|| truncated("ROW", reader))?;
    reader
        .read_bytes(usize::from(len))
        .ok_or_else(|| truncated("ROW", reader))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::writer::PacketWriter;
    use crate::types::column_flags;

    fn int_column(name: &str) -> ColumnDef {
        ColumnDef {
            catalog: "def".into(),
            schema: String::new(),
            table: String::new(),
            org_table: String::new(),
            name: name.into(),
            org_name: name.into(),
            charset: 63,
            column_length: 11,
            column_type: FieldType::Long,
            flags: column_flags::NUM,
            decimals: 0,
            default_value: None,
        }
    }

    fn column_of(name: &str, column_type: FieldType, length: u32, flags: u16) -> ColumnDef {
        ColumnDef {
            column_type,
            column_length: length,
            flags,
            ..int_column(name)
        }
    }

    #[test]
    fn text_and_binary_rows_agree_for_ints() {
        let columns = vec![int_column("a"), int_column("b")];

        // text: "1", "2"
        let mut text = PacketWriter::new();
        text.write_lenenc_string("1");
        text.write_lenenc_string("2");
        let text_row = RowPacket::parse_text(text.as_bytes(), &columns).unwrap();

        // binary: status byte, empty null bitmap, two LE u32
        let mut binary = PacketWriter::new();
        binary.write_u8(0);
        binary.write_zeros((columns.len() + 9) / 8);
        binary.write_u32_le(1);
        binary.write_u32_le(2);
        let binary_row = RowPacket::parse_binary(binary.as_bytes(), &columns).unwrap();

        let expected = RowPacket::Row(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(text_row, expected);
        assert_eq!(binary_row, expected);
    }

    #[test]
    fn text_row_null_cell() {
        let columns = vec![int_column("a"), int_column("b")];
        let payload = [0xFB, 0x01, b'7'];
        match RowPacket::parse_text(&payload, &columns).unwrap() {
            RowPacket::Row(values) => {
                assert_eq!(values, vec![Value::Null, Value::Int(7)]);
            }
            other => panic!("expected row, got {other:?}"),
        }
    }

    #[test]
    fn binary_row_null_bitmap() {
        let columns = vec![int_column("a"), int_column("b"), int_column("c")];
        let mut w = PacketWriter::new();
        w.write_u8(0);
        // second column NULL: bit index 3 in the bitmap
        w.write_u8(1 << 3);
        w.write_u8(0);
        w.write_u32_le(10);
        w.write_u32_le(30);
        match RowPacket::parse_binary(w.as_bytes(), &columns).unwrap() {
            RowPacket::Row(values) => {
                assert_eq!(
                    values,
                    vec![Value::Int(10), Value::Null, Value::Int(30)]
                );
            }
            other => panic!("expected row, got {other:?}"),
        }
    }

    #[test]
    fn row_error_sentinel() {
        let mut payload = vec![0xFF, 0x25, 0x05, b'#'];
        payload.extend_from_slice(b"70100");
        payload.extend_from_slice(b"Query execution was interrupted");
        match RowPacket::parse_text(&payload, &[int_column("a")]).unwrap() {
            RowPacket::Err(err) => {
                assert_eq!(err.code, 1317);
                assert_eq!(err.sqlstate, "70100");
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[test]
    fn row_eof_sentinel_forms() {
        match RowPacket::parse_text(&[0xFE, 0x01, 0x00, 0x22, 0x00], &[]).unwrap() {
            RowPacket::Eof {
                warnings,
                status_flags,
            } => {
                assert_eq!(warnings, 1);
                assert_eq!(status_flags, 0x22);
            }
            other => panic!("expected EOF, got {other:?}"),
        }

        // bare EOF byte
        match RowPacket::parse_binary(&[0xFE], &[]).unwrap() {
            RowPacket::Eof {
                warnings,
                status_flags,
            } => {
                assert_eq!(warnings, 0);
                assert_eq!(status_flags, 0);
            }
            other => panic!("expected EOF, got {other:?}"),
        }

        // 0xFE leading a payload of 8+ bytes is a data row (here an 8-byte
        // length prefix), not an EOF
        let columns = vec![column_of("s", FieldType::VarString, 255, 0)];
        let mut payload = vec![0xFE];
        payload.extend_from_slice(&5u64.to_le_bytes());
        payload.extend_from_slice(b"xxxxx");
        match RowPacket::parse_text(&payload, &columns).unwrap() {
            RowPacket::Row(values) => assert_eq!(values[0], Value::Text("xxxxx".into())),
            other => panic!("expected row, got {other:?}"),
        }
    }

    #[test]
    fn bit_column_is_reexpressed_as_text() {
        let columns = vec![
            column_of("flags", FieldType::Bit, 10, 0),
            int_column("n"),
        ];
        assert_eq!(bit_scratch_estimate(&columns), 11);

        let mut w = PacketWriter::new();
        w.write_lenenc_bytes(&[0x02, 0x9A]); // 0b10_10011010 = 666
        w.write_lenenc_string("5");
        match RowPacket::parse_text(w.as_bytes(), &columns).unwrap() {
            RowPacket::Row(values) => {
                assert_eq!(values[0], Value::Text("666".to_string()));
                assert_eq!(values[1], Value::Int(5));
            }
            other => panic!("expected row, got {other:?}"),
        }
    }

    #[test]
    fn binary_temporals_and_strings() {
        let columns = vec![
            column_of("d", FieldType::Date, 10, 0),
            column_of("dt", FieldType::DateTime, 19, 0),
            column_of("s", FieldType::VarString, 32, 0),
            column_of("b", FieldType::Blob, 65535, column_flags::BLOB | column_flags::BINARY),
        ];

        let mut w = PacketWriter::new();
        w.write_u8(0);
        w.write_zeros((columns.len() + 9) / 8);
        // DATE 2024-02-29
        w.write_u8(4);
        w.write_u16_le(2024);
        w.write_u8(2);
        w.write_u8(29);
        // DATETIME 2024-01-02 03:04:05
        w.write_u8(7);
        w.write_u16_le(2024);
        w.write_u8(1);
        w.write_u8(2);
        w.write_u8(3);
        w.write_u8(4);
        w.write_u8(5);
        // VARCHAR
        w.write_lenenc_string("hello");
        // BLOB
        w.write_lenenc_bytes(&[0xDE, 0xAD]);

        match RowPacket::parse_binary(w.as_bytes(), &columns).unwrap() {
            RowPacket::Row(values) => {
                assert_eq!(values[0], Value::Text("2024-02-29".into()));
                assert_eq!(values[1], Value::Text("2024-01-02 03:04:05".into()));
                assert_eq!(values[2], Value::Text("hello".into()));
                assert_eq!(values[3], Value::Bytes(vec![0xDE, 0xAD]));
            }
            other => panic!("expected row, got {other:?}"),
        }
    }

    #[test]
    fn binary_unsigned_widening() {
        let columns = vec![column_of(
            "u",
            FieldType::LongLong,
            20,
            column_flags::UNSIGNED,
        )];
        let mut w = PacketWriter::new();
        w.write_u8(0);
        w.write_zeros((columns.len() + 9) / 8);
        w.write_u64_le(u64::MAX);
        match RowPacket::parse_binary(w.as_bytes(), &columns).unwrap() {
            RowPacket::Row(values) => assert_eq!(values[0], Value::UBigInt(u64::MAX)),
            other => panic!("expected row, got {other:?}"),
        }
    }

    #[test]
    fn truncated_row_fails() {
        let columns = vec![int_column("a")];
        // declares 5 bytes, carries 2
        let payload = [0x05, b'1', b'2'];
        assert!(RowPacket::parse_text(&payload, &columns).is_err());

        let mut w = PacketWriter::new();
        w.write_u8(0);
        w.write_zeros(1);
        w.write_u16_le(1); // Long needs 4 bytes
        assert!(RowPacket::parse_binary(w.as_bytes(), &columns).is_err());
    }
}
