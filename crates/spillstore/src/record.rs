//! Table file record codec using nom
//!
//! File format:
//! ```text
//! SPILTBL1
//! [version: u32]
//! ...records...
//! ```
//!
//! Record format (all integers little-endian):
//! ```text
//! [kind: u8 'P' | 'D'][row_id: u64][key_len: u32][value_len: u32][key][value]
//! ```
//!
//! `D` records carry the deleted key and an empty value.

use nom::{
    bytes::complete::{tag, take},
    number::complete::{le_u32, le_u64, le_u8},
    IResult,
};

use crate::error::{Error, Result};

/// Magic header for table files
pub const TABLE_MAGIC: &[u8] = b"SPILTBL1";

/// Current table file format version
pub const TABLE_VERSION: u32 = 1;

/// Length of the file header in bytes
pub const HEADER_LEN: usize = 8 + 4;

/// Length of the fixed part of a record in bytes
pub const RECORD_HEADER_LEN: usize = 1 + 8 + 4 + 4;

const KIND_PUT: u8 = b'P';
const KIND_DELETE: u8 = b'D';

/// What a record does to its key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// Insert or replace the key's value
    Put,
    /// Remove the key
    Delete,
}

/// A record borrowed from a table file buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record<'a> {
    /// Put or delete
    pub kind: RecordKind,
    /// Row id the key lives at
    pub row_id: u64,
    /// Serialized key
    pub key: &'a [u8],
    /// Serialized value (empty for deletes)
    pub value: &'a [u8],
}

/// Create a table file header
pub fn create_header(version: u32) -> Vec<u8> {
    let mut header = Vec::with_capacity(HEADER_LEN);
    header.extend_from_slice(TABLE_MAGIC);
    header.extend_from_slice(&version.to_le_bytes());
    header
}

/// Parse a table file header, returning the format version
pub fn parse_header(input: &[u8]) -> Result<u32> {
    if input.len() < HEADER_LEN {
        return Err(Error::Parse("Input too short for header".to_string()));
    }

    match header(input) {
        Ok((_, version)) => Ok(version),
        Err(_) => Err(Error::Parse("Invalid table magic header".to_string())),
    }
}

fn header(input: &[u8]) -> IResult<&[u8], u32> {
    let (input, _) = tag(TABLE_MAGIC)(input)?;
    le_u32(input)
}

/// Encode a record into its on-disk representation
pub fn encode_record(kind: RecordKind, row_id: u64, key: &[u8], value: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(RECORD_HEADER_LEN + key.len() + value.len());
    buf.push(match kind {
        RecordKind::Put => KIND_PUT,
        RecordKind::Delete => KIND_DELETE,
    });
    buf.extend_from_slice(&row_id.to_le_bytes());
    buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
    buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
    buf.extend_from_slice(key);
    buf.extend_from_slice(value);
    buf
}

/// Parse a single record
pub fn parse_record(input: &[u8]) -> IResult<&[u8], Record<'_>> {
    let (input, kind_byte) = le_u8(input)?;
    let kind = match kind_byte {
        KIND_PUT => RecordKind::Put,
        KIND_DELETE => RecordKind::Delete,
        _ => {
            return Err(nom::Err::Failure(nom::error::Error::new(
                input,
                nom::error::ErrorKind::Tag,
            )))
        }
    };
    let (input, row_id) = le_u64(input)?;
    let (input, key_len) = le_u32(input)?;
    let (input, value_len) = le_u32(input)?;
    let (input, key) = take(key_len)(input)?;
    let (input, value) = take(value_len)(input)?;

    Ok((
        input,
        Record {
            kind,
            row_id,
            key,
            value,
        },
    ))
}

/// Parse every record in `body` (the file contents after the header).
///
/// Returns each record with its offset relative to the start of `body`
/// and its encoded length. A truncated trailing record, as left behind by
/// a crash mid-append, ends the scan instead of failing it.
pub fn scan_records(body: &[u8]) -> Result<Vec<(u64, u32, Record<'_>)>> {
    let mut records = Vec::new();
    let mut rest = body;
    let mut offset = 0u64;

    while !rest.is_empty() {
        match parse_record(rest) {
            Ok((remaining, record)) => {
                let len = rest.len() - remaining.len();
                records.push((offset, len as u32, record));
                offset += len as u64;
                rest = remaining;
            }
            Err(nom::Err::Incomplete(_)) | Err(nom::Err::Error(_)) => break,
            Err(err) => return Err(err.into()),
        }
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header() {
        let header = create_header(TABLE_VERSION);
        assert_eq!(parse_header(&header).unwrap(), TABLE_VERSION);
    }

    #[test]
    fn test_parse_header_invalid_magic() {
        let mut header = create_header(1);
        header[0] = b'X';

        assert!(parse_header(&header).is_err());
    }

    #[test]
    fn test_parse_header_too_short() {
        assert!(parse_header(b"SPILTBL1").is_err());
    }

    #[test]
    fn test_parse_put_record() {
        let encoded = encode_record(RecordKind::Put, 7, b"key", b"value");
        let (rest, record) = parse_record(&encoded).unwrap();

        assert!(rest.is_empty());
        assert_eq!(record.kind, RecordKind::Put);
        assert_eq!(record.row_id, 7);
        assert_eq!(record.key, b"key");
        assert_eq!(record.value, b"value");
    }

    #[test]
    fn test_parse_delete_record() {
        let encoded = encode_record(RecordKind::Delete, 3, b"gone", b"");
        let (_, record) = parse_record(&encoded).unwrap();

        assert_eq!(record.kind, RecordKind::Delete);
        assert!(record.value.is_empty());
    }

    #[test]
    fn test_unknown_kind_fails() {
        let mut encoded = encode_record(RecordKind::Put, 1, b"k", b"v");
        encoded[0] = b'Z';

        assert!(matches!(parse_record(&encoded), Err(nom::Err::Failure(_))));
        assert!(scan_records(&encoded).is_err());
    }

    #[test]
    fn test_scan_stops_at_truncated_tail() {
        let mut body = encode_record(RecordKind::Put, 0, b"a", b"1");
        let first_len = body.len();
        body.extend(encode_record(RecordKind::Put, 1, b"b", b"22"));
        let full_len = body.len();
        body.extend_from_slice(&encode_record(RecordKind::Put, 2, b"c", b"333")[..5]);

        let records = scan_records(&body).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].0, 0);
        assert_eq!(records[1].0, first_len as u64);
        assert_eq!(records[1].1 as usize, full_len - first_len);
        assert_eq!(records[1].2.value, b"22");
    }
}
