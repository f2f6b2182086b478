// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The persistence envelope shared by every container kind:
//!
//! ```reference
//! stream   := guid header element*
//! guid     := 16 bytes, distinct per container kind, verified on load
//! header   := count flags extra;  all ULE128
//! element  := written by a caller-supplied closure
//! ule128   := little-endian base-128; 7 data bits per byte, continuation
//!             bit in the high-order position
//! ```
//!
//! In-memory state (capacities, cursors, hooks) is never serialized, only
//! the logical contents. Serialization happens one byte at a time in
//! places; use a buffered writer.

use crate::ContainerError;
use std::io::{self, Read, Write};

/// Identifies a container kind in a stream.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Guid(pub [u8; 16]);

pub(crate) const VECTOR_GUID: Guid = Guid([
    0xba, 0x53, 0xf1, 0x1e, 0x58, 0x79, 0x49, 0xe5, 0x9e, 0x07, 0x2d, 0x9b, 0x8e, 0x70, 0x54, 0x41,
]);
pub(crate) const LIST_GUID: Guid = Guid([
    0x6e, 0x2e, 0x21, 0x60, 0xab, 0xa0, 0x43, 0x4c, 0xa2, 0x56, 0x3e, 0x11, 0x1f, 0x51, 0x43, 0x66,
]);
pub(crate) const SLIST_GUID: Guid = Guid([
    0x29, 0x81, 0x64, 0x77, 0x7f, 0x30, 0x4e, 0x52, 0x93, 0x26, 0xb0, 0x81, 0x83, 0x7f, 0x7e, 0x41,
]);
pub(crate) const DICTIONARY_GUID: Guid = Guid([
    0x0a, 0x33, 0x4a, 0x9d, 0x89, 0x7c, 0x4b, 0xed, 0x92, 0xa3, 0x02, 0xbf, 0x86, 0xd5, 0x2e, 0xcf,
]);
pub(crate) const SEARCHTREE_GUID: Guid = Guid([
    0x9a, 0x01, 0x17, 0x19, 0x22, 0xac, 0x46, 0x1d, 0x89, 0xa1, 0x75, 0xd4, 0x4b, 0x85, 0x53, 0xfb,
]);
pub(crate) const BITSTRING_GUID: Guid = Guid([
    0x7d, 0xfb, 0x3a, 0x52, 0x10, 0x53, 0x45, 0xdd, 0x8e, 0x24, 0x8c, 0x55, 0x07, 0x45, 0x3e, 0x18,
]);

/// Encodes a ULE128 value, low group first, continuation bit 0x80.
pub fn encode_varint(mut value: u64, writer: &mut dyn Write) -> io::Result<()> {
    loop {
        let byte = if value < 0x80 {
            value as u8
        } else {
            ((value & 0x7F) | 0x80) as u8
        };
        writer.write_all(&[byte])?;
        if value < 0x80 {
            return Ok(());
        }
        value >>= 7;
    }
}

/// Decodes a ULE128 value. Fails on stream end and on encodings longer
/// than the 10 bytes a u64 can need.
pub fn decode_varint(reader: &mut dyn Read) -> io::Result<u64> {
    let mut value = 0u64;
    for shift in (0..64).step_by(7) {
        let mut byte = [0u8; 1];
        reader.read_exact(&mut byte)?;
        value |= u64::from(byte[0] & 0x7F) << shift;
        if byte[0] < 0x80 {
            return Ok(value);
        }
    }
    Err(io::Error::new(
        io::ErrorKind::InvalidData,
        "ULE128 encoding exceeds 64 bits",
    ))
}

/// Number of bytes [encode_varint] emits for `value`.
pub fn varint_len(value: u64) -> u64 {
    ((((value | 1).leading_zeros() ^ 63) * 9 + 73) / 64) as u64
}

pub(crate) fn write_envelope(
    writer: &mut dyn Write,
    guid: &Guid,
    count: u64,
    flags: u32,
    extra: u64,
) -> Result<(), ContainerError> {
    let mut put = || -> io::Result<()> {
        writer.write_all(&guid.0)?;
        encode_varint(count, writer)?;
        encode_varint(u64::from(flags), writer)?;
        encode_varint(extra, writer)
    };
    put().map_err(|_| ContainerError::FileWrite)
}

#[derive(Debug)]
pub(crate) struct Envelope {
    pub count: u64,
    pub flags: u32,
    pub extra: u64,
}

pub(crate) fn read_envelope(
    reader: &mut dyn Read,
    expected: &Guid,
) -> Result<Envelope, ContainerError> {
    let mut guid = [0u8; 16];
    reader
        .read_exact(&mut guid)
        .map_err(|_| ContainerError::FileRead)?;
    if &Guid(guid) != expected {
        return Err(ContainerError::WrongFile);
    }
    let count = decode_varint(reader).map_err(|_| ContainerError::FileRead)?;
    let flags = decode_varint(reader).map_err(|_| ContainerError::FileRead)?;
    let flags = u32::try_from(flags).map_err(|_| ContainerError::FileRead)?;
    let extra = decode_varint(reader).map_err(|_| ContainerError::FileRead)?;
    Ok(Envelope {
        count,
        flags,
        extra,
    })
}

/// Length-prefixed string, for dictionary keys and the like.
pub(crate) fn write_str(writer: &mut dyn Write, s: &str) -> io::Result<()> {
    encode_varint(s.len() as u64, writer)?;
    writer.write_all(s.as_bytes())
}

pub(crate) fn read_string(reader: &mut dyn Read) -> io::Result<String> {
    let len = decode_varint(reader)?;
    let len = usize::try_from(len).map_err(io::Error::other)?;
    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(io::Error::other)
}

/// Closure type element payloads are written with.
pub type SaveElement<'a, T> = &'a mut dyn FnMut(&T, &mut dyn Write) -> io::Result<()>;

/// Closure type element payloads are read back with.
pub type LoadElement<'a, T> = &'a mut dyn FnMut(&mut dyn Read) -> io::Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_roundtrip() {
        let cases = [0u64, 1, 0x7F, 0x80, 300, 0x3FFF, 0x4000, u64::MAX];
        for value in cases {
            let mut buf = Vec::new();
            encode_varint(value, &mut buf).unwrap();
            assert_eq!(varint_len(value), buf.len() as u64);
            let back = decode_varint(&mut buf.as_slice()).unwrap();
            assert_eq!(value, back);
        }
    }

    #[test]
    fn test_varint_len_boundaries() {
        assert_eq!(1, varint_len(0));
        assert_eq!(1, varint_len(0x7F));
        assert_eq!(2, varint_len(0x80));
        assert_eq!(10, varint_len(u64::MAX));
    }

    #[test]
    fn test_envelope_guid_check() {
        let mut buf = Vec::new();
        write_envelope(&mut buf, &VECTOR_GUID, 7, 1, 0).unwrap();

        let envelope = read_envelope(&mut buf.as_slice(), &VECTOR_GUID).unwrap();
        assert_eq!(7, envelope.count);
        assert_eq!(1, envelope.flags);

        // A stream for another container kind is rejected.
        let err = read_envelope(&mut buf.as_slice(), &LIST_GUID).unwrap_err();
        assert_eq!(ContainerError::WrongFile, err);
    }

    #[test]
    fn test_truncated_stream() {
        let mut buf = Vec::new();
        write_envelope(&mut buf, &LIST_GUID, 3, 0, 0).unwrap();
        buf.truncate(10);
        let err = read_envelope(&mut buf.as_slice(), &LIST_GUID).unwrap_err();
        assert_eq!(ContainerError::FileRead, err);
    }

    #[test]
    fn test_string_roundtrip() {
        let mut buf = Vec::new();
        write_str(&mut buf, "containers").unwrap();
        write_str(&mut buf, "").unwrap();
        let mut cursor = buf.as_slice();
        assert_eq!("containers", read_string(&mut cursor).unwrap());
        assert_eq!("", read_string(&mut cursor).unwrap());
    }
}
