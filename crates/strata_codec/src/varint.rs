//! Unsigned LEB128 varints.
//!
//! Byte-compatible with the common "uvarint" encoding: seven payload bits per
//! byte, high bit set on every byte except the last.

use crate::error::{CodecError, CodecResult};
use std::io::{self, Read};

/// Maximum encoded length of a `u64`.
pub const MAX_VARINT_LEN: usize = 10;

/// Appends `value` to `buf`, returning the number of bytes written.
pub fn put_uvarint(buf: &mut Vec<u8>, mut value: u64) -> usize {
    let start = buf.len();
    while value >= 0x80 {
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
    buf.len() - start
}

/// Returns the encoded length of `value`.
#[must_use]
pub fn uvarint_len(mut value: u64) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

/// Decodes a varint from `data` at `*pos`, advancing `*pos`.
pub fn read_uvarint(data: &[u8], pos: &mut usize) -> CodecResult<u64> {
    let mut value = 0u64;
    let mut shift = 0u32;
    for i in 0..MAX_VARINT_LEN {
        let Some(&byte) = data.get(*pos + i) else {
            return Err(CodecError::corrupt("truncated varint"));
        };
        if i == MAX_VARINT_LEN - 1 && byte > 1 {
            return Err(CodecError::corrupt("varint overflows u64"));
        }
        value |= u64::from(byte & 0x7f) << shift;
        if byte < 0x80 {
            *pos += i + 1;
            return Ok(value);
        }
        shift += 7;
    }
    Err(CodecError::corrupt("varint overflows u64"))
}

/// Reads a varint from a stream.
///
/// Returns `Ok(None)` on a clean end of stream (no bytes read) and an
/// `UnexpectedEof` error if the stream ends inside a varint.
pub fn read_uvarint_from<R: Read>(reader: &mut R) -> io::Result<Option<u64>> {
    let mut value = 0u64;
    let mut shift = 0u32;
    let mut byte = [0u8; 1];
    for i in 0..MAX_VARINT_LEN {
        if reader.read(&mut byte)? == 0 {
            if i == 0 {
                return Ok(None);
            }
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stream ended inside varint",
            ));
        }
        value |= u64::from(byte[0] & 0x7f) << shift;
        if byte[0] < 0x80 {
            return Ok(Some(value));
        }
        shift += 7;
    }
    Err(io::Error::new(
        io::ErrorKind::InvalidData,
        "varint overflows u64",
    ))
}
