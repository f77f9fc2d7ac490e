//! On-disk layout constants for segment files.
//!
//! ```text
//! | magic (4) | version (2) | flags (2) | word_count (8) | pattern_count (4) |
//! | patterns: (uvarint len, bytes)* | body_len (8) | body |
//! | offsets: word_count × u64, only with FLAG_OFFSETS | crc32 (4) |
//! ```
//!
//! All fixed-width integers are little-endian. A word in the body is
//!
//! ```text
//! | uvarint decoded_len | uvarint ops_len | ops |
//! ```
//!
//! where each op starts with a uvarint tag: an even tag is a literal of
//! `tag >> 1` bytes that follow, an odd tag references pattern `tag >> 1`.

/// Magic bytes identifying a segment file: "SGSF".
pub const SEGMENT_MAGIC: [u8; 4] = *b"SGSF";

/// Current segment format version. Readers reject any other version.
pub const SEGMENT_VERSION: u16 = 1;

/// Flag: a word offset table trails the body.
pub const FLAG_OFFSETS: u16 = 0x0001;

/// Size of the fixed header before the pattern table.
pub(crate) const FIXED_HEADER_SIZE: usize = 4 + 2 + 2 + 8 + 4;

/// Size of the trailing checksum.
pub(crate) const CRC_SIZE: usize = 4;

pub(crate) fn read_u16(data: &[u8], pos: usize) -> u16 {
    u16::from_le_bytes([data[pos], data[pos + 1]])
}

pub(crate) fn read_u32(data: &[u8], pos: usize) -> u32 {
    u32::from_le_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]])
}

pub(crate) fn read_u64(data: &[u8], pos: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&data[pos..pos + 8]);
    u64::from_le_bytes(buf)
}
