//! # Strata Codec
//!
//! Immutable, compressed word files ("segments") for strata.
//!
//! A segment stores an ordered sequence of byte strings ("words"). The
//! compressor builds a dictionary of frequent substrings over all words and
//! encodes every word as a mix of literal runs and dictionary references.
//! Words come back out in insertion order, byte-exact.
//!
//! ## Guarantees
//!
//! - A file is written under a temporary name and renamed into place, so a
//!   crash leaves either no file or a complete one
//! - The whole file is covered by a CRC-32 that is verified at open
//! - A cursor position returned by [`Getter::offset`] can be restored with
//!   [`Getter::reset`]
//!
//! ## Usage
//!
//! ```
//! use strata_codec::{CancelToken, Compressor, CompressorConfig, Decompressor};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let path = dir.path().join("accounts.kv");
//!
//! let mut c = Compressor::new(&path, CompressorConfig::default().with_offsets(true));
//! for i in 0..10u8 {
//!     c.add_word(&[b'k', i]);
//! }
//! c.compress(&CancelToken::new()).unwrap();
//!
//! let d = Decompressor::open(&path).unwrap();
//! assert_eq!(d.word_count(), 10);
//! let mut g = d.make_getter();
//! let offset = d.offsets().unwrap()[3];
//! g.reset(offset).unwrap();
//! assert_eq!(g.next_word().unwrap(), vec![b'k', 3]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod atomic_file;
mod cancel;
mod compress;
mod decompress;
mod error;
mod format;
mod interchange;
mod patterns;
mod varint;
mod workers;

pub use atomic_file::{is_temp_path, sync_dir, temp_path_for, write_atomic, TEMP_SUFFIX};
pub use cancel::CancelToken;
pub use compress::{CompressStats, Compressor, CompressorConfig, MIN_PATTERN_SCORE};
pub use decompress::{Decompressor, Getter, ReadAheadGuard, POINT_READ_CHUNK, READ_AHEAD_CHUNK};
pub use error::{CodecError, CodecResult};
pub use format::{FLAG_OFFSETS, SEGMENT_MAGIC, SEGMENT_VERSION};
pub use interchange::{compress_from, uncompress_to, write_interchange, InterchangeReader};
pub use varint::{put_uvarint, read_uvarint, read_uvarint_from, uvarint_len, MAX_VARINT_LEN};
pub use workers::{map_chunks, try_map};
