//! Core type definitions for strata.

use crate::error::{CoreError, CoreResult};
use std::fmt;
use std::str::FromStr;

/// Global, strictly increasing number of a state-changing operation.
pub type TxNum = u64;

/// Fixed-size bucket of TxNums; the unit of freeze, merge and prune.
pub type Step = u64;

/// Half-open range of steps `[from, to)` covered by one set of segment files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StepRange {
    /// First step in the range.
    pub from: Step,
    /// First step after the range.
    pub to: Step,
}

impl StepRange {
    /// Creates a range. `from` must be below `to`.
    pub fn new(from: Step, to: Step) -> CoreResult<Self> {
        if from >= to {
            return Err(CoreError::invalid_operation(format!(
                "empty step range {from}-{to}"
            )));
        }
        Ok(Self { from, to })
    }

    /// Number of steps covered.
    #[must_use]
    pub const fn span(&self) -> u64 {
        self.to - self.from
    }

    /// Returns true if `other` lies entirely within this range.
    #[must_use]
    pub const fn contains(&self, other: &StepRange) -> bool {
        self.from <= other.from && other.to <= self.to
    }

    /// First TxNum of the range.
    #[must_use]
    pub const fn from_tx(&self, step_size: u64) -> TxNum {
        self.from * step_size
    }

    /// First TxNum after the range.
    #[must_use]
    pub const fn to_tx(&self, step_size: u64) -> TxNum {
        self.to * step_size
    }
}

impl fmt::Display for StepRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.from, self.to)
    }
}

impl FromStr for StepRange {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (from, to) = s
            .split_once('-')
            .ok_or_else(|| CoreError::invalid_format(format!("step range {s:?} lacks '-'")))?;
        let parse = |part: &str| {
            part.parse::<Step>()
                .map_err(|_| CoreError::invalid_format(format!("bad step {part:?} in {s:?}")))
        };
        Self::new(parse(from)?, parse(to)?)
    }
}

/// Iteration order for TxNum queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    /// Oldest first.
    #[default]
    Asc,
    /// Newest first.
    Desc,
}

/// Flag byte for a stored value.
pub(crate) const FLAG_VALUE: u8 = 0;
/// Flag byte for a deletion marker.
pub(crate) const FLAG_TOMBSTONE: u8 = 1;

/// Encodes a value (`None` = tombstone) as `flag ‖ bytes`.
pub(crate) fn encode_value(value: Option<&[u8]>, out: &mut Vec<u8>) {
    match value {
        Some(v) => {
            out.push(FLAG_VALUE);
            out.extend_from_slice(v);
        }
        None => out.push(FLAG_TOMBSTONE),
    }
}

/// Decodes `flag ‖ bytes`. `None` means the key was deleted.
pub(crate) fn decode_value(data: &[u8]) -> CoreResult<Option<Vec<u8>>> {
    match data.split_first() {
        Some((&FLAG_VALUE, rest)) => Ok(Some(rest.to_vec())),
        Some((&FLAG_TOMBSTONE, [])) => Ok(None),
        Some((flag, _)) => Err(CoreError::invalid_format(format!("bad value flag {flag}"))),
        None => Err(CoreError::invalid_format("empty value")),
    }
}

/// Encodes the latest-value word of a `kv` file: `flag ‖ txNum ‖ bytes`.
pub(crate) fn encode_latest(tx_num: TxNum, value: Option<&[u8]>) -> Vec<u8> {
    let mut out = Vec::with_capacity(9 + value.map_or(0, <[u8]>::len));
    out.push(if value.is_some() { FLAG_VALUE } else { FLAG_TOMBSTONE });
    out.extend_from_slice(&tx_num.to_be_bytes());
    if let Some(v) = value {
        out.extend_from_slice(v);
    }
    out
}

/// Decodes a `kv` value word into `(txNum, value-or-tombstone)`.
pub(crate) fn decode_latest(data: &[u8]) -> CoreResult<(TxNum, Option<Vec<u8>>)> {
    if data.len() < 9 {
        return Err(CoreError::invalid_format("latest value word too short"));
    }
    let tx_num = read_be_u64(&data[1..9]);
    match data[0] {
        FLAG_VALUE => Ok((tx_num, Some(data[9..].to_vec()))),
        FLAG_TOMBSTONE => Ok((tx_num, None)),
        flag => Err(CoreError::invalid_format(format!("bad value flag {flag}"))),
    }
}

/// Reads a big-endian u64 from the first 8 bytes of `data`.
pub(crate) fn read_be_u64(data: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&data[..8]);
    u64::from_be_bytes(buf)
}

/// Smallest byte string greater than every string starting with `prefix`,
/// or `None` if no such string exists.
pub(crate) fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut next = prefix.to_vec();
    while let Some(last) = next.pop() {
        if last < 0xFF {
            next.push(last + 1);
            return Some(next);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_range_display_and_parse() {
        let r = StepRange::new(0, 10).unwrap();
        assert_eq!(r.to_string(), "0-10");
        assert_eq!("0-10".parse::<StepRange>().unwrap(), r);
        assert!("10-10".parse::<StepRange>().is_err());
        assert!("a-10".parse::<StepRange>().is_err());
        assert!("10".parse::<StepRange>().is_err());
    }

    #[test]
    fn step_range_math() {
        let r = StepRange::new(2, 4).unwrap();
        assert_eq!(r.span(), 2);
        assert_eq!(r.from_tx(10), 20);
        assert_eq!(r.to_tx(10), 40);
        assert!(StepRange::new(0, 8).unwrap().contains(&r));
        assert!(!r.contains(&StepRange::new(0, 8).unwrap()));
    }

    #[test]
    fn value_encoding() {
        let mut buf = Vec::new();
        encode_value(Some(b"abc"), &mut buf);
        assert_eq!(decode_value(&buf).unwrap(), Some(b"abc".to_vec()));

        buf.clear();
        encode_value(None, &mut buf);
        assert_eq!(decode_value(&buf).unwrap(), None);
        assert!(decode_value(&[]).is_err());
        assert!(decode_value(&[7]).is_err());

        let latest = encode_latest(42, Some(b"v"));
        assert_eq!(decode_latest(&latest).unwrap(), (42, Some(b"v".to_vec())));
        let deleted = encode_latest(43, None);
        assert_eq!(decode_latest(&deleted).unwrap(), (43, None));
    }

    #[test]
    fn successor() {
        assert_eq!(prefix_successor(b"ab"), Some(b"ac".to_vec()));
        assert_eq!(prefix_successor(&[1, 0xFF]), Some(vec![2]));
        assert_eq!(prefix_successor(&[0xFF, 0xFF]), None);
    }
}
