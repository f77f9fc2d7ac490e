//! Aggregator manifest: durable per-domain retention boundaries and the
//! last persisted commitment.

use crate::error::{CoreError, CoreResult};
use crate::types::{Step, TxNum};
use std::collections::BTreeMap;

/// Magic bytes for the manifest file.
pub const MANIFEST_MAGIC: [u8; 4] = *b"SGMF";

/// Current manifest version.
pub const MANIFEST_VERSION: u16 = 1;

/// A persisted commitment root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitmentRecord {
    /// TxNum the root was computed at.
    pub tx_num: TxNum,
    /// Root bytes as returned by the calculator.
    pub root: Vec<u8>,
}

/// Aggregator manifest.
///
/// The manifest records facts that cannot be recovered from file discovery
/// alone:
/// - The step below which each domain has been pruned, so files that
///   survived a crash between the manifest write and their deletion are
///   not resurrected
/// - The last commitment root and the TxNum it covers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    /// Domain name to first retained step.
    pub pruned_to: BTreeMap<String, Step>,
    /// Last persisted commitment.
    pub commitment: Option<CommitmentRecord>,
}

impl Manifest {
    /// Creates an empty manifest.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// First retained step of `domain`.
    #[must_use]
    pub fn pruned_to(&self, domain: &str) -> Step {
        self.pruned_to.get(domain).copied().unwrap_or(0)
    }

    /// Encodes the manifest to bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&MANIFEST_MAGIC);
        buf.extend_from_slice(&MANIFEST_VERSION.to_le_bytes());

        let count = u32::try_from(self.pruned_to.len()).unwrap_or(u32::MAX);
        buf.extend_from_slice(&count.to_le_bytes());
        for (name, &step) in self.pruned_to.iter().take(count as usize) {
            let name_bytes = name.as_bytes();
            let name_len = u16::try_from(name_bytes.len()).unwrap_or(u16::MAX);
            buf.extend_from_slice(&name_len.to_le_bytes());
            buf.extend_from_slice(&name_bytes[..name_len as usize]);
            buf.extend_from_slice(&step.to_le_bytes());
        }

        match &self.commitment {
            Some(c) => {
                buf.push(1);
                buf.extend_from_slice(&c.tx_num.to_le_bytes());
                let root_len = u32::try_from(c.root.len()).unwrap_or(u32::MAX);
                buf.extend_from_slice(&root_len.to_le_bytes());
                buf.extend_from_slice(&c.root[..root_len as usize]);
            }
            None => buf.push(0),
        }

        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decodes a manifest from bytes.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        if data.len() < 4 + 2 + 4 || data[0..4] != MANIFEST_MAGIC {
            return Err(CoreError::invalid_format("invalid manifest magic"));
        }
        let (body, crc_bytes) = data.split_at(data.len() - 4);
        let stored = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        if crc32fast::hash(body) != stored {
            return Err(CoreError::invalid_format("manifest checksum mismatch"));
        }

        let mut r = Reader { data: body, pos: 4 };
        let version = u16::from_le_bytes(r.array()?);
        if version != MANIFEST_VERSION {
            return Err(CoreError::invalid_format(format!(
                "unsupported manifest version: {version}"
            )));
        }

        let count = u32::from_le_bytes(r.array()?);
        let mut pruned_to = BTreeMap::new();
        for _ in 0..count {
            let name_len = u16::from_le_bytes(r.array()?) as usize;
            let name = std::str::from_utf8(r.take(name_len)?)
                .map_err(|_| CoreError::invalid_format("invalid domain name"))?
                .to_string();
            let step = u64::from_le_bytes(r.array()?);
            pruned_to.insert(name, step);
        }

        let commitment = match r.take(1)?[0] {
            0 => None,
            1 => {
                let tx_num = u64::from_le_bytes(r.array()?);
                let root_len = u32::from_le_bytes(r.array()?) as usize;
                let root = r.take(root_len)?.to_vec();
                Some(CommitmentRecord { tx_num, root })
            }
            other => {
                return Err(CoreError::invalid_format(format!(
                    "bad commitment flag {other}"
                )))
            }
        };

        if r.pos != body.len() {
            return Err(CoreError::invalid_format("trailing bytes in manifest"));
        }

        Ok(Self {
            pruned_to,
            commitment,
        })
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> CoreResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&e| e <= self.data.len())
            .ok_or_else(|| CoreError::invalid_format("manifest too short"))?;
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn array<const N: usize>(&mut self) -> CoreResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_manifest() {
        let manifest = Manifest::new();
        assert!(manifest.pruned_to.is_empty());
        assert_eq!(manifest.pruned_to("accounts"), 0);
        assert!(manifest.commitment.is_none());
    }

    #[test]
    fn encode_decode_roundtrip() {
        let mut manifest = Manifest::new();
        manifest.pruned_to.insert("accounts".into(), 10);
        manifest.pruned_to.insert("storage".into(), 20);
        manifest.commitment = Some(CommitmentRecord {
            tx_num: 199,
            root: vec![0xAB; 32],
        });

        let decoded = Manifest::decode(&manifest.encode()).unwrap();
        assert_eq!(decoded, manifest);
        assert_eq!(decoded.pruned_to("storage"), 20);
    }

    #[test]
    fn corrupted_manifest_is_rejected() {
        let mut data = Manifest::new().encode();
        let last = data.len() - 5;
        data[last] ^= 1;
        assert!(Manifest::decode(&data).is_err());
        assert!(Manifest::decode(b"nope").is_err());
        assert!(Manifest::decode(&[]).is_err());
    }

    #[test]
    fn truncated_manifest_is_rejected() {
        let mut manifest = Manifest::new();
        manifest.pruned_to.insert("code".into(), 3);
        let data = manifest.encode();
        // Re-seal a truncated body so only the length checks can catch it.
        let mut body = data[..data.len() - 8].to_vec();
        let crc = crc32fast::hash(&body);
        body.extend_from_slice(&crc.to_le_bytes());
        assert!(Manifest::decode(&body).is_err());
    }
}
