use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Well-known raw storage key holding the GRANDPA authority set.
pub const GRANDPA_AUTHORITIES_KEY: &[u8] = b":grandpa_authorities";

/// 32-byte block hash, rendered as `0x`-prefixed hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockHash(pub [u8; 32]);

impl BlockHash {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn from_hex(value: &str) -> anyhow::Result<Self> {
        let stripped = value.strip_prefix("0x").unwrap_or(value);
        let bytes = hex::decode(stripped)?;
        let array: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| anyhow::anyhow!("block hash must be 32 bytes, got {}", bytes.len()))?;
        Ok(Self(array))
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for BlockHash {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

/// Raw storage key bytes.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct StorageKey(pub Vec<u8>);

impl StorageKey {
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.0))
    }

    pub fn from_hex(value: &str) -> anyhow::Result<Self> {
        let stripped = value.strip_prefix("0x").unwrap_or(value);
        Ok(Self(hex::decode(stripped)?))
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Finalized-head notification. Only the height is consumed by the sync
/// engine; the hash of the block is re-resolved by number when fetching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub number: u64,
}

/// Header and justification blobs for one block, both opaque to this crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedBlockParts {
    pub header: Vec<u8>,
    pub justification: Vec<u8>,
}

/// Cryptographic witness for a storage value against a block's state root.
/// Carried alongside every cached storage value so downstream consumers can
/// verify without trusting the RPC provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageProof {
    pub at: BlockHash,
    pub proof: Vec<Vec<u8>>,
}
