use serde::{Deserialize, Serialize};

pub mod store;
pub mod transaction;

/// Hash identifying a block, as the 64-hex string the daemon reports.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockHash(pub String);

impl std::fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "BlockHash {{ {:?} }}", self.0)
    }
}

impl std::fmt::Display for BlockHash {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for BlockHash {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Miniblock summary carried inside the block blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Miniblock {
    pub miner: String,
    pub timestamp: u64,
}

/// Deserialized form of the daemon's block blob: a length-prefixed binary
/// payload carrying the height and the ordered transaction hashes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub height: u64,
    pub timestamp: u64,
    pub miniblocks: Vec<Miniblock>,
    pub tx_hashes: Vec<String>,
}

impl Block {
    pub fn from_blob(blob: &str) -> anyhow::Result<Self> {
        let bytes = hex::decode(blob)?;
        Ok(bcs::from_bytes(&bytes)?)
    }

    pub fn to_blob(&self) -> String {
        hex::encode(bcs::to_bytes(self).expect("block serialization is infallible"))
    }
}
