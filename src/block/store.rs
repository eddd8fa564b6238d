use crate::{
    block::{BlockHash, Miniblock},
    rpc::types::ChainInfo,
    sc::NormalTxWithScid,
};

/// Counted transaction families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxCounterKind {
    Registration,
    Burn,
    Normal,
}

impl TxCounterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxCounterKind::Registration => "registration",
            TxCounterKind::Burn => "burn",
            TxCounterKind::Normal => "normal",
        }
    }
}

/// Chain-side persistence contract.
pub trait ChainStore {
    /// Persist the last fully applied topoheight. This is the commit point:
    /// a checkpoint is only written after every record for that block is in.
    fn store_checkpoint(&self, topoheight: u64) -> anyhow::Result<()>;

    fn get_checkpoint(&self) -> anyhow::Result<Option<u64>>;

    /// Persist the daemon snapshot when its height exceeds the stored one
    fn store_chain_info(&self, info: &ChainInfo) -> anyhow::Result<()>;

    fn get_chain_info(&self) -> anyhow::Result<Option<ChainInfo>>;

    /// Absolute write of a transaction counter
    fn store_tx_count(&self, kind: TxCounterKind, count: u64) -> anyhow::Result<()>;

    /// Current counter value, zero when never written
    fn get_tx_count(&self, kind: TxCounterKind) -> anyhow::Result<u64>;

    /// Record a normal transfer with a contract payload under a ring member
    fn store_normal_tx_with_scid(
        &self,
        addr: &str,
        record: &NormalTxWithScid,
    ) -> anyhow::Result<()>;

    fn get_normal_txs_by_addr(&self, addr: &str) -> anyhow::Result<Vec<NormalTxWithScid>>;

    fn store_miniblock_details(
        &self,
        blid: &BlockHash,
        miniblocks: &[Miniblock],
    ) -> anyhow::Result<()>;

    fn get_miniblock_details(&self, blid: &BlockHash) -> anyhow::Result<Vec<Miniblock>>;
}
