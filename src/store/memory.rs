use crate::{
    block::{
        store::{ChainStore, TxCounterKind},
        BlockHash, Miniblock,
    },
    rpc::types::ChainInfo,
    sc::{
        store::ScStore,
        NormalTxWithScid, ScMethod, ScTx, ScVariable, Scid,
    },
    store::{
        addr_key, addr_prefix, height_prefix, interaction_key, invoke_key,
        parse_interaction_key, scid_prefix, FixedKeys, IndexStore, COLUMN_FAMILIES,
        INTERACTIONS_CF, INVALID_DEPLOYS_CF, INVOKES_CF, MINIBLOCKS_CF, NORMAL_TXS_CF,
        OWNERS_CF, STATE_CF, TX_COUNTS_CF, VARIABLES_CF,
    },
};
use serde::{de::DeserializeOwned, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    sync::RwLock,
};

type Tree = BTreeMap<Vec<u8>, Vec<u8>>;

/// Throwaway in-memory store with the same tree layout and single-writer
/// discipline as the disk store. Used by the registrar's catch-up scans.
pub struct MemoryStore {
    inner: RwLock<HashMap<&'static str, Tree>>,
}

impl FixedKeys for MemoryStore {}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let mut trees = HashMap::new();
        for name in COLUMN_FAMILIES {
            trees.insert(name, Tree::new());
        }
        Self {
            inner: RwLock::new(trees),
        }
    }

    fn get_json<T: DeserializeOwned>(&self, tree: &str, key: &[u8]) -> anyhow::Result<Option<T>> {
        let inner = self.inner.read().expect("store lock poisoned");
        match inner.get(tree).expect("tree exists").get(key) {
            None => Ok(None),
            Some(bytes) => Ok(Some(serde_json::from_slice(bytes)?)),
        }
    }

    fn put_json<T: Serialize>(&self, tree: &str, key: &[u8], value: &T) -> anyhow::Result<()> {
        let mut inner = self.inner.write().expect("store lock poisoned");
        inner
            .get_mut(tree)
            .expect("tree exists")
            .insert(key.to_vec(), serde_json::to_vec(value)?);
        Ok(())
    }

    fn scan_prefix(&self, tree: &str, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        let inner = self.inner.read().expect("store lock poisoned");
        inner
            .get(tree)
            .expect("tree exists")
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}

impl ChainStore for MemoryStore {
    fn store_checkpoint(&self, topoheight: u64) -> anyhow::Result<()> {
        self.put_json(STATE_CF, Self::CHECKPOINT_KEY, &topoheight)
    }

    fn get_checkpoint(&self) -> anyhow::Result<Option<u64>> {
        self.get_json(STATE_CF, Self::CHECKPOINT_KEY)
    }

    fn store_chain_info(&self, info: &ChainInfo) -> anyhow::Result<()> {
        let mut inner = self.inner.write().expect("store lock poisoned");
        let tree = inner.get_mut(STATE_CF).expect("tree exists");
        if let Some(bytes) = tree.get(Self::CHAIN_INFO_KEY) {
            let stored: ChainInfo = serde_json::from_slice(bytes)?;
            if stored.height >= info.height {
                return Ok(());
            }
        }
        tree.insert(Self::CHAIN_INFO_KEY.to_vec(), serde_json::to_vec(info)?);
        Ok(())
    }

    fn get_chain_info(&self) -> anyhow::Result<Option<ChainInfo>> {
        self.get_json(STATE_CF, Self::CHAIN_INFO_KEY)
    }

    fn store_tx_count(&self, kind: TxCounterKind, count: u64) -> anyhow::Result<()> {
        self.put_json(TX_COUNTS_CF, kind.as_str().as_bytes(), &count)
    }

    fn get_tx_count(&self, kind: TxCounterKind) -> anyhow::Result<u64> {
        Ok(self
            .get_json(TX_COUNTS_CF, kind.as_str().as_bytes())?
            .unwrap_or(0))
    }

    fn store_normal_tx_with_scid(
        &self,
        addr: &str,
        record: &NormalTxWithScid,
    ) -> anyhow::Result<()> {
        self.put_json(NORMAL_TXS_CF, &addr_key(addr, &record.txid), record)
    }

    fn get_normal_txs_by_addr(&self, addr: &str) -> anyhow::Result<Vec<NormalTxWithScid>> {
        self.scan_prefix(NORMAL_TXS_CF, &addr_prefix(addr))
            .into_iter()
            .map(|(_, value)| serde_json::from_slice(&value).map_err(anyhow::Error::from))
            .collect()
    }

    fn store_miniblock_details(
        &self,
        blid: &BlockHash,
        miniblocks: &[Miniblock],
    ) -> anyhow::Result<()> {
        self.put_json(MINIBLOCKS_CF, blid.0.as_bytes(), &miniblocks.to_vec())
    }

    fn get_miniblock_details(&self, blid: &BlockHash) -> anyhow::Result<Vec<Miniblock>> {
        Ok(self
            .get_json(MINIBLOCKS_CF, blid.0.as_bytes())?
            .unwrap_or_default())
    }
}

impl ScStore for MemoryStore {
    fn store_owner(&self, scid: &Scid, owner: &str) -> anyhow::Result<()> {
        self.put_json(OWNERS_CF, scid.0.as_bytes(), &owner.to_string())
    }

    fn get_owner(&self, scid: &Scid) -> anyhow::Result<Option<String>> {
        self.get_json(OWNERS_CF, scid.0.as_bytes())
    }

    fn get_all_owners(&self) -> anyhow::Result<HashMap<String, String>> {
        let inner = self.inner.read().expect("store lock poisoned");
        inner
            .get(OWNERS_CF)
            .expect("tree exists")
            .iter()
            .map(|(key, value)| {
                Ok((
                    String::from_utf8(key.clone())?,
                    serde_json::from_slice(value)?,
                ))
            })
            .collect()
    }

    fn store_invoke(&self, scid: &Scid, topoheight: u64, invoke: &ScTx) -> anyhow::Result<()> {
        let mut inner = self.inner.write().expect("store lock poisoned");

        let prefix = height_prefix(scid, topoheight);
        let duplicate = inner
            .get(INVOKES_CF)
            .expect("tree exists")
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .any(|(_, value)| {
                serde_json::from_slice::<ScTx>(value)
                    .map(|existing| existing.txid == invoke.txid)
                    .unwrap_or(false)
            });
        if duplicate {
            return Ok(());
        }

        let ordinal = inner
            .get(STATE_CF)
            .expect("tree exists")
            .get(Self::NEXT_INVOKE_ORDINAL_KEY)
            .map(|bytes| serde_json::from_slice::<u64>(bytes))
            .transpose()?
            .unwrap_or(0);
        inner
            .get_mut(INVOKES_CF)
            .expect("tree exists")
            .insert(invoke_key(scid, topoheight, ordinal), serde_json::to_vec(invoke)?);
        inner
            .get_mut(STATE_CF)
            .expect("tree exists")
            .insert(
                Self::NEXT_INVOKE_ORDINAL_KEY.to_vec(),
                serde_json::to_vec(&(ordinal + 1))?,
            );
        Ok(())
    }

    fn get_all_invokes(&self, scid: &Scid) -> anyhow::Result<Vec<ScTx>> {
        self.scan_prefix(INVOKES_CF, &scid_prefix(scid))
            .into_iter()
            .map(|(_, value)| serde_json::from_slice(&value).map_err(anyhow::Error::from))
            .collect()
    }

    fn store_sc_vars(
        &self,
        scid: &Scid,
        topoheight: u64,
        vars: &[ScVariable],
    ) -> anyhow::Result<()> {
        self.put_json(VARIABLES_CF, &height_prefix(scid, topoheight), &vars.to_vec())
    }

    fn get_sc_vars(&self, scid: &Scid, topoheight: u64) -> anyhow::Result<Vec<ScVariable>> {
        Ok(self
            .get_json(VARIABLES_CF, &height_prefix(scid, topoheight))?
            .unwrap_or_default())
    }

    fn store_interaction_height(
        &self,
        scid: &Scid,
        method: ScMethod,
        topoheight: u64,
    ) -> anyhow::Result<()> {
        let mut inner = self.inner.write().expect("store lock poisoned");
        inner
            .get_mut(INTERACTIONS_CF)
            .expect("tree exists")
            .insert(interaction_key(scid, topoheight, method), vec![]);
        Ok(())
    }

    fn get_interaction_heights(&self, scid: &Scid) -> anyhow::Result<Vec<(ScMethod, u64)>> {
        Ok(self
            .scan_prefix(INTERACTIONS_CF, &scid_prefix(scid))
            .into_iter()
            .filter_map(|(key, _)| parse_interaction_key(scid, &key))
            .collect())
    }

    fn store_invalid_deploy(&self, scid: &Scid, fees: u64) -> anyhow::Result<()> {
        self.put_json(INVALID_DEPLOYS_CF, scid.0.as_bytes(), &fees)
    }

    fn get_invalid_deploy(&self, scid: &Scid) -> anyhow::Result<Option<u64>> {
        self.get_json(INVALID_DEPLOYS_CF, scid.0.as_bytes())
    }
}

impl IndexStore for MemoryStore {
    fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
