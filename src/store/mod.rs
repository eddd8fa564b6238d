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
};
use rocksdb::{ColumnFamilyDescriptor, Direction, IteratorMode, DB};
use serde::{de::DeserializeOwned, Serialize};
use sha1::{Digest, Sha1};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::RwLock,
};
use tracing::trace;

pub mod memory;

pub const STATE_CF: &str = "state";
pub const OWNERS_CF: &str = "owners";
pub const INVOKES_CF: &str = "invokes";
pub const VARIABLES_CF: &str = "variables";
pub const INTERACTIONS_CF: &str = "interactions";
pub const INVALID_DEPLOYS_CF: &str = "invalid_deploys";
pub const TX_COUNTS_CF: &str = "tx_counts";
pub const NORMAL_TXS_CF: &str = "normal_txs";
pub const MINIBLOCKS_CF: &str = "miniblocks";

pub const COLUMN_FAMILIES: [&str; 9] = [
    STATE_CF,
    OWNERS_CF,
    INVOKES_CF,
    VARIABLES_CF,
    INTERACTIONS_CF,
    INVALID_DEPLOYS_CF,
    TX_COUNTS_CF,
    NORMAL_TXS_CF,
    MINIBLOCKS_CF,
];

pub trait FixedKeys {
    const CHECKPOINT_KEY: &'static [u8] = b"last_indexed_topoheight";
    const CHAIN_INFO_KEY: &'static [u8] = b"chain_info";
    const NEXT_INVOKE_ORDINAL_KEY: &'static [u8] = b"next_invoke_ordinal";
}

/// Everything the indexer needs from a storage backend. Implemented by the
/// disk-backed [`IndexerStore`] and the throwaway [`memory::MemoryStore`].
pub trait IndexStore: ChainStore + ScStore + Send + Sync {
    /// Flush and make the commit cursor durable
    fn close(&self) -> anyhow::Result<()>;
}

/// Database directory for a search filter:
/// `<base>/gnomondb/GNOMON_<sha1(filter)>`, defaulting the filter to the
/// literal `gnomon` when unset.
pub fn db_directory(base: &Path, search_filter: Option<&str>) -> PathBuf {
    let tag = search_filter.filter(|f| !f.is_empty()).unwrap_or("gnomon");
    let digest = Sha1::digest(tag.as_bytes());
    base.join("gnomondb")
        .join(format!("GNOMON_{}", hex::encode(digest)))
}

// Composite key layouts. Scids and addresses are ascii, so a ':' separator
// plus big-endian heights keeps rocksdb's lexicographic order equal to the
// (scid, topoheight, ordinal) order the contracts are read back in.

pub(crate) fn scid_prefix(scid: &Scid) -> Vec<u8> {
    let mut key = scid.0.as_bytes().to_vec();
    key.push(b':');
    key
}

pub(crate) fn height_prefix(scid: &Scid, topoheight: u64) -> Vec<u8> {
    let mut key = scid_prefix(scid);
    key.extend_from_slice(&topoheight.to_be_bytes());
    key
}

pub(crate) fn invoke_key(scid: &Scid, topoheight: u64, ordinal: u64) -> Vec<u8> {
    let mut key = height_prefix(scid, topoheight);
    key.extend_from_slice(&ordinal.to_be_bytes());
    key
}

pub(crate) fn interaction_key(scid: &Scid, topoheight: u64, method: ScMethod) -> Vec<u8> {
    let mut key = height_prefix(scid, topoheight);
    key.push(b':');
    key.extend_from_slice(method.as_str().as_bytes());
    key
}

pub(crate) fn parse_interaction_key(scid: &Scid, key: &[u8]) -> Option<(ScMethod, u64)> {
    let rest = &key[scid.0.len() + 1..];
    if rest.len() < 9 {
        return None;
    }
    let topoheight = u64::from_be_bytes(rest[..8].try_into().ok()?);
    let method = match &rest[9..] {
        b"installsc" => ScMethod::InstallSc,
        b"scinvoke" => ScMethod::ScInvoke,
        _ => return None,
    };
    Some((method, topoheight))
}

pub(crate) fn addr_key(addr: &str, txid: &str) -> Vec<u8> {
    let mut key = addr.as_bytes().to_vec();
    key.push(b':');
    key.extend_from_slice(txid.as_bytes());
    key
}

pub(crate) fn addr_prefix(addr: &str) -> Vec<u8> {
    let mut key = addr.as_bytes().to_vec();
    key.push(b':');
    key
}

/// Disk-backed store: one rocksdb column family per logical tree, a single
/// writer enforced by the store itself, shared readers.
pub struct IndexerStore {
    db_path: PathBuf,
    database: DB,
    writer: RwLock<()>,
}

impl FixedKeys for IndexerStore {}

impl IndexerStore {
    pub fn new(path: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(path)?;
        let mut cf_opts = rocksdb::Options::default();
        cf_opts.set_max_write_buffer_number(16);
        let descriptors = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, cf_opts.clone()))
            .collect::<Vec<_>>();

        let mut database_opts = rocksdb::Options::default();
        database_opts.create_missing_column_families(true);
        database_opts.create_if_missing(true);
        let database = DB::open_cf_descriptors(&database_opts, path, descriptors)?;
        Ok(Self {
            db_path: PathBuf::from(path),
            database,
            writer: RwLock::new(()),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn cf(&self, name: &str) -> &rocksdb::ColumnFamily {
        self.database
            .cf_handle(name)
            .expect("column family exists")
    }

    fn get_json<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> anyhow::Result<Option<T>> {
        match self.database.get_pinned_cf(self.cf(cf), key)? {
            None => Ok(None),
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        }
    }

    // Callers hold the writer guard.
    fn put_json<T: Serialize>(&self, cf: &str, key: &[u8], value: &T) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.database.put_cf(self.cf(cf), key, bytes)?;
        Ok(())
    }

    fn scan_prefix(&self, cf: &str, prefix: &[u8]) -> anyhow::Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mode = IteratorMode::From(prefix, Direction::Forward);
        let mut entries = vec![];
        for item in self.database.iterator_cf(self.cf(cf), mode) {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            entries.push((key.to_vec(), value.to_vec()));
        }
        Ok(entries)
    }
}

impl ChainStore for IndexerStore {
    fn store_checkpoint(&self, topoheight: u64) -> anyhow::Result<()> {
        trace!("storing checkpoint at {topoheight}");
        let _write = self.writer.write().expect("writer lock poisoned");
        self.put_json(STATE_CF, Self::CHECKPOINT_KEY, &topoheight)
    }

    fn get_checkpoint(&self) -> anyhow::Result<Option<u64>> {
        self.get_json(STATE_CF, Self::CHECKPOINT_KEY)
    }

    fn store_chain_info(&self, info: &ChainInfo) -> anyhow::Result<()> {
        let _write = self.writer.write().expect("writer lock poisoned");
        if let Some(stored) = self.get_json::<ChainInfo>(STATE_CF, Self::CHAIN_INFO_KEY)? {
            if stored.height >= info.height {
                return Ok(());
            }
        }
        trace!("storing chain info at height {}", info.height);
        self.put_json(STATE_CF, Self::CHAIN_INFO_KEY, info)
    }

    fn get_chain_info(&self) -> anyhow::Result<Option<ChainInfo>> {
        self.get_json(STATE_CF, Self::CHAIN_INFO_KEY)
    }

    fn store_tx_count(&self, kind: TxCounterKind, count: u64) -> anyhow::Result<()> {
        trace!("storing {} tx count {count}", kind.as_str());
        let _write = self.writer.write().expect("writer lock poisoned");
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
        trace!("storing normal tx {} for {addr}", record.txid);
        let _write = self.writer.write().expect("writer lock poisoned");
        self.put_json(NORMAL_TXS_CF, &addr_key(addr, &record.txid), record)
    }

    fn get_normal_txs_by_addr(&self, addr: &str) -> anyhow::Result<Vec<NormalTxWithScid>> {
        self.scan_prefix(NORMAL_TXS_CF, &addr_prefix(addr))?
            .into_iter()
            .map(|(_, value)| serde_json::from_slice(&value).map_err(anyhow::Error::from))
            .collect()
    }

    fn store_miniblock_details(
        &self,
        blid: &BlockHash,
        miniblocks: &[Miniblock],
    ) -> anyhow::Result<()> {
        trace!("storing miniblock details for {blid}");
        let _write = self.writer.write().expect("writer lock poisoned");
        self.put_json(MINIBLOCKS_CF, blid.0.as_bytes(), &miniblocks.to_vec())
    }

    fn get_miniblock_details(&self, blid: &BlockHash) -> anyhow::Result<Vec<Miniblock>> {
        Ok(self
            .get_json(MINIBLOCKS_CF, blid.0.as_bytes())?
            .unwrap_or_default())
    }
}

impl ScStore for IndexerStore {
    fn store_owner(&self, scid: &Scid, owner: &str) -> anyhow::Result<()> {
        trace!("storing owner {owner} for {scid}");
        let _write = self.writer.write().expect("writer lock poisoned");
        self.put_json(OWNERS_CF, scid.0.as_bytes(), &owner.to_string())
    }

    fn get_owner(&self, scid: &Scid) -> anyhow::Result<Option<String>> {
        self.get_json(OWNERS_CF, scid.0.as_bytes())
    }

    fn get_all_owners(&self) -> anyhow::Result<HashMap<String, String>> {
        let mut owners = HashMap::new();
        for item in self.database.iterator_cf(self.cf(OWNERS_CF), IteratorMode::Start) {
            let (key, value) = item?;
            owners.insert(
                String::from_utf8(key.to_vec())?,
                serde_json::from_slice(&value)?,
            );
        }
        Ok(owners)
    }

    fn store_invoke(&self, scid: &Scid, topoheight: u64, invoke: &ScTx) -> anyhow::Result<()> {
        trace!("storing invoke {} for {scid} at {topoheight}", invoke.txid);
        let _write = self.writer.write().expect("writer lock poisoned");

        // a block re-applied after a checkpoint failure must not duplicate
        for (_, value) in self.scan_prefix(INVOKES_CF, &height_prefix(scid, topoheight))? {
            let existing: ScTx = serde_json::from_slice(&value)?;
            if existing.txid == invoke.txid {
                return Ok(());
            }
        }

        let ordinal: u64 = self
            .get_json(STATE_CF, Self::NEXT_INVOKE_ORDINAL_KEY)?
            .unwrap_or(0);
        self.put_json(INVOKES_CF, &invoke_key(scid, topoheight, ordinal), invoke)?;
        self.put_json(STATE_CF, Self::NEXT_INVOKE_ORDINAL_KEY, &(ordinal + 1))
    }

    fn get_all_invokes(&self, scid: &Scid) -> anyhow::Result<Vec<ScTx>> {
        self.scan_prefix(INVOKES_CF, &scid_prefix(scid))?
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
        trace!("storing {} variables for {scid} at {topoheight}", vars.len());
        let _write = self.writer.write().expect("writer lock poisoned");
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
        trace!("storing {} interaction for {scid} at {topoheight}", method.as_str());
        let _write = self.writer.write().expect("writer lock poisoned");
        self.database
            .put_cf(self.cf(INTERACTIONS_CF), interaction_key(scid, topoheight, method), [])?;
        Ok(())
    }

    fn get_interaction_heights(&self, scid: &Scid) -> anyhow::Result<Vec<(ScMethod, u64)>> {
        Ok(self
            .scan_prefix(INTERACTIONS_CF, &scid_prefix(scid))?
            .into_iter()
            .filter_map(|(key, _)| parse_interaction_key(scid, &key))
            .collect())
    }

    fn store_invalid_deploy(&self, scid: &Scid, fees: u64) -> anyhow::Result<()> {
        trace!("storing invalid deploy {scid}");
        let _write = self.writer.write().expect("writer lock poisoned");
        self.put_json(INVALID_DEPLOYS_CF, scid.0.as_bytes(), &fees)
    }

    fn get_invalid_deploy(&self, scid: &Scid) -> anyhow::Result<Option<u64>> {
        self.get_json(INVALID_DEPLOYS_CF, scid.0.as_bytes())
    }
}

impl IndexStore for IndexerStore {
    fn close(&self) -> anyhow::Result<()> {
        let _write = self.writer.write().expect("writer lock poisoned");
        self.database.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn db_directory_is_derived_from_the_filter() {
        let base = Path::new("/tmp");
        let unfiltered = db_directory(base, None);
        let name = unfiltered.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("GNOMON_"));
        assert_eq!(name.len(), "GNOMON_".len() + 40);

        // empty filter falls back to the default tag
        assert_eq!(unfiltered, db_directory(base, Some("")));
        assert_ne!(unfiltered, db_directory(base, Some("Function InputStr")));
        assert_eq!(
            db_directory(base, Some("Function InputStr")),
            db_directory(base, Some("Function InputStr")),
        );
    }

    #[test]
    fn interaction_keys_round_trip() {
        let scid = Scid::from("ab".repeat(32).as_str());
        let key = interaction_key(&scid, 900, ScMethod::ScInvoke);
        assert_eq!(
            parse_interaction_key(&scid, &key),
            Some((ScMethod::ScInvoke, 900))
        );
    }
}
