use crate::{
    block::{
        store::TxCounterKind,
        transaction::{
            Transaction, TransactionKind, ARG_ENTRYPOINT, ARG_SC_ACTION, ARG_SC_CODE,
            ARG_SC_ID, SC_ACTION_INSTALL,
        },
        Block, BlockHash,
    },
    rpc::{NodeClient, RpcError},
    sc::{NormalTxWithScid, ScMethod, ScTx, ScVariable, Scid},
    store::IndexStore,
    BLOCK_JUMP, BOOTSTRAP_SCID, CHAIN_HEAD_POLL_SECS, RECONNECT_STRIKE_LIMIT,
    RPC_RETRY_SECS, SHUTDOWN_DRAIN_SECS,
};
use std::{
    collections::HashSet,
    str::FromStr,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Daemon,
    Wallet,
}

impl FromStr for RunMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "daemon" => Ok(RunMode::Daemon),
            "wallet" => Ok(RunMode::Wallet),
            other => anyhow::bail!("runmode must be 'daemon' or 'wallet', got '{other}'"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// First topoheight to index when the store has no checkpoint.
    pub start_topoheight: u64,
    /// Only contracts whose code contains this string are indexed.
    pub search_filter: Option<String>,
    pub run_mode: RunMode,
    /// Capture miniblock details for every indexed block.
    pub mbl_capture: bool,
    /// Shut down after repeated chain-head poll failures.
    pub close_on_disconnect: bool,
    /// How long [`shutdown`] waits for in-flight writers before closing the
    /// store; throwaway instances drain faster than the 5 s default.
    pub shutdown_drain: Duration,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            start_topoheight: 1,
            search_filter: None,
            run_mode: RunMode::Daemon,
            mbl_capture: false,
            close_on_disconnect: false,
            shutdown_drain: Duration::from_secs(SHUTDOWN_DRAIN_SECS),
        }
    }
}

/// Cross-task view of a running indexer: the poller publishes the chain
/// head here, the consumer publishes its cursor, and shutdown is requested
/// by flipping the closing flag.
#[derive(Clone, Default)]
pub struct Progress {
    closing: Arc<AtomicBool>,
    chain_head: Arc<AtomicU64>,
    last_indexed: Arc<AtomicU64>,
}

impl Progress {
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    pub fn request_close(&self) {
        self.closing.store(true, Ordering::SeqCst);
    }

    pub fn chain_head(&self) -> u64 {
        self.chain_head.load(Ordering::SeqCst)
    }

    pub fn last_indexed(&self) -> u64 {
        self.last_indexed.load(Ordering::SeqCst)
    }

    /// The consumer has applied every block the daemon has reported.
    pub fn caught_up(&self) -> bool {
        let head = self.chain_head();
        head > 1 && self.last_indexed() > head
    }
}

/// Request shutdown, wait for in-flight writers to drain, close the store.
pub async fn shutdown<S: IndexStore + ?Sized>(
    progress: &Progress,
    store: &S,
    drain: Duration,
) -> anyhow::Result<()> {
    progress.request_close();
    tokio::time::sleep(drain).await;
    store.close()
}

/// Pruned-node gap scan. A missing header switches the follower from
/// `Normal` into a coarse forward probe, then a fine backward narrow to the
/// exact pruning boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Normal,
    ForwardProbe { cur: u64 },
    BackwardNarrow { cur: u64, rewind: u64 },
}

#[derive(Default)]
struct TxTally {
    registration: u64,
    burn: u64,
    normal: u64,
}

enum Classified {
    Registration,
    Burn,
    Normal(Vec<(String, NormalTxWithScid)>),
    Sc(ScTx),
}

/// Chain follower: walks the chain one topoheight at a time, classifies
/// every transaction, captures contract state, and checkpoints each block
/// before advancing.
pub struct Indexer<S, C> {
    config: IndexerConfig,
    store: Arc<S>,
    client: Arc<C>,
    progress: Progress,
    validated_scids: HashSet<String>,
    last_indexed: u64,
    scan: ScanState,
    /// Highest checkpoint written; keeps gap-scan checkpoints monotonic.
    checkpointed: u64,
}

impl<S, C> Indexer<S, C>
where
    S: IndexStore + 'static,
    C: NodeClient + 'static,
{
    pub fn new(store: Arc<S>, client: Arc<C>, config: IndexerConfig) -> Self {
        let progress = Progress::default();
        let last_indexed = config.start_topoheight.max(1);
        progress.last_indexed.store(last_indexed, Ordering::SeqCst);
        Self {
            config,
            store,
            client,
            progress,
            validated_scids: HashSet::new(),
            last_indexed,
            scan: ScanState::Normal,
            checkpointed: 0,
        }
    }

    pub fn progress(&self) -> Progress {
        self.progress.clone()
    }

    /// Connect, spawn the head poller, seed known contracts, resume from the
    /// stored checkpoint, then run the indexing loop until close is
    /// requested.
    pub async fn start(&mut self) -> anyhow::Result<()> {
        loop {
            if self.progress.is_closing() {
                return Ok(());
            }
            info!("trying to connect...");
            match self.client.get_info().await {
                Ok(info) => {
                    self.progress
                        .chain_head
                        .store(info.topoheight, Ordering::SeqCst);
                    break;
                }
                Err(err) => {
                    warn!("daemon not reachable: {err}");
                    tokio::time::sleep(Duration::from_secs(RPC_RETRY_SECS)).await;
                }
            }
        }

        match self.config.run_mode {
            RunMode::Daemon => {
                tokio::spawn(poll_chain_head(
                    Arc::clone(&self.client),
                    Arc::clone(&self.store),
                    self.progress.clone(),
                    self.config.close_on_disconnect,
                ));
            }
            RunMode::Wallet => {
                tokio::spawn(poll_wallet_height(
                    Arc::clone(&self.client),
                    self.progress.clone(),
                ));
            }
        }

        self.seed_bootstrap_scid().await;
        for scid in self.store.get_all_owners()?.into_keys() {
            self.validated_scids.insert(scid);
        }

        if let Some(stored) = self.store.get_checkpoint()? {
            if stored > self.last_indexed {
                info!("continuing from last indexed height {stored}");
                self.last_indexed = stored;
                self.checkpointed = stored;
            }
        }

        self.index_loop().await
    }

    /// The hardcoded genesis-era contract is adopted up front when it passes
    /// the filter, so invocations against it are captured from the start.
    async fn seed_bootstrap_scid(&mut self) {
        let scid = Scid::from(BOOTSTRAP_SCID);
        let probe = self
            .client
            .get_sc(&scid, true, false, self.last_indexed)
            .await;
        let adopt = match (&self.config.search_filter, probe) {
            (None, _) => true,
            (Some(filter), Ok(result)) => result.code.contains(filter),
            (Some(_), Err(_)) => false,
        };
        if adopt {
            self.validated_scids.insert(scid.0.clone());
            if let Err(err) = self.store.store_owner(&scid, "") {
                error!("error storing owner: {err}");
            }
        }
    }

    async fn index_loop(&mut self) -> anyhow::Result<()> {
        while !self.progress.is_closing() {
            self.progress
                .last_indexed
                .store(self.last_indexed, Ordering::SeqCst);

            if self.last_indexed > self.progress.chain_head() {
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }

            match self.scan {
                ScanState::Normal => self.step_normal().await,
                ScanState::ForwardProbe { cur } => self.step_forward_probe(cur).await,
                ScanState::BackwardNarrow { cur, rewind } => {
                    self.step_backward_narrow(cur, rewind).await
                }
            }
        }
        Ok(())
    }

    async fn step_normal(&mut self) {
        let header = match self
            .client
            .get_block_header_by_topoheight(self.last_indexed)
            .await
        {
            Ok(header) => header,
            Err(RpcError::NotFound) => {
                info!(
                    "no header at {}, scanning for the pruning boundary",
                    self.last_indexed
                );
                self.scan = ScanState::ForwardProbe {
                    cur: self.last_indexed,
                };
                return;
            }
            Err(err) => {
                error!("header fetch at {} failed: {err}", self.last_indexed);
                tokio::time::sleep(Duration::from_secs(RPC_RETRY_SECS)).await;
                return;
            }
        };

        let blid = BlockHash(header.hash);
        if let Err(err) = self.apply_block(&blid, self.last_indexed).await {
            error!("indexing block {blid} failed: {err}");
            tokio::time::sleep(Duration::from_secs(RPC_RETRY_SECS)).await;
            return;
        }
        if let Err(err) = self.persist_checkpoint(self.last_indexed) {
            // without the checkpoint the block is retried after restart, so
            // do not advance past it either
            error!("checkpoint at {} failed: {err}", self.last_indexed);
            tokio::time::sleep(Duration::from_secs(RPC_RETRY_SECS)).await;
            return;
        }
        self.last_indexed += 1;
    }

    async fn step_forward_probe(&mut self, cur: u64) {
        match self.client.get_block_header_by_topoheight(cur).await {
            Ok(_) => {
                debug!("header found at {cur}, narrowing");
                let rewind = cur.saturating_sub(BLOCK_JUMP).saturating_add(1).max(1);
                self.scan = ScanState::BackwardNarrow { cur, rewind };
            }
            Err(RpcError::NotFound) => {
                // everything at or below a missing header is pruned, so the
                // probe position is safe to checkpoint
                if let Err(err) = self.persist_checkpoint(cur) {
                    error!("checkpoint at {cur} failed: {err}");
                }
                let next = (cur + BLOCK_JUMP).min(self.progress.chain_head());
                debug!("no header at {cur}, probing {next}");
                self.scan = ScanState::ForwardProbe { cur: next };
                if next == cur {
                    // pinned at the chain head; wait for it to move
                    tokio::time::sleep(Duration::from_secs(RPC_RETRY_SECS)).await;
                }
            }
            Err(err) => {
                error!("probe at {cur} failed: {err}");
                tokio::time::sleep(Duration::from_secs(RPC_RETRY_SECS)).await;
            }
        }
    }

    async fn step_backward_narrow(&mut self, cur: u64, rewind: u64) {
        if rewind >= cur {
            info!("pruning boundary at {cur}, continuing as normal");
            self.last_indexed = cur;
            self.scan = ScanState::Normal;
            return;
        }
        match self.client.get_block_header_by_topoheight(rewind).await {
            Ok(_) => {
                info!("pruning boundary at {rewind}, continuing as normal");
                self.last_indexed = rewind;
                self.scan = ScanState::Normal;
            }
            Err(RpcError::NotFound) => {
                if let Err(err) = self.persist_checkpoint(rewind) {
                    error!("checkpoint at {rewind} failed: {err}");
                }
                self.scan = ScanState::BackwardNarrow {
                    cur,
                    rewind: rewind + 1,
                };
            }
            Err(err) => {
                error!("narrow at {rewind} failed: {err}");
                tokio::time::sleep(Duration::from_secs(RPC_RETRY_SECS)).await;
            }
        }
    }

    fn persist_checkpoint(&mut self, topoheight: u64) -> anyhow::Result<()> {
        if topoheight <= self.checkpointed {
            return Ok(());
        }
        self.store.store_checkpoint(topoheight)?;
        self.checkpointed = topoheight;
        Ok(())
    }

    async fn apply_block(&mut self, blid: &BlockHash, topoheight: u64) -> anyhow::Result<()> {
        let result = self
            .client
            .get_block(blid)
            .await
            .map_err(|err| anyhow::anyhow!("block fetch failed: {err}"))?;
        let block = Block::from_blob(&result.blob)?;

        if self.config.mbl_capture {
            self.store.store_miniblock_details(blid, &block.miniblocks)?;
        }

        let mut workers: JoinSet<Option<Classified>> = JoinSet::new();
        for txid in block.tx_hashes.iter().cloned() {
            let client = Arc::clone(&self.client);
            let block_height = block.height;
            workers.spawn(classify_tx(client, txid, topoheight, block_height));
        }

        // the tally merges once at the barrier; workers never touch the store
        let mut tally = TxTally::default();
        let mut sc_txs = vec![];
        let mut normal_records = vec![];
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Some(Classified::Registration)) => tally.registration += 1,
                Ok(Some(Classified::Burn)) => tally.burn += 1,
                Ok(Some(Classified::Normal(records))) => {
                    tally.normal += 1;
                    normal_records.extend(records);
                }
                Ok(Some(Classified::Sc(sc_tx))) => sc_txs.push(sc_tx),
                Ok(None) => {}
                Err(err) => error!("classifier task failed: {err}"),
            }
        }

        if tally.registration > 0 {
            let current = self.store.get_tx_count(TxCounterKind::Registration)?;
            self.store
                .store_tx_count(TxCounterKind::Registration, current + tally.registration)?;
        }
        if tally.burn > 0 {
            let current = self.store.get_tx_count(TxCounterKind::Burn)?;
            self.store
                .store_tx_count(TxCounterKind::Burn, current + tally.burn)?;
        }
        if tally.normal > 0 {
            let current = self.store.get_tx_count(TxCounterKind::Normal)?;
            self.store
                .store_tx_count(TxCounterKind::Normal, current + tally.normal)?;
        }
        for (addr, record) in normal_records {
            self.store.store_normal_tx_with_scid(&addr, &record)?;
        }

        for sc_tx in sc_txs {
            self.handle_sc_tx(sc_tx, topoheight).await?;
        }
        Ok(())
    }

    async fn handle_sc_tx(&mut self, sc_tx: ScTx, topoheight: u64) -> anyhow::Result<()> {
        match sc_tx.method {
            ScMethod::InstallSc => self.handle_installsc(sc_tx, topoheight).await,
            ScMethod::ScInvoke => self.handle_scinvoke(sc_tx, topoheight).await,
        }
    }

    async fn handle_installsc(&mut self, sc_tx: ScTx, topoheight: u64) -> anyhow::Result<()> {
        let code = sc_tx.sc_args.value_str(ARG_SC_CODE).unwrap_or_default();
        let matches = match &self.config.search_filter {
            None => true,
            Some(filter) => code.contains(filter),
        };
        if !matches {
            debug!(
                "scid {} does not contain the search filter string, moving on",
                sc_tx.scid
            );
            return Ok(());
        }

        let vars = fetch_sc_variables(&*self.client, &sc_tx.scid, topoheight).await;
        if vars.is_empty() {
            warn!("scid {} appears to be invalid", sc_tx.scid);
            return self.store.store_invalid_deploy(&sc_tx.scid, sc_tx.fees);
        }

        info!(
            "scid matches search filter, adding scid {} / signer {}",
            sc_tx.scid, sc_tx.sender
        );
        self.validated_scids.insert(sc_tx.scid.0.clone());
        self.store.store_owner(&sc_tx.scid, &sc_tx.sender)?;
        self.store.store_invoke(&sc_tx.scid, topoheight, &sc_tx)?;
        self.store.store_sc_vars(&sc_tx.scid, topoheight, &vars)?;
        self.store
            .store_interaction_height(&sc_tx.scid, ScMethod::InstallSc, topoheight)
    }

    async fn handle_scinvoke(&mut self, sc_tx: ScTx, topoheight: u64) -> anyhow::Result<()> {
        if !self.validated_scids.contains(&sc_tx.scid.0) {
            // an invocation against a contract deployed before indexing
            // began; adopt it when the daemon confirms it holds state
            let vars = fetch_sc_variables(&*self.client, &sc_tx.scid, topoheight).await;
            if !vars.is_empty() {
                info!("adopting scid {} with blank owner", sc_tx.scid);
                self.validated_scids.insert(sc_tx.scid.0.clone());
                self.store.store_owner(&sc_tx.scid, "")?;
            }
        }

        if !self.validated_scids.contains(&sc_tx.scid.0) {
            return Ok(());
        }

        self.store.store_invoke(&sc_tx.scid, topoheight, &sc_tx)?;
        let vars = fetch_sc_variables(&*self.client, &sc_tx.scid, topoheight).await;
        self.store.store_sc_vars(&sc_tx.scid, topoheight, &vars)?;
        self.store
            .store_interaction_height(&sc_tx.scid, ScMethod::ScInvoke, topoheight)
    }
}

/// Fetch and classify a single transaction. Pruned or malformed
/// transactions are skipped; the block still commits.
async fn classify_tx<C: NodeClient>(
    client: Arc<C>,
    txid: String,
    topoheight: u64,
    block_height: u64,
) -> Option<Classified> {
    let entry = match client.get_transaction(&txid).await {
        Ok(entry) => entry,
        Err(RpcError::NotFound) => {
            debug!("tx {txid} not available, skipping");
            return None;
        }
        Err(err) => {
            warn!("tx {txid} fetch failed, skipping: {err}");
            return None;
        }
    };
    let tx = match Transaction::from_hex(&entry.hex) {
        Ok(tx) => tx,
        Err(err) => {
            warn!("tx {txid} failed to deserialize, skipping: {err}");
            return None;
        }
    };

    match tx.kind {
        TransactionKind::Registration => Some(Classified::Registration),
        TransactionKind::Burn => Some(Classified::Burn),
        TransactionKind::Normal => {
            let mut records = vec![];
            for (i, payload) in tx.payloads.iter().enumerate() {
                if !payload.has_scid() {
                    continue;
                }
                for addr in entry.meta.ring.get(i).cloned().unwrap_or_default() {
                    records.push((
                        addr,
                        NormalTxWithScid {
                            txid: txid.clone(),
                            scid: Scid(payload.scid.clone()),
                            fees: tx.fees,
                            height: block_height,
                        },
                    ));
                }
            }
            Some(Classified::Normal(records))
        }
        TransactionKind::Sc => {
            let (method, scid) =
                if tx.sc_data.value_u64(ARG_SC_ACTION) == Some(SC_ACTION_INSTALL) {
                    (ScMethod::InstallSc, txid.clone())
                } else {
                    let scid = tx.sc_data.value_hash(ARG_SC_ID).unwrap_or_default();
                    (ScMethod::ScInvoke, scid.to_string())
                };
            let ring_size = tx.payloads.first().map(|p| p.ring_size).unwrap_or_default();
            let sender = if ring_size == 2 {
                entry.meta.signer.clone()
            } else {
                warn!("ringsize for {txid} is != 2, storing blank sender");
                String::new()
            };
            let entrypoint = tx
                .sc_data
                .value_str(ARG_ENTRYPOINT)
                .unwrap_or_default()
                .to_string();
            Some(Classified::Sc(ScTx {
                txid,
                scid: Scid(scid),
                method,
                entrypoint,
                sender,
                fees: tx.fees,
                height: topoheight,
                sc_args: tx.sc_data,
                payloads: tx.payloads,
            }))
        }
    }
}

/// Contract variables at a topoheight, stringified. Fetch failures read as
/// an empty set; installsc handling records those deploys as invalid.
pub async fn fetch_sc_variables<C: NodeClient + ?Sized>(
    client: &C,
    scid: &Scid,
    topoheight: u64,
) -> Vec<ScVariable> {
    let result = match client.get_sc(scid, false, true, topoheight).await {
        Ok(result) => result,
        Err(err) => {
            warn!("variable fetch for {scid} failed: {err}");
            return vec![];
        }
    };
    let mut vars = vec![];
    for (key, value) in result.stringkeys {
        vars.push(ScVariable {
            key,
            value: stringify(value),
        });
    }
    for (key, value) in result.uint64keys {
        vars.push(ScVariable {
            key: key.to_string(),
            value: stringify(value),
        });
    }
    vars
}

fn stringify(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

/// Poll `GetInfo` every 5 s: publish the chain head, persist newer
/// snapshots, and shut the indexer down after repeated failures when
/// configured to.
async fn poll_chain_head<S, C>(
    client: Arc<C>,
    store: Arc<S>,
    progress: Progress,
    close_on_disconnect: bool,
) where
    S: IndexStore,
    C: NodeClient,
{
    let mut strikes: u32 = 0;
    while !progress.is_closing() {
        match client.get_info().await {
            Ok(info) => {
                strikes = 0;
                progress.chain_head.store(info.topoheight, Ordering::SeqCst);
                if let Err(err) = store.store_chain_info(&info) {
                    error!("chain info store failed: {err}");
                }
            }
            Err(err) => {
                strikes += 1;
                warn!("chain head poll failed ({strikes}): {err}");
                if close_on_disconnect && strikes >= RECONNECT_STRIKE_LIMIT {
                    progress.request_close();
                    break;
                }
                tokio::time::sleep(Duration::from_secs(RPC_RETRY_SECS)).await;
                continue;
            }
        }
        tokio::time::sleep(Duration::from_secs(CHAIN_HEAD_POLL_SECS)).await;
    }
}

/// Wallet run-mode head poller.
async fn poll_wallet_height<C: NodeClient>(client: Arc<C>, progress: Progress) {
    while !progress.is_closing() {
        match client.get_height().await {
            Ok(height) => {
                progress.chain_head.store(height, Ordering::SeqCst);
            }
            Err(err) => {
                warn!("wallet height poll failed: {err}");
                tokio::time::sleep(Duration::from_secs(RPC_RETRY_SECS)).await;
                continue;
            }
        }
        tokio::time::sleep(Duration::from_secs(CHAIN_HEAD_POLL_SECS)).await;
    }
}
