use crate::{
    block::transaction::{
        Arguments, Transaction, TransactionKind, ARG_ENTRYPOINT, ARG_SC_ACTION, ARG_SC_ID,
        SC_ACTION_CALL, SC_ACTION_INSTALL,
    },
    indexer::{fetch_sc_variables, shutdown, Indexer, IndexerConfig, RunMode},
    rpc::{
        types::{GasEstimateParams, TransferParams},
        NodeClient, RpcError, WalletClient,
    },
    sc::{sc_values_by_key, IndexedSc, Scid},
    store::memory::MemoryStore,
    REGISTRY_SCID_MAINNET, REGISTRY_SCID_TESTNET, SHUTDOWN_DRAIN_SECS,
};
use serde::Deserialize;
use std::{sync::Arc, time::Duration};
use tracing::{error, info, warn};

pub const INPUT_SCID_ENTRYPOINT: &str = "InputSCID";

/// Minimum blocks between two on-chain submissions.
pub const MIN_DEPLOY_BUFFER: u64 = 2;

#[derive(Debug, Clone)]
pub struct RegistrarConfig {
    /// Companion API serving `/api/indexedscs` and `/api/getinfo`.
    pub gnomon_api: String,
    /// Blocks to wait between submissions; clamped to at least 2.
    pub block_deploy_buffer: u64,
    /// Patterns a candidate's code must match one of; empty accepts all.
    pub search_filters: Vec<String>,
    pub ringsize: u64,
    /// Spacing poll interval.
    pub poll: Duration,
    /// Pause between rounds.
    pub round_interval: Duration,
    /// Drain given to the throwaway indexer on close.
    pub indexer_drain: Duration,
}

impl Default for RegistrarConfig {
    fn default() -> Self {
        Self {
            gnomon_api: "127.0.0.1:8082".to_string(),
            block_deploy_buffer: 10,
            search_filters: vec![],
            ringsize: 2,
            poll: Duration::from_secs(5),
            round_interval: Duration::from_secs(60),
            indexer_drain: Duration::from_secs(SHUTDOWN_DRAIN_SECS),
        }
    }
}

#[derive(Deserialize)]
struct IndexedScsResponse {
    #[serde(default)]
    indexdetails: Vec<IndexedSc>,
}

#[derive(Deserialize)]
struct ApiGetInfoResponse {
    #[serde(default)]
    getinfo: Option<ApiGetInfo>,
}

#[derive(Deserialize)]
struct ApiGetInfo {
    #[serde(default)]
    height: u64,
}

/// Publishes locally indexed SCIDs to the on-chain registry contract,
/// exactly once each, paced by topoheight, without racing other registrars.
pub struct Registrar<C, W> {
    config: RegistrarConfig,
    daemon: Arc<C>,
    wallet: Arc<W>,
    http: reqwest::Client,
    registry: Scid,
    prev_topoheight: Option<u64>,
}

impl<C, W> Registrar<C, W>
where
    C: NodeClient + 'static,
    W: WalletClient,
{
    /// Select the registry contract for the daemon's network and build the
    /// controller. Daemon connectivity is required up front.
    pub async fn new(
        daemon: Arc<C>,
        wallet: Arc<W>,
        mut config: RegistrarConfig,
    ) -> anyhow::Result<Self> {
        config.block_deploy_buffer = config.block_deploy_buffer.max(MIN_DEPLOY_BUFFER);
        let info = daemon.get_info().await?;
        let registry = if info.testnet {
            Scid::from(REGISTRY_SCID_TESTNET)
        } else {
            Scid::from(REGISTRY_SCID_MAINNET)
        };
        info!(
            "using registry {registry} with a deploy buffer of {} blocks",
            config.block_deploy_buffer
        );
        Ok(Self {
            config,
            daemon,
            wallet,
            http: reqwest::Client::new(),
            registry,
            prev_topoheight: None,
        })
    }

    pub fn registry(&self) -> &Scid {
        &self.registry
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        loop {
            let candidates = match self.fetch_indexed_scs().await {
                Ok(candidates) => candidates,
                Err(err) => {
                    warn!("index query failed: {err}");
                    vec![]
                }
            };
            let api_height = self.fetch_api_height().await;
            if let Err(err) = self.run_round(candidates, api_height).await {
                error!("round failed: {err}");
            }
            info!(
                "round completed, sleeping {:?} for next round",
                self.config.round_interval
            );
            tokio::time::sleep(self.config.round_interval).await;
        }
    }

    async fn fetch_indexed_scs(&self) -> anyhow::Result<Vec<IndexedSc>> {
        let url = format!("http://{}/api/indexedscs", self.config.gnomon_api);
        let response: IndexedScsResponse =
            self.http.get(&url).send().await?.json().await?;
        Ok(response.indexdetails)
    }

    /// Chain height from the companion API; `None` falls the round back to a
    /// full scan from the genesis block.
    async fn fetch_api_height(&self) -> Option<u64> {
        let url = format!("http://{}/api/getinfo", self.config.gnomon_api);
        let response: ApiGetInfoResponse = match self.http.get(&url).send().await {
            Ok(resp) => match resp.json().await {
                Ok(body) => body,
                Err(err) => {
                    warn!("height query body unreadable: {err}");
                    return None;
                }
            },
            Err(err) => {
                warn!("height query failed: {err}");
                return None;
            }
        };
        response.getinfo.map(|info| info.height).filter(|h| *h > 0)
    }

    /// One registration round over an already-fetched candidate set.
    pub async fn run_round(
        &mut self,
        candidates: Vec<IndexedSc>,
        api_height: Option<u64>,
    ) -> anyhow::Result<()> {
        if candidates.is_empty() {
            info!("no indexed contracts to consider");
            return Ok(());
        }

        // Throwaway scan to the current head so the registry state read
        // below reflects everything already on chain.
        info!("provisioning new in-memory indexer...");
        let store = Arc::new(MemoryStore::new());
        let config = IndexerConfig {
            start_topoheight: api_height.unwrap_or(1),
            search_filter: None,
            run_mode: RunMode::Daemon,
            mbl_capture: false,
            close_on_disconnect: false,
            shutdown_drain: self.config.indexer_drain,
        };
        let mut throwaway = Indexer::new(Arc::clone(&store), Arc::clone(&self.daemon), config);
        let progress = throwaway.progress();
        let worker = tokio::spawn(async move { throwaway.start().await });

        while !progress.caught_up() && !progress.is_closing() {
            if worker.is_finished() {
                worker.await??;
                anyhow::bail!("scan indexer stopped before catching up");
            }
            info!(
                "waiting on indexer... ({} / {})",
                progress.last_indexed(),
                progress.chain_head()
            );
            tokio::time::sleep(self.config.poll).await;
        }

        let registry_vars =
            fetch_sc_variables(&*self.daemon, &self.registry, progress.chain_head()).await;

        let mut changes = false;
        for candidate in &candidates {
            let marker = format!("{}height", candidate.scid);
            if sc_values_by_key(&registry_vars, &marker).is_some() {
                continue;
            }
            if !self.filter_matches(candidate, progress.chain_head()).await {
                continue;
            }
            if !self.mempool_clear(candidate).await {
                continue;
            }
            changes = true;
            info!(
                "scid has not been indexed - {} ... submitting now",
                candidate.scid
            );
            if let Err(err) = self.submit(candidate).await {
                error!("submission for {} failed: {err}", candidate.scid);
            }
        }
        if !changes {
            info!("no changes made");
        }

        info!("closing temporary indexer...");
        shutdown(&progress, &*store, self.config.indexer_drain).await?;
        worker.await?.ok();
        Ok(())
    }

    /// With filters configured, the candidate's code must match at least one.
    async fn filter_matches(&self, candidate: &IndexedSc, topoheight: u64) -> bool {
        if self.config.search_filters.is_empty() {
            return true;
        }
        let scid = Scid::from(candidate.scid.as_str());
        let code = match self.daemon.get_sc(&scid, true, false, topoheight).await {
            Ok(result) => result.code,
            Err(err) => {
                warn!("code fetch for {scid} failed: {err}");
                return false;
            }
        };
        if code.is_empty() {
            return false;
        }
        self.config
            .search_filters
            .iter()
            .any(|pattern| code.contains(pattern))
    }

    /// Re-fetch the mempool immediately before submitting: a pending
    /// `InputSCID` for the same candidate means another registrar got there
    /// first this round.
    async fn mempool_clear(&self, candidate: &IndexedSc) -> bool {
        let pool = match self.daemon.get_tx_pool().await {
            Ok(pool) => pool,
            Err(err) => {
                warn!(
                    "tx pool fetch failed, skipping {} for safety: {err}",
                    candidate.scid
                );
                return false;
            }
        };
        for txid in pool {
            let entry = match self.daemon.get_transaction(&txid).await {
                Ok(entry) => entry,
                Err(RpcError::NotFound) => continue,
                Err(err) => {
                    warn!(
                        "mempool tx {txid} fetch failed, skipping {} for safety: {err}",
                        candidate.scid
                    );
                    return false;
                }
            };
            let Ok(tx) = Transaction::from_hex(&entry.hex) else {
                continue;
            };
            if tx.kind != TransactionKind::Sc
                || tx.sc_data.value_u64(ARG_SC_ACTION) == Some(SC_ACTION_INSTALL)
            {
                continue;
            }
            if tx.sc_data.value_hash(ARG_SC_ID) != Some(self.registry.0.as_str()) {
                continue;
            }
            if tx.sc_data.value_str("scid") == Some(candidate.scid.as_str()) {
                info!(
                    "skipping {} - mempool tx {txid} already registers it",
                    candidate.scid
                );
                return false;
            }
        }
        true
    }

    async fn submit(&mut self, candidate: &IndexedSc) -> anyhow::Result<()> {
        let mut args = Arguments::new();
        args.push_str(ARG_ENTRYPOINT, INPUT_SCID_ENTRYPOINT);
        args.push_str("scid", candidate.scid.as_str());
        args.push_str("scowner", candidate.owner.as_str());
        args.push_u64("deployheight", candidate.height);
        args.push_u64(ARG_SC_ACTION, SC_ACTION_CALL);
        args.push_hash(ARG_SC_ID, self.registry.0.as_str());
        let sc_rpc = args.to_rpc();

        let signer = if self.config.ringsize > 2 {
            String::new()
        } else {
            self.wallet.get_address().await?
        };
        let gas = self
            .daemon
            .gas_estimate(GasEstimateParams {
                sc_rpc: sc_rpc.clone(),
                ringsize: self.config.ringsize,
                signer,
                transfers: vec![],
            })
            .await?;

        self.wait_for_spacing().await?;

        let result = self
            .wallet
            .transfer(TransferParams {
                sc_rpc,
                ringsize: self.config.ringsize,
                fees: gas.gasstorage,
                transfers: vec![],
            })
            .await?;
        info!("tx sent successfully - txid: {}", result.txid);
        Ok(())
    }

    /// Between submissions, wait for the chain to advance by the deploy
    /// buffer. The first submission only records its topoheight.
    async fn wait_for_spacing(&mut self) -> anyhow::Result<()> {
        match self.prev_topoheight {
            None => {
                let info = self.daemon.get_info().await?;
                self.prev_topoheight = Some(info.topoheight);
            }
            Some(prev) => {
                let target = prev + self.config.block_deploy_buffer;
                loop {
                    let info = self.daemon.get_info().await?;
                    if info.topoheight >= target {
                        self.prev_topoheight = Some(info.topoheight);
                        break;
                    }
                    info!(
                        "waiting until topoheights line up to send next tx [curr: {} / target: {target}]",
                        info.topoheight
                    );
                    tokio::time::sleep(self.config.poll).await;
                }
            }
        }
        Ok(())
    }
}
