#![allow(dead_code)]

use async_trait::async_trait;
use gnomon::{
    block::{
        transaction::{
            Argument, Arguments, Payload, Transaction, TransactionKind, ARG_ENTRYPOINT,
            ARG_SC_ACTION, ARG_SC_CODE, ARG_SC_ID, SC_ACTION_CALL, SC_ACTION_INSTALL,
            ZERO_HASH,
        },
        Block, BlockHash, Miniblock,
    },
    rpc::{
        types::{
            BlockHeader, ChainInfo, GasEstimateParams, GasEstimateResult, GetBlockResult,
            GetScResult, TransactionEntry, TransactionMeta, TransferParams, TransferResult,
        },
        NodeClient, RpcError, WalletClient,
    },
    sc::ScVariable,
};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

pub fn blid(topoheight: u64) -> String {
    format!("b{topoheight:08}")
}

fn topo_of(hash: &str) -> Option<u64> {
    hash.strip_prefix('b')?.parse().ok()
}

#[derive(Default)]
struct ChainState {
    head: u64,
    pruned_below: u64,
    testnet: bool,
    advance_per_info: u64,
    gas_storage: u64,
    blocks: HashMap<u64, Block>,
    txs: HashMap<String, TransactionEntry>,
    sc_code: HashMap<String, String>,
    sc_vars: HashMap<String, Vec<ScVariable>>,
    mempool: Vec<String>,
    block_fetches: Vec<u64>,
}

/// Synthetic daemon. Heights up to the head resolve to empty blocks unless
/// a block was planted explicitly; heights below the pruning boundary read
/// as missing, like a pruned node reports them.
pub struct MockNode {
    state: Mutex<ChainState>,
}

impl MockNode {
    pub fn new(head: u64) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ChainState {
                head,
                gas_storage: 150,
                ..ChainState::default()
            }),
        })
    }

    pub fn set_pruned_below(&self, topoheight: u64) {
        self.state.lock().unwrap().pruned_below = topoheight;
    }

    pub fn set_advance_per_info(&self, step: u64) {
        self.state.lock().unwrap().advance_per_info = step;
    }

    pub fn put_block(&self, topoheight: u64, block: Block) {
        self.state.lock().unwrap().blocks.insert(topoheight, block);
    }

    pub fn put_tx(&self, txid: &str, tx: &Transaction, signer: &str, ring: Vec<Vec<String>>) {
        self.state.lock().unwrap().txs.insert(
            txid.to_string(),
            TransactionEntry {
                hex: tx.to_hex(),
                meta: TransactionMeta {
                    signer: signer.to_string(),
                    ring,
                },
            },
        );
    }

    pub fn set_sc_code(&self, scid: &str, code: &str) {
        self.state
            .lock()
            .unwrap()
            .sc_code
            .insert(scid.to_string(), code.to_string());
    }

    pub fn set_sc_vars(&self, scid: &str, vars: &[(&str, &str)]) {
        self.state.lock().unwrap().sc_vars.insert(
            scid.to_string(),
            vars.iter()
                .map(|(key, value)| ScVariable {
                    key: key.to_string(),
                    value: value.to_string(),
                })
                .collect(),
        );
    }

    pub fn add_mempool_tx(&self, txid: &str, tx: &Transaction, signer: &str) {
        let mut state = self.state.lock().unwrap();
        state.txs.insert(
            txid.to_string(),
            TransactionEntry {
                hex: tx.to_hex(),
                meta: TransactionMeta {
                    signer: signer.to_string(),
                    ring: vec![],
                },
            },
        );
        state.mempool.push(txid.to_string());
    }

    pub fn block_fetches(&self) -> Vec<u64> {
        self.state.lock().unwrap().block_fetches.clone()
    }
}

#[async_trait]
impl NodeClient for MockNode {
    async fn get_info(&self) -> Result<ChainInfo, RpcError> {
        let mut state = self.state.lock().unwrap();
        state.head += state.advance_per_info;
        Ok(ChainInfo {
            height: state.head,
            topoheight: state.head,
            stableheight: state.head,
            testnet: state.testnet,
            network: "Simulator".to_string(),
            ..ChainInfo::default()
        })
    }

    async fn get_block_header_by_topoheight(
        &self,
        topoheight: u64,
    ) -> Result<BlockHeader, RpcError> {
        let state = self.state.lock().unwrap();
        if topoheight < 1 || topoheight < state.pruned_below || topoheight > state.head {
            return Err(RpcError::NotFound);
        }
        Ok(BlockHeader {
            hash: blid(topoheight),
            topoheight,
            height: topoheight,
        })
    }

    async fn get_block(&self, hash: &BlockHash) -> Result<GetBlockResult, RpcError> {
        let Some(topoheight) = topo_of(&hash.0) else {
            return Err(RpcError::NotFound);
        };
        let mut state = self.state.lock().unwrap();
        state.block_fetches.push(topoheight);
        let block = state.blocks.get(&topoheight).cloned().unwrap_or(Block {
            height: topoheight,
            timestamp: 0,
            miniblocks: vec![],
            tx_hashes: vec![],
        });
        Ok(GetBlockResult {
            blob: block.to_blob(),
        })
    }

    async fn get_transaction(&self, txid: &str) -> Result<TransactionEntry, RpcError> {
        self.state
            .lock()
            .unwrap()
            .txs
            .get(txid)
            .cloned()
            .ok_or(RpcError::NotFound)
    }

    async fn get_sc(
        &self,
        scid: &gnomon::sc::Scid,
        code: bool,
        variables: bool,
        _topoheight: u64,
    ) -> Result<GetScResult, RpcError> {
        let state = self.state.lock().unwrap();
        let mut result = GetScResult::default();
        if code {
            result.code = state.sc_code.get(&scid.0).cloned().unwrap_or_default();
        }
        if variables {
            if let Some(vars) = state.sc_vars.get(&scid.0) {
                for var in vars {
                    result.stringkeys.insert(
                        var.key.clone(),
                        serde_json::Value::String(var.value.clone()),
                    );
                }
            }
        }
        Ok(result)
    }

    async fn get_tx_pool(&self) -> Result<Vec<String>, RpcError> {
        Ok(self.state.lock().unwrap().mempool.clone())
    }

    async fn gas_estimate(
        &self,
        _params: GasEstimateParams,
    ) -> Result<GasEstimateResult, RpcError> {
        let state = self.state.lock().unwrap();
        Ok(GasEstimateResult {
            gascompute: 0,
            gasstorage: state.gas_storage,
        })
    }

    async fn get_height(&self) -> Result<u64, RpcError> {
        Ok(self.state.lock().unwrap().head)
    }
}

/// Wallet stub that records transfers along with the chain head they were
/// submitted at, optionally planting the pending transaction in the node's
/// mempool the way a real wallet submission would.
pub struct MockWallet {
    node: Arc<MockNode>,
    pub inject_mempool: bool,
    transfers: Mutex<Vec<(TransferParams, u64)>>,
}

impl MockWallet {
    pub fn new(node: Arc<MockNode>, inject_mempool: bool) -> Arc<Self> {
        Arc::new(Self {
            node,
            inject_mempool,
            transfers: Mutex::new(vec![]),
        })
    }

    pub fn transfers(&self) -> Vec<(TransferParams, u64)> {
        self.transfers.lock().unwrap().clone()
    }
}

#[async_trait]
impl WalletClient for MockWallet {
    async fn get_address(&self) -> Result<String, RpcError> {
        Ok("deto1registrarwallet".to_string())
    }

    async fn transfer(&self, params: TransferParams) -> Result<TransferResult, RpcError> {
        let head = self.node.state.lock().unwrap().head;
        let mut transfers = self.transfers.lock().unwrap();
        let txid = format!("pool{:04}", transfers.len());
        transfers.push((params.clone(), head));

        if self.inject_mempool {
            let args = params
                .sc_rpc
                .iter()
                .map(Argument::try_from)
                .collect::<anyhow::Result<Vec<_>>>()
                .expect("mock transfer arguments are well formed");
            let pending = Transaction {
                kind: TransactionKind::Sc,
                fees: params.fees,
                sc_data: Arguments(args),
                payloads: vec![Payload {
                    scid: ZERO_HASH.to_string(),
                    ring_size: params.ringsize,
                }],
            };
            self.node.add_mempool_tx(&txid, &pending, "deto1registrarwallet");
        }
        Ok(TransferResult { txid })
    }
}

pub fn install_tx(code: &str, ring_size: u64) -> Transaction {
    let mut sc_data = Arguments::new();
    sc_data.push_u64(ARG_SC_ACTION, SC_ACTION_INSTALL);
    sc_data.push_str(ARG_SC_CODE, code);
    Transaction {
        kind: TransactionKind::Sc,
        fees: 500,
        sc_data,
        payloads: vec![Payload {
            scid: ZERO_HASH.to_string(),
            ring_size,
        }],
    }
}

pub fn invoke_tx(scid: &str, entrypoint: &str) -> Transaction {
    let mut sc_data = Arguments::new();
    sc_data.push_u64(ARG_SC_ACTION, SC_ACTION_CALL);
    sc_data.push_hash(ARG_SC_ID, scid);
    sc_data.push_str(ARG_ENTRYPOINT, entrypoint);
    Transaction {
        kind: TransactionKind::Sc,
        fees: 120,
        sc_data,
        payloads: vec![Payload {
            scid: ZERO_HASH.to_string(),
            ring_size: 2,
        }],
    }
}

pub fn plain_tx(kind: TransactionKind) -> Transaction {
    Transaction {
        kind,
        fees: 10,
        sc_data: Arguments::new(),
        payloads: vec![Payload {
            scid: ZERO_HASH.to_string(),
            ring_size: 16,
        }],
    }
}

pub fn normal_tx_with_scid(scid: &str) -> Transaction {
    Transaction {
        kind: TransactionKind::Normal,
        fees: 25,
        sc_data: Arguments::new(),
        payloads: vec![Payload {
            scid: scid.to_string(),
            ring_size: 4,
        }],
    }
}

pub fn block_with_txs(height: u64, tx_hashes: Vec<String>) -> Block {
    Block {
        height,
        timestamp: height * 1_000,
        miniblocks: vec![Miniblock {
            miner: "deto1miner".to_string(),
            timestamp: height * 1_000,
        }],
        tx_hashes,
    }
}
