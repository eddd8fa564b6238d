use crate::{
    block::BlockHash,
    sc::Scid,
    RPC_TIMEOUT_SECS,
};
use async_trait::async_trait;
use async_tungstenite::{
    tokio::{connect_async, ConnectStream},
    tungstenite::Message,
    WebSocketStream,
};
use futures::{SinkExt, StreamExt};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
    time::Duration,
};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

pub mod types;

use types::*;

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// The daemon does not have the requested entity. For block headers this
    /// is the pruning signal; for transactions it means skip-this-tx.
    #[error("not found")]
    NotFound,
    #[error("rpc error {code}: {message}")]
    Call { code: i64, message: String },
    #[error("transport: {0}")]
    Transport(String),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

impl RpcError {
    fn from_remote(code: i64, message: String) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("not found") || lower.contains("out of range") {
            RpcError::NotFound
        } else {
            RpcError::Call { code, message }
        }
    }
}

/// Typed daemon calls the indexer and registrar are written against.
/// [`DaemonClient`] is the production implementation.
#[async_trait]
pub trait NodeClient: Send + Sync {
    async fn get_info(&self) -> Result<ChainInfo, RpcError>;
    async fn get_block_header_by_topoheight(
        &self,
        topoheight: u64,
    ) -> Result<BlockHeader, RpcError>;
    async fn get_block(&self, hash: &BlockHash) -> Result<GetBlockResult, RpcError>;
    async fn get_transaction(&self, txid: &str) -> Result<TransactionEntry, RpcError>;
    async fn get_sc(
        &self,
        scid: &Scid,
        code: bool,
        variables: bool,
        topoheight: u64,
    ) -> Result<GetScResult, RpcError>;
    async fn get_tx_pool(&self) -> Result<Vec<String>, RpcError>;
    async fn gas_estimate(
        &self,
        params: GasEstimateParams,
    ) -> Result<GasEstimateResult, RpcError>;
    /// Wallet height, for wallet run-mode.
    async fn get_height(&self) -> Result<u64, RpcError>;
}

/// Wallet-side calls; transfers are delegated to the wallet endpoint which
/// holds the signing keys.
#[async_trait]
pub trait WalletClient: Send + Sync {
    async fn get_address(&self) -> Result<String, RpcError>;
    async fn transfer(&self, params: TransferParams) -> Result<TransferResult, RpcError>;
}

#[derive(Serialize)]
struct Request<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct Response {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<ErrorObject>,
}

#[derive(Deserialize)]
struct ErrorObject {
    #[serde(default)]
    code: i64,
    message: String,
}

/// JSON-RPC 2.0 client over the daemon's websocket endpoint.
///
/// The connection is dialed lazily and redialed at most once per failing
/// call; long-running callers layer their own retry on top.
pub struct DaemonClient {
    endpoint: String,
    conn: Mutex<Option<WebSocketStream<ConnectStream>>>,
    next_id: AtomicU64,
    connected: AtomicBool,
}

impl DaemonClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            conn: Mutex::new(None),
            next_id: AtomicU64::new(1),
            connected: AtomicBool::new(false),
        }
    }

    /// Dial the daemon eagerly; errors leave no partial state behind.
    pub async fn connect(endpoint: impl Into<String>) -> Result<Self, RpcError> {
        let client = Self::new(endpoint);
        let stream = client.dial().await?;
        *client.conn.lock().await = Some(stream);
        Ok(client)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn dial(&self) -> Result<WebSocketStream<ConnectStream>, RpcError> {
        let url = format!("ws://{}/ws", self.endpoint);
        match connect_async(url.as_str()).await {
            Ok((stream, _)) => {
                if !self.connected.swap(true, Ordering::SeqCst) {
                    info!("connection to RPC server successful - {url}");
                }
                Ok(stream)
            }
            Err(err) => {
                if self.connected.swap(false, Ordering::SeqCst) {
                    error!("connection to RPC server failed - {url}");
                }
                Err(RpcError::Transport(err.to_string()))
            }
        }
    }

    async fn roundtrip(
        stream: &mut WebSocketStream<ConnectStream>,
        id: u64,
        payload: String,
    ) -> Result<Response, RpcError> {
        stream
            .send(Message::Text(payload))
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        loop {
            let msg = stream
                .next()
                .await
                .ok_or_else(|| RpcError::Transport("connection closed".to_string()))?
                .map_err(|e| RpcError::Transport(e.to_string()))?;
            let text = match msg {
                Message::Text(text) => text,
                Message::Close(_) => {
                    return Err(RpcError::Transport("connection closed".to_string()))
                }
                // ping/pong and binary frames are not part of the protocol
                _ => continue,
            };
            let response: Response = serde_json::from_str(&text)?;
            if response.id == Some(id) {
                return Ok(response);
            }
            debug!("discarding response for unknown request id {:?}", response.id);
        }
    }

    async fn call<R: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<R, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let payload = serde_json::to_string(&Request {
            jsonrpc: "2.0",
            id,
            method,
            params,
        })?;

        let mut conn = self.conn.lock().await;
        let mut reconnected = false;
        let response = loop {
            if conn.is_none() {
                match self.dial().await {
                    Ok(stream) => *conn = Some(stream),
                    Err(err) if reconnected => return Err(err),
                    Err(_) => {
                        reconnected = true;
                        continue;
                    }
                }
            }
            let stream = conn.as_mut().expect("connection was just established");
            let fut = Self::roundtrip(stream, id, payload.clone());
            match tokio::time::timeout(Duration::from_secs(RPC_TIMEOUT_SECS), fut).await {
                Ok(Ok(response)) => break response,
                Ok(Err(err)) => {
                    *conn = None;
                    self.connected.store(false, Ordering::SeqCst);
                    if reconnected {
                        return Err(err);
                    }
                    reconnected = true;
                }
                Err(_) => {
                    *conn = None;
                    self.connected.store(false, Ordering::SeqCst);
                    return Err(RpcError::Transport(format!(
                        "{method} timed out after {RPC_TIMEOUT_SECS}s"
                    )));
                }
            }
        };

        if let Some(err) = response.error {
            return Err(RpcError::from_remote(err.code, err.message));
        }
        let result = response.result.unwrap_or(serde_json::Value::Null);
        Ok(serde_json::from_value(result)?)
    }

    async fn call_with<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: P,
    ) -> Result<R, RpcError> {
        self.call(method, Some(serde_json::to_value(params)?)).await
    }
}

#[async_trait]
impl NodeClient for DaemonClient {
    async fn get_info(&self) -> Result<ChainInfo, RpcError> {
        self.call("DERO.GetInfo", None).await
    }

    async fn get_block_header_by_topoheight(
        &self,
        topoheight: u64,
    ) -> Result<BlockHeader, RpcError> {
        let result: GetBlockHeaderResult = self
            .call_with(
                "DERO.GetBlockHeaderByTopoHeight",
                GetBlockHeaderByTopoheightParams { topoheight },
            )
            .await?;
        Ok(result.block_header)
    }

    async fn get_block(&self, hash: &BlockHash) -> Result<GetBlockResult, RpcError> {
        self.call_with(
            "DERO.GetBlock",
            GetBlockParams {
                hash: hash.0.clone(),
            },
        )
        .await
    }

    async fn get_transaction(&self, txid: &str) -> Result<TransactionEntry, RpcError> {
        let result: GetTransactionResult = self
            .call_with(
                "DERO.GetTransaction",
                GetTransactionParams {
                    txs_hashes: vec![txid.to_string()],
                },
            )
            .await?;
        let hex = result.txs_as_hex.first().cloned().ok_or(RpcError::NotFound)?;
        let meta = result.txs.first().cloned().unwrap_or_default();
        Ok(TransactionEntry { hex, meta })
    }

    async fn get_sc(
        &self,
        scid: &Scid,
        code: bool,
        variables: bool,
        topoheight: u64,
    ) -> Result<GetScResult, RpcError> {
        self.call_with(
            "DERO.GetSC",
            GetScParams {
                scid: scid.0.clone(),
                code,
                variables,
                topoheight,
            },
        )
        .await
    }

    async fn get_tx_pool(&self) -> Result<Vec<String>, RpcError> {
        let result: GetTxPoolResult = self.call("DERO.GetTxPool", None).await?;
        Ok(result.txs)
    }

    async fn gas_estimate(
        &self,
        params: GasEstimateParams,
    ) -> Result<GasEstimateResult, RpcError> {
        self.call_with("DERO.GetGasEstimate", params).await
    }

    async fn get_height(&self) -> Result<u64, RpcError> {
        let result: GetHeightResult = self.call("WALLET.GetHeight", None).await?;
        Ok(result.height)
    }
}

/// JSON-RPC client for the wallet's HTTP endpoint.
pub struct WalletRpcClient {
    url: String,
    http: reqwest::Client,
}

impl WalletRpcClient {
    pub fn new(endpoint: &str) -> Self {
        Self {
            url: format!("http://{endpoint}/json_rpc"),
            http: reqwest::Client::new(),
        }
    }

    async fn call<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<P>,
    ) -> Result<R, RpcError> {
        let params = match params {
            Some(p) => Some(serde_json::to_value(p)?),
            None => None,
        };
        let request = Request {
            jsonrpc: "2.0",
            id: 1,
            method,
            params,
        };
        let response: Response = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?
            .json()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;
        if let Some(err) = response.error {
            return Err(RpcError::from_remote(err.code, err.message));
        }
        Ok(serde_json::from_value(
            response.result.unwrap_or(serde_json::Value::Null),
        )?)
    }
}

#[async_trait]
impl WalletClient for WalletRpcClient {
    async fn get_address(&self) -> Result<String, RpcError> {
        let result: GetAddressResult = self.call::<(), _>("GetAddress", None).await?;
        Ok(result.address)
    }

    async fn transfer(&self, params: TransferParams) -> Result<TransferResult, RpcError> {
        self.call("Transfer", Some(params)).await
    }
}
