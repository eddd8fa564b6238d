use crate::block::transaction::{ArgValue, Argument};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Snapshot of the daemon's view of the chain, returned by `DERO.GetInfo`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainInfo {
    #[serde(default)]
    pub height: u64,
    #[serde(default)]
    pub topoheight: u64,
    #[serde(default)]
    pub stableheight: u64,
    #[serde(default)]
    pub testnet: bool,
    #[serde(default)]
    pub network: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub tx_pool_size: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GetBlockHeaderByTopoheightParams {
    pub topoheight: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BlockHeader {
    pub hash: String,
    #[serde(default)]
    pub topoheight: u64,
    #[serde(default)]
    pub height: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetBlockHeaderResult {
    pub block_header: BlockHeader,
}

#[derive(Debug, Clone, Serialize)]
pub struct GetBlockParams {
    pub hash: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GetBlockResult {
    pub blob: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GetTransactionParams {
    pub txs_hashes: Vec<String>,
}

/// Per-transaction metadata the daemon returns alongside the raw hex.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionMeta {
    #[serde(default)]
    pub signer: String,
    /// Ring member addresses, one list per payload.
    #[serde(default)]
    pub ring: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GetTransactionResult {
    #[serde(default)]
    pub txs_as_hex: Vec<String>,
    #[serde(default)]
    pub txs: Vec<TransactionMeta>,
}

/// Raw hex plus metadata for a single transaction.
#[derive(Debug, Clone, Default)]
pub struct TransactionEntry {
    pub hex: String,
    pub meta: TransactionMeta,
}

#[derive(Debug, Clone, Serialize)]
pub struct GetScParams {
    pub scid: String,
    pub code: bool,
    pub variables: bool,
    pub topoheight: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GetScResult {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub stringkeys: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub uint64keys: HashMap<u64, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GetTxPoolResult {
    #[serde(default)]
    pub txs: Vec<String>,
}

/// SC-call argument in the daemon's JSON shape. The typed [`Argument`] form
/// is used everywhere else; conversion happens at this boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcArgument {
    pub name: String,
    pub datatype: String,
    pub value: serde_json::Value,
}

impl From<&Argument> for RpcArgument {
    fn from(arg: &Argument) -> Self {
        let (datatype, value) = match &arg.value {
            ArgValue::Uint64(n) => ("U", serde_json::json!(n)),
            ArgValue::Str(s) => ("S", serde_json::json!(s)),
            ArgValue::Hash(h) => ("H", serde_json::json!(h)),
        };
        Self {
            name: arg.name.clone(),
            datatype: datatype.to_string(),
            value,
        }
    }
}

impl TryFrom<&RpcArgument> for Argument {
    type Error = anyhow::Error;

    fn try_from(arg: &RpcArgument) -> anyhow::Result<Self> {
        let value = match arg.datatype.as_str() {
            "U" => ArgValue::Uint64(
                arg.value
                    .as_u64()
                    .ok_or_else(|| anyhow::anyhow!("argument {} is not a u64", arg.name))?,
            ),
            "S" => ArgValue::Str(
                arg.value
                    .as_str()
                    .ok_or_else(|| anyhow::anyhow!("argument {} is not a string", arg.name))?
                    .to_string(),
            ),
            "H" => ArgValue::Hash(
                arg.value
                    .as_str()
                    .ok_or_else(|| anyhow::anyhow!("argument {} is not a hash", arg.name))?
                    .to_string(),
            ),
            other => anyhow::bail!("unknown argument datatype {other}"),
        };
        Ok(Self {
            name: arg.name.clone(),
            value,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transfer {
    pub destination: String,
    pub amount: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GasEstimateParams {
    pub sc_rpc: Vec<RpcArgument>,
    pub ringsize: u64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub signer: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub transfers: Vec<Transfer>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GasEstimateResult {
    #[serde(default)]
    pub gascompute: u64,
    #[serde(default)]
    pub gasstorage: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TransferParams {
    pub sc_rpc: Vec<RpcArgument>,
    pub ringsize: u64,
    pub fees: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub transfers: Vec<Transfer>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransferResult {
    pub txid: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GetAddressResult {
    pub address: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GetHeightResult {
    #[serde(default)]
    pub height: u64,
}
