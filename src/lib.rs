pub mod block;
pub mod indexer;
pub mod registrar;
pub mod rpc;
pub mod sc;
pub mod store;

/// Coarse step used by the pruned-node gap scan.
pub const BLOCK_JUMP: u64 = 10_000;

/// Hardcoded contract deployed in the genesis era; seeded into the validated
/// set at startup when it passes the search filter.
pub const BOOTSTRAP_SCID: &str =
    "0000000000000000000000000000000000000000000000000000000000000001";

pub const REGISTRY_SCID_MAINNET: &str =
    "a05395bb0cf77adc850928b0db00eb5ca7a9ccbafd9a38d021c8d299ad5ce1a4";
pub const REGISTRY_SCID_TESTNET: &str =
    "c9d23d2fc3aaa8e54e238a2218c0e5176a6e48780920fd8474fac5b0576110a2";

pub const CHAIN_HEAD_POLL_SECS: u64 = 5;
pub const RPC_RETRY_SECS: u64 = 1;
pub const RPC_TIMEOUT_SECS: u64 = 30;
pub const RECONNECT_STRIKE_LIMIT: u32 = 5;
pub const SHUTDOWN_DRAIN_SECS: u64 = 5;

/// Delimiter between patterns in a multi-pattern search filter.
pub const SEARCH_FILTER_SEPARATOR: &str = ";;;";
