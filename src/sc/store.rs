use crate::sc::{ScMethod, ScTx, ScVariable, Scid};
use std::collections::HashMap;

/// Contract-side persistence contract.
pub trait ScStore {
    /// Record the deployer of a contract (empty for late-discovered SCIDs)
    fn store_owner(&self, scid: &Scid, owner: &str) -> anyhow::Result<()>;

    fn get_owner(&self, scid: &Scid) -> anyhow::Result<Option<String>>;

    /// All known scid -> owner pairs
    fn get_all_owners(&self) -> anyhow::Result<HashMap<String, String>>;

    /// Append an invocation; ordering within the store is
    /// `(scid, topoheight, commit ordinal)`. Re-appending the same txid for
    /// the same scid and height is a no-op, so re-applied blocks never
    /// duplicate rows.
    fn store_invoke(&self, scid: &Scid, topoheight: u64, invoke: &ScTx) -> anyhow::Result<()>;

    /// Invocations for a contract in commit order
    fn get_all_invokes(&self, scid: &Scid) -> anyhow::Result<Vec<ScTx>>;

    /// Variable snapshot captured at an interaction height
    fn store_sc_vars(
        &self,
        scid: &Scid,
        topoheight: u64,
        vars: &[ScVariable],
    ) -> anyhow::Result<()>;

    fn get_sc_vars(&self, scid: &Scid, topoheight: u64) -> anyhow::Result<Vec<ScVariable>>;

    fn store_interaction_height(
        &self,
        scid: &Scid,
        method: ScMethod,
        topoheight: u64,
    ) -> anyhow::Result<()>;

    /// Interaction heights for a contract, ascending
    fn get_interaction_heights(&self, scid: &Scid) -> anyhow::Result<Vec<(ScMethod, u64)>>;

    /// Record a deploy whose variable fetch came back empty
    fn store_invalid_deploy(&self, scid: &Scid, fees: u64) -> anyhow::Result<()>;

    fn get_invalid_deploy(&self, scid: &Scid) -> anyhow::Result<Option<u64>>;
}
