use crate::block::transaction::{Arguments, Payload};
use serde::{Deserialize, Serialize};

pub mod store;

/// 32-byte smart contract id, as its 64-hex string form.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scid(pub String);

impl std::fmt::Debug for Scid {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Scid {{ {:?} }}", self.0)
    }
}

impl std::fmt::Display for Scid {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Scid {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Contract storage entry; values are stringified scalars.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScVariable {
    pub key: String,
    pub value: String,
}

/// How a transaction touched a contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScMethod {
    InstallSc,
    ScInvoke,
}

impl ScMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScMethod::InstallSc => "installsc",
            ScMethod::ScInvoke => "scinvoke",
        }
    }
}

/// Parsed SC transaction as captured by the per-block classifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScTx {
    pub txid: String,
    pub scid: Scid,
    pub method: ScMethod,
    pub entrypoint: String,
    /// Recoverable only at ringsize 2; blank otherwise.
    pub sender: String,
    pub fees: u64,
    pub height: u64,
    pub sc_args: Arguments,
    pub payloads: Vec<Payload>,
}

/// Normal transfer carrying a contract payload, keyed by ring member address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalTxWithScid {
    pub txid: String,
    pub scid: Scid,
    pub fees: u64,
    pub height: u64,
}

/// Row of the companion API's `/api/indexedscs` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedSc {
    #[serde(rename = "SCID")]
    pub scid: String,
    #[serde(rename = "Owner")]
    pub owner: String,
    #[serde(rename = "Height")]
    pub height: u64,
}

/// Look a key up in a fetched variable set.
pub fn sc_values_by_key<'a>(vars: &'a [ScVariable], key: &str) -> Option<&'a str> {
    vars.iter()
        .find(|var| var.key == key)
        .map(|var| var.value.as_str())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn values_by_key_finds_registration_marker() {
        let scid = "ab".repeat(32);
        let vars = vec![
            ScVariable {
                key: "owner".to_string(),
                value: "deto1xyz".to_string(),
            },
            ScVariable {
                key: format!("{scid}height"),
                value: "12345".to_string(),
            },
        ];
        assert_eq!(sc_values_by_key(&vars, &format!("{scid}height")), Some("12345"));
        assert_eq!(sc_values_by_key(&vars, "missing"), None);
    }
}
