use serde::{Deserialize, Serialize};

pub const ARG_ENTRYPOINT: &str = "entrypoint";
pub const ARG_SC_ACTION: &str = "SC_ACTION";
pub const ARG_SC_CODE: &str = "SC_CODE";
pub const ARG_SC_ID: &str = "SC_ID";

pub const SC_ACTION_CALL: u64 = 0;
pub const SC_ACTION_INSTALL: u64 = 1;

/// Payload SCID of a plain transfer.
pub const ZERO_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionKind {
    Registration,
    Burn,
    Normal,
    Sc,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub scid: String,
    pub ring_size: u64,
}

impl Payload {
    /// A payload references a contract when its SCID is set and non-zero.
    pub fn has_scid(&self) -> bool {
        !self.scid.is_empty() && self.scid != ZERO_HASH
    }
}

/// Deserialized form of the daemon's raw transaction hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub kind: TransactionKind,
    pub fees: u64,
    pub sc_data: Arguments,
    pub payloads: Vec<Payload>,
}

impl Transaction {
    pub fn from_hex(raw: &str) -> anyhow::Result<Self> {
        let bytes = hex::decode(raw)?;
        Ok(bcs::from_bytes(&bytes)?)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(bcs::to_bytes(self).expect("transaction serialization is infallible"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArgValue {
    Uint64(u64),
    Str(String),
    Hash(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Argument {
    pub name: String,
    pub value: ArgValue,
}

/// Ordered SC-call arguments with typed lookups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Arguments(pub Vec<Argument>);

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_u64(&mut self, name: &str, value: u64) {
        self.0.push(Argument {
            name: name.to_string(),
            value: ArgValue::Uint64(value),
        });
    }

    pub fn push_str(&mut self, name: &str, value: impl Into<String>) {
        self.0.push(Argument {
            name: name.to_string(),
            value: ArgValue::Str(value.into()),
        });
    }

    pub fn push_hash(&mut self, name: &str, value: impl Into<String>) {
        self.0.push(Argument {
            name: name.to_string(),
            value: ArgValue::Hash(value.into()),
        });
    }

    pub fn value_u64(&self, name: &str) -> Option<u64> {
        self.0.iter().find_map(|arg| match &arg.value {
            ArgValue::Uint64(n) if arg.name == name => Some(*n),
            _ => None,
        })
    }

    pub fn value_str(&self, name: &str) -> Option<&str> {
        self.0.iter().find_map(|arg| match &arg.value {
            ArgValue::Str(s) if arg.name == name => Some(s.as_str()),
            _ => None,
        })
    }

    pub fn value_hash(&self, name: &str) -> Option<&str> {
        self.0.iter().find_map(|arg| match &arg.value {
            ArgValue::Hash(h) if arg.name == name => Some(h.as_str()),
            _ => None,
        })
    }

    pub fn to_rpc(&self) -> Vec<crate::rpc::types::RpcArgument> {
        self.0.iter().map(Into::into).collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn install_tx() -> Transaction {
        let mut sc_data = Arguments::new();
        sc_data.push_u64(ARG_SC_ACTION, SC_ACTION_INSTALL);
        sc_data.push_str(ARG_SC_CODE, "Function InputStr(input String) Uint64");
        Transaction {
            kind: TransactionKind::Sc,
            fees: 320,
            sc_data,
            payloads: vec![Payload {
                scid: ZERO_HASH.to_string(),
                ring_size: 2,
            }],
        }
    }

    #[test]
    fn transaction_hex_round_trip() -> anyhow::Result<()> {
        let tx = install_tx();
        let decoded = Transaction::from_hex(&tx.to_hex())?;
        assert_eq!(decoded, tx);
        assert_eq!(decoded.sc_data.value_u64(ARG_SC_ACTION), Some(SC_ACTION_INSTALL));
        Ok(())
    }

    #[test]
    fn argument_lookups_are_typed() {
        let mut args = Arguments::new();
        args.push_str(ARG_ENTRYPOINT, "Bar");
        args.push_hash(ARG_SC_ID, "ab".repeat(32));
        args.push_u64(ARG_SC_ACTION, SC_ACTION_CALL);

        assert_eq!(args.value_str(ARG_ENTRYPOINT), Some("Bar"));
        assert_eq!(args.value_hash(ARG_SC_ID).map(str::len), Some(64));
        assert_eq!(args.value_u64(ARG_SC_ACTION), Some(SC_ACTION_CALL));
        // wrong-type lookups miss instead of coercing
        assert_eq!(args.value_str(ARG_SC_ID), None);
        assert_eq!(args.value_u64(ARG_ENTRYPOINT), None);
    }

    #[test]
    fn zero_scid_payload_is_not_a_contract_reference() {
        let tx = install_tx();
        assert!(!tx.payloads[0].has_scid());
        let payload = Payload {
            scid: "cd".repeat(32),
            ring_size: 2,
        };
        assert!(payload.has_scid());
    }
}
