use anyhow::bail;
use bytemuck::{AnyBitPattern, NoUninit};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

pub mod positions;
pub mod transactions;
pub mod wallets;

pub use fjall;

/// Identifier of a wallet: a 32-byte hash grouping the addresses whose
/// history is tracked together. Hex-encoded everywhere outside the store.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, AnyBitPattern, NoUninit)]
pub struct WalletId(pub [u8; 32]);

/// Content-addressed transaction hash.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, AnyBitPattern, NoUninit)]
pub struct Txid(pub [u8; 32]);

macro_rules! hex_id {
    ($name:ident) => {
        impl $name {
            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            pub fn from_slice(bytes: &[u8]) -> anyhow::Result<Self> {
                if bytes.len() != 32 {
                    bail!(
                        "{} must be 32 bytes, got {}",
                        stringify!($name),
                        bytes.len()
                    );
                }
                let mut out = [0u8; 32];
                out.copy_from_slice(bytes);
                Ok(Self(out))
            }
        }

        impl FromStr for $name {
            type Err = anyhow::Error;

            fn from_str(s: &str) -> anyhow::Result<Self> {
                if s.len() != 64 {
                    bail!(
                        "{} must be 64 hex characters, got {}",
                        stringify!($name),
                        s.len()
                    );
                }
                let mut out = [0u8; 32];
                faster_hex::hex_decode(s.as_bytes(), &mut out)?;
                Ok(Self(out))
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                f.write_str(&faster_hex::hex_string(&self.0))
            }
        }

        impl Debug for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&faster_hex::hex_string(&self.0))
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(D::Error::custom)
            }
        }
    };
}

hex_id!(WalletId);
hex_id!(Txid);

/// Transaction payload cached per wallet: the raw transaction plus the
/// block metadata known at import time. Entries are immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub txid: Txid,
    pub hex: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_time: Option<u64>,
}

impl WalletTransaction {
    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> anyhow::Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_round_trip() {
        let id: WalletId = "aa".repeat(32).parse().unwrap();
        assert_eq!(id.0, [0xaa; 32]);
        assert_eq!(id.to_string(), "aa".repeat(32));
    }

    #[test]
    fn test_rejects_bad_hex() {
        assert!("zz".repeat(32).parse::<Txid>().is_err());
        assert!("ab".parse::<Txid>().is_err());
        assert!(Txid::from_slice(&[0u8; 31]).is_err());
    }

    #[test]
    fn test_serde_as_hex_string() {
        let txid = Txid([7u8; 32]);
        let json = serde_json::to_string(&txid).unwrap();
        assert_eq!(json, format!("\"{}\"", "07".repeat(32)));
        let back: Txid = serde_json::from_str(&json).unwrap();
        assert_eq!(back, txid);
    }

    #[test]
    fn test_transaction_payload_round_trip() {
        let tx = WalletTransaction {
            txid: Txid([1u8; 32]),
            hex: "0100".into(),
            block_hash: Some("00".repeat(32)),
            block_time: Some(1_700_000_000),
        };
        let bytes = tx.to_bytes().unwrap();
        assert_eq!(WalletTransaction::from_bytes(&bytes).unwrap(), tx);
    }
}
