//! Wire protocol between worker processes and the writer process: task
//! envelopes and responses, plus the length-prefixed frame codec.

use serde::{Deserialize, Serialize};
use wallet_db::{WalletId, WalletTransaction};

mod framing;

pub use framing::{encode_frame, FrameDecoder, FramingError, MAX_FRAME_LEN};

/// Scheduling hints used by the original callers. Larger is more urgent.
pub const SAVE_TRANSACTION_PRIORITY: u8 = 1;
pub const IMPORT_ADDRESS_PRIORITY: u8 = 5;
pub const IMPORT_ADDRESSES_PRIORITY: u8 = 10;
pub const CREATE_WALLET_PRIORITY: u8 = 20;

/// Mutation intent. Serializes as `{"method": ..., "params": [...]}` with
/// the params in positional order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "camelCase")]
pub enum Task {
    SaveTransaction(WalletId, WalletTransaction),
    ImportWalletAddresses(WalletId, Vec<String>),
    CreateWallet(#[serde(with = "single_param")] WalletId),
}

/// Single-argument methods still carry their argument as an ordered list;
/// serde would otherwise flatten a one-field variant to the bare value.
mod single_param {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use wallet_db::WalletId;

    pub fn serialize<S: Serializer>(id: &WalletId, serializer: S) -> Result<S::Ok, S::Error> {
        (id,).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<WalletId, D::Error> {
        let (id,) = <(WalletId,)>::deserialize(deserializer)?;
        Ok(id)
    }
}

impl Task {
    pub fn method(&self) -> &'static str {
        match self {
            Task::SaveTransaction(..) => "saveTransaction",
            Task::ImportWalletAddresses(..) => "importWalletAddresses",
            Task::CreateWallet(..) => "createWallet",
        }
    }
}

/// One queued mutation as sent to the writer process. `id` is unique for
/// the lifetime of the sending connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub id: u64,
    pub priority: u8,
    #[serde(flatten)]
    pub task: Task,
}

/// Why the writer rejected a task. Travels alongside the human-readable
/// message so callers do not have to dispatch on prose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskErrorKind {
    UnknownWallet,
    InvalidParams,
    Internal,
}

/// Writer reply: exactly one of `result` or `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResponse {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<TaskErrorKind>,
}

impl TaskResponse {
    pub fn ok(id: u64, result: serde_json::Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
            error_kind: None,
        }
    }

    pub fn err(id: u64, kind: TaskErrorKind, error: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(error.into()),
            error_kind: Some(kind),
        }
    }
}
