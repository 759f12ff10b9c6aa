use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tracing::debug;
use wallet_db::{Txid, WalletTransaction};

/// Bitcoind's "No such mempool or blockchain transaction" RPC code.
const RPC_INVALID_ADDRESS_OR_KEY: i64 = -5;

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("transaction {0} not found upstream")]
    NotFound(Txid),
    #[error("upstream transport: {0}")]
    Transport(String),
    #[error("upstream rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("upstream returned malformed payload: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Upstream node collaborator: resolves a txid to the full transaction.
/// "Not found" must stay distinguishable from transport failure, since the
/// backfill path treats both as fatal for the page but callers may retry
/// differently.
pub trait TransactionFetcher: Send + Sync {
    fn raw_transaction(
        &self,
        txid: &Txid,
    ) -> impl Future<Output = Result<WalletTransaction, UpstreamError>> + Send;
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    result: Option<VerboseTransaction>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// The subset of `getrawtransaction <txid> 1` we persist.
#[derive(Debug, Deserialize)]
struct VerboseTransaction {
    txid: Txid,
    hex: String,
    #[serde(default)]
    blockhash: Option<String>,
    #[serde(default)]
    blocktime: Option<u64>,
}

/// JSON-RPC client against a bitcoind-compatible node.
#[derive(Debug, Clone)]
pub struct BitcoindRpcFetcher {
    client: reqwest::Client,
    url: String,
    auth: Option<(String, String)>,
}

impl BitcoindRpcFetcher {
    pub fn new(
        url: impl Into<String>,
        auth: Option<(String, String)>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            auth,
        })
    }
}

impl TransactionFetcher for BitcoindRpcFetcher {
    async fn raw_transaction(&self, txid: &Txid) -> Result<WalletTransaction, UpstreamError> {
        debug!(%txid, "fetching transaction from upstream node");
        let payload = serde_json::json!({
            "jsonrpc": "1.0",
            "id": "wallet-history",
            "method": "getrawtransaction",
            "params": [txid.to_string(), 1],
        });

        let mut request = self.client.post(&self.url).json(&payload);
        if let Some((user, password)) = &self.auth {
            request = request.basic_auth(user, Some(password));
        }

        let response = request.send().await?;
        let envelope: RpcEnvelope = response
            .json()
            .await
            .map_err(|err| UpstreamError::Malformed(err.to_string()))?;

        if let Some(error) = envelope.error {
            if error.code == RPC_INVALID_ADDRESS_OR_KEY {
                return Err(UpstreamError::NotFound(*txid));
            }
            return Err(UpstreamError::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        let verbose = envelope
            .result
            .ok_or_else(|| UpstreamError::Malformed("missing result".into()))?;
        Ok(WalletTransaction {
            txid: verbose.txid,
            hex: verbose.hex,
            block_hash: verbose.blockhash,
            block_time: verbose.blocktime,
        })
    }
}
