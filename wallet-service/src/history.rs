use crate::error::HistoryError;
use crate::fetcher::TransactionFetcher;
use crate::pagination::{self, Position, RangeParams, TxidPage};
use crate::writer_client::WriterClient;
use serde::Serialize;
use tracing::debug;
use wallet_db::fjall::TxKeyspace;
use wallet_db::positions::TxidByPositionPartition;
use wallet_db::transactions::{WalletTransactionPartition, WalletTxKey};
use wallet_db::{Txid, WalletId, WalletTransaction};

/// A page of full transactions, same order and cursor semantics as
/// [`TxidPage`].
#[derive(Debug, Clone, Serialize)]
pub struct TransactionPage {
    pub transactions: Vec<WalletTransaction>,
    pub start: Position,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<Position>,
}

/// Read side of the wallet history. All reads go straight to the store;
/// mutations discovered along the way (cache misses) are routed through
/// the writer process.
pub struct HistoryService<F> {
    keyspace: TxKeyspace,
    positions: TxidByPositionPartition,
    transactions: WalletTransactionPartition,
    fetcher: F,
    writer: WriterClient,
}

impl<F: TransactionFetcher> HistoryService<F> {
    pub fn new(keyspace: &TxKeyspace, fetcher: F, writer: WriterClient) -> anyhow::Result<Self> {
        Ok(Self {
            keyspace: keyspace.clone(),
            positions: TxidByPositionPartition::new(keyspace)?,
            transactions: WalletTransactionPartition::new(keyspace)?,
            fetcher,
            writer,
        })
    }

    pub fn list_wallet_txids(
        &self,
        wallet_id: WalletId,
        params: &RangeParams,
    ) -> Result<TxidPage, HistoryError> {
        let query = params.validate()?;
        let rtx = self.keyspace.read_tx();
        pagination::list_positions(&self.positions, &rtx, wallet_id, &query)
    }

    /// Resolves a txid page to full transactions. The page and every cache
    /// lookup come from one read snapshot; misses are then backfilled
    /// strictly in page order, and the first failed import fails the whole
    /// request rather than returning a page with holes.
    pub async fn get_wallet_transactions(
        &self,
        wallet_id: WalletId,
        params: &RangeParams,
    ) -> Result<TransactionPage, HistoryError> {
        let query = params.validate()?;

        let (page, cached) = {
            let rtx = self.keyspace.read_tx();
            let page = pagination::list_positions(&self.positions, &rtx, wallet_id, &query)?;
            let cached = page
                .txids
                .iter()
                .map(|txid| {
                    let key = WalletTxKey::new(wallet_id, *txid);
                    Ok((*txid, self.transactions.get_rtx(&rtx, &key)?))
                })
                .collect::<anyhow::Result<Vec<(Txid, Option<WalletTransaction>)>>>()?;
            (page, cached)
        };

        let mut transactions = Vec::with_capacity(cached.len());
        for (txid, entry) in cached {
            match entry {
                Some(transaction) => transactions.push(transaction),
                None => transactions.push(self.import_transaction(wallet_id, &txid).await?),
            }
        }

        Ok(TransactionPage {
            transactions,
            start: page.start,
            end: page.end,
        })
    }

    /// Cache-miss path: fetch from the upstream node, hand the payload to
    /// the writer, and only then surface it to the caller. The returned
    /// transaction is the fetched one, so the caller does not depend on
    /// the writer's queue having drained.
    async fn import_transaction(
        &self,
        wallet_id: WalletId,
        txid: &Txid,
    ) -> Result<WalletTransaction, HistoryError> {
        debug!(%wallet_id, %txid, "transaction missing from cache, importing");
        let transaction = self.fetcher.raw_transaction(txid).await?;
        self.writer.save_transaction(wallet_id, &transaction).await?;
        Ok(transaction)
    }
}
