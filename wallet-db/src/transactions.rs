use crate::{Txid, WalletId, WalletTransaction};
use bytemuck::{AnyBitPattern, NoUninit};
use fjall::{PartitionCreateOptions, ReadTransaction, WriteTransaction};

/// Cache key for a transaction payload: one entry per wallet and txid.
#[derive(Clone, Copy, Debug, AnyBitPattern, NoUninit, PartialEq, Eq)]
#[repr(C)]
pub struct WalletTxKey {
    pub wallet_id: WalletId,
    pub txid: Txid,
}

impl WalletTxKey {
    pub fn new(wallet_id: WalletId, txid: Txid) -> Self {
        Self { wallet_id, txid }
    }
}

#[derive(Clone)]
pub struct WalletTransactionPartition(fjall::TxPartition);

impl WalletTransactionPartition {
    pub fn new(keyspace: &fjall::TxKeyspace) -> anyhow::Result<Self> {
        Ok(Self(keyspace.open_partition(
            "wallet_transactions",
            PartitionCreateOptions::default(),
        )?))
    }

    pub fn get_rtx(
        &self,
        rtx: &ReadTransaction,
        key: &WalletTxKey,
    ) -> anyhow::Result<Option<WalletTransaction>> {
        match rtx.get(&self.0, bytemuck::bytes_of(key))? {
            Some(bytes) => Ok(Some(WalletTransaction::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn contains_wtx(&self, wtx: &mut WriteTransaction, key: &WalletTxKey) -> anyhow::Result<bool> {
        Ok(wtx.get(&self.0, bytemuck::bytes_of(key))?.is_some())
    }

    /// Entries are content-addressed and immutable: inserting an existing
    /// key is a no-op rather than an overwrite.
    pub fn insert_wtx(
        &self,
        wtx: &mut WriteTransaction,
        key: &WalletTxKey,
        transaction: &WalletTransaction,
    ) -> anyhow::Result<bool> {
        if self.contains_wtx(wtx, key)? {
            return Ok(false);
        }
        wtx.insert(&self.0, bytemuck::bytes_of(key), transaction.to_bytes()?);
        Ok(true)
    }
}
