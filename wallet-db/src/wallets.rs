use crate::WalletId;
use anyhow::bail;
use fjall::{PartitionCreateOptions, ReadTransaction, WriteTransaction};

/// Registry of created wallets. Key = wallet id, empty value.
#[derive(Clone)]
pub struct WalletsPartition(fjall::TxPartition);

impl WalletsPartition {
    pub fn new(keyspace: &fjall::TxKeyspace) -> anyhow::Result<Self> {
        Ok(Self(keyspace.open_partition(
            "wallets",
            PartitionCreateOptions::default(),
        )?))
    }

    pub fn contains_rtx(&self, rtx: &ReadTransaction, wallet_id: &WalletId) -> anyhow::Result<bool> {
        Ok(rtx.get(&self.0, wallet_id.as_bytes())?.is_some())
    }

    pub fn contains_wtx(
        &self,
        wtx: &mut WriteTransaction,
        wallet_id: &WalletId,
    ) -> anyhow::Result<bool> {
        Ok(wtx.get(&self.0, wallet_id.as_bytes())?.is_some())
    }

    /// Returns true if the wallet was newly created.
    pub fn create_wtx(
        &self,
        wtx: &mut WriteTransaction,
        wallet_id: &WalletId,
    ) -> anyhow::Result<bool> {
        if self.contains_wtx(wtx, wallet_id)? {
            return Ok(false);
        }
        wtx.insert(&self.0, wallet_id.as_bytes(), []);
        Ok(true)
    }
}

/// Addresses tracked per wallet. Key = wallet id ++ address bytes,
/// empty value; prefix scans enumerate one wallet's addresses.
#[derive(Clone)]
pub struct WalletAddressesPartition(fjall::TxPartition);

impl WalletAddressesPartition {
    pub fn new(keyspace: &fjall::TxKeyspace) -> anyhow::Result<Self> {
        Ok(Self(keyspace.open_partition(
            "wallet_addresses",
            PartitionCreateOptions::default(),
        )?))
    }

    fn key(wallet_id: &WalletId, address: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(32 + address.len());
        key.extend_from_slice(wallet_id.as_bytes());
        key.extend_from_slice(address.as_bytes());
        key
    }

    /// Inserts the addresses that are not yet tracked and returns them.
    pub fn import_wtx(
        &self,
        wtx: &mut WriteTransaction,
        wallet_id: &WalletId,
        addresses: &[String],
    ) -> anyhow::Result<Vec<String>> {
        let mut added = Vec::new();
        for address in addresses {
            if address.is_empty() {
                bail!("empty address");
            }
            let key = Self::key(wallet_id, address);
            if wtx.get(&self.0, &key)?.is_none() {
                wtx.insert(&self.0, &key, []);
                added.push(address.clone());
            }
        }
        Ok(added)
    }

    pub fn addresses_rtx<'a>(
        &'a self,
        rtx: &'a ReadTransaction,
        wallet_id: &WalletId,
    ) -> impl Iterator<Item = anyhow::Result<String>> + 'a {
        rtx.prefix(&self.0, *wallet_id.as_bytes()).map(|item| {
            let (key_bytes, _) = item?;
            Ok(String::from_utf8(key_bytes[32..].to_vec())?)
        })
    }
}
