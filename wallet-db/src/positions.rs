use crate::{Txid, WalletId};
use anyhow::bail;
use bytemuck::{AnyBitPattern, NoUninit};
use fjall::{PartitionCreateOptions, ReadTransaction, WriteTransaction};
use std::ops::Bound;

/// Position of a transaction inside a wallet's history. Every field is a
/// big-endian byte array so that the bytewise partition order equals the
/// `(wallet_id, height, sequence)` numeric order.
#[derive(Clone, Copy, Debug, AnyBitPattern, NoUninit, PartialEq, Eq)]
#[repr(C)]
pub struct PositionKey {
    pub wallet_id: WalletId,
    pub height: [u8; 4],   // u32 be
    pub sequence: [u8; 4], // u32 be
}

pub const POSITION_KEY_LEN: usize = 40; // 32 + 4 + 4

impl PositionKey {
    pub fn new(wallet_id: WalletId, height: u32, sequence: u32) -> Self {
        Self {
            wallet_id,
            height: height.to_be_bytes(),
            sequence: sequence.to_be_bytes(),
        }
    }

    pub fn height(&self) -> u32 {
        u32::from_be_bytes(self.height)
    }

    pub fn sequence(&self) -> u32 {
        u32::from_be_bytes(self.sequence)
    }

    fn as_array(&self) -> [u8; POSITION_KEY_LEN] {
        let mut out = [0u8; POSITION_KEY_LEN];
        out.copy_from_slice(bytemuck::bytes_of(self));
        out
    }
}

#[derive(Clone)]
pub struct TxidByPositionPartition(fjall::TxPartition);

impl TxidByPositionPartition {
    pub fn new(keyspace: &fjall::TxKeyspace) -> anyhow::Result<Self> {
        Ok(Self(keyspace.open_partition(
            "txid_by_position",
            PartitionCreateOptions::default(),
        )?))
    }

    pub fn insert(&self, key: &PositionKey, txid: &Txid) -> anyhow::Result<()> {
        self.0.insert(bytemuck::bytes_of(key), txid.as_bytes())?;
        Ok(())
    }

    pub fn insert_wtx(&self, wtx: &mut WriteTransaction, key: &PositionKey, txid: &Txid) {
        wtx.insert(&self.0, bytemuck::bytes_of(key), txid.as_bytes());
    }

    /// Descending scan over one wallet's positions, anchored with
    /// seek-forward-then-retreat semantics: iteration begins at the first
    /// stored key at or above `start` within the wallet's range, or at the
    /// greatest stored key below `start` if nothing above it exists.
    pub fn scan_backward_from<'a>(
        &'a self,
        rtx: &'a ReadTransaction,
        start: &PositionKey,
    ) -> anyhow::Result<
        impl DoubleEndedIterator<Item = anyhow::Result<(PositionKey, Txid)>> + 'a,
    > {
        let low = PositionKey::new(start.wallet_id, 0, 0).as_array();
        let high = PositionKey::new(start.wallet_id, u32::MAX, u32::MAX).as_array();
        let start_bytes = start.as_array();

        let anchor = match rtx.range(&self.0, start_bytes..=high).next() {
            Some(item) => {
                let (key_bytes, _) = item?;
                let mut anchor = [0u8; POSITION_KEY_LEN];
                if key_bytes.len() != POSITION_KEY_LEN {
                    bail!(
                        "invalid key length in txid_by_position partition: {}",
                        key_bytes.len()
                    );
                }
                anchor.copy_from_slice(&key_bytes);
                Some(anchor)
            }
            None => None,
        };

        let bounds = match anchor {
            Some(anchor) => (Bound::Included(low), Bound::Included(anchor)),
            None => (Bound::Included(low), Bound::Excluded(start_bytes)),
        };

        Ok(rtx.range(&self.0, bounds).rev().map(|item| {
            let (key_bytes, value_bytes) = item?;
            if key_bytes.len() != POSITION_KEY_LEN {
                bail!(
                    "invalid key length in txid_by_position partition: {}",
                    key_bytes.len()
                );
            }
            let key: PositionKey = *bytemuck::from_bytes(&key_bytes);
            let txid = Txid::from_slice(&value_bytes)?;
            Ok((key, txid))
        }))
    }
}
