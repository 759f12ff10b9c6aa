use crate::error::{HistoryError, ValidationError};
use serde::{Deserialize, Serialize};
use wallet_db::fjall::ReadTransaction;
use wallet_db::positions::{PositionKey, TxidByPositionPartition};
use wallet_db::{Txid, WalletId};

pub const MAX_PAGE_LIMIT: usize = 500;
pub const DEFAULT_PAGE_LIMIT: usize = 10;

/// Raw, unvalidated range parameters as received from a caller. Absent
/// height/sequence means "from the latest position".
#[derive(Debug, Clone, Copy, Default)]
pub struct RangeParams {
    pub height: Option<i64>,
    pub sequence: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeQuery {
    pub height: u32,
    pub sequence: u32,
    pub limit: usize,
}

impl RangeParams {
    pub fn validate(&self) -> Result<RangeQuery, ValidationError> {
        let limit = match self.limit {
            None => DEFAULT_PAGE_LIMIT,
            Some(limit) if limit <= 0 => return Err(ValidationError::NonPositiveLimit),
            Some(limit) if limit as usize > MAX_PAGE_LIMIT => {
                return Err(ValidationError::LimitTooLarge(limit))
            }
            Some(limit) => limit as usize,
        };
        let height = match self.height {
            None => u32::MAX,
            Some(height) => u32::try_from(height)
                .map_err(|_| ValidationError::HeightOutOfRange(height))?,
        };
        let sequence = match self.sequence {
            None => u32::MAX,
            Some(sequence) => u32::try_from(sequence)
                .map_err(|_| ValidationError::SequenceOutOfRange(sequence))?,
        };
        Ok(RangeQuery {
            height,
            sequence,
            limit,
        })
    }
}

/// A point in a wallet's history, ordered by block height and then by the
/// intra-block sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub height: u32,
    pub sequence: u32,
}

impl From<&PositionKey> for Position {
    fn from(key: &PositionKey) -> Self {
        Self {
            height: key.height(),
            sequence: key.sequence(),
        }
    }
}

/// One page of txids in descending position order. `end` is present only
/// when more (lower) positions exist; it is the next page's start, so
/// following it pages through the wallet exhaustively without overlap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TxidPage {
    pub txids: Vec<Txid>,
    pub start: Position,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<Position>,
}

/// Reverse keyset pagination over the position index: anchor at the seek
/// target, then walk backward collecting up to `limit` txids.
pub fn list_positions(
    partition: &TxidByPositionPartition,
    rtx: &ReadTransaction,
    wallet_id: WalletId,
    query: &RangeQuery,
) -> Result<TxidPage, HistoryError> {
    let start_key = PositionKey::new(wallet_id, query.height, query.sequence);
    let mut iter = partition.scan_backward_from(rtx, &start_key)?;

    let mut txids = Vec::with_capacity(query.limit.min(64));
    while txids.len() < query.limit {
        match iter.next() {
            Some(item) => {
                let (_, txid) = item?;
                txids.push(txid);
            }
            None => break,
        }
    }

    let mut end = None;
    if txids.len() == query.limit {
        if let Some(item) = iter.next() {
            let (key, _) = item?;
            end = Some(Position::from(&key));
        }
    }

    Ok(TxidPage {
        txids,
        start: Position {
            height: query.height,
            sequence: query.sequence,
        },
        end,
    })
}
