use crate::fetcher::UpstreamError;
use crate::writer_client::WriterError;

/// Request rejected before any store or collaborator access.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("limit must be a positive integer")]
    NonPositiveLimit,
    #[error("limit {0} exceeds maximum {max}", max = crate::pagination::MAX_PAGE_LIMIT)]
    LimitTooLarge(i64),
    #[error("height {0} is outside 0..={max}", max = u32::MAX)]
    HeightOutOfRange(i64),
    #[error("sequence {0} is outside 0..={max}", max = u32::MAX)]
    SequenceOutOfRange(i64),
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("no addresses provided")]
    EmptyAddressList,
}

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error(transparent)]
    Writer(#[from] WriterError),
    #[error("store failure: {0}")]
    Store(anyhow::Error),
}

impl From<anyhow::Error> for HistoryError {
    fn from(err: anyhow::Error) -> Self {
        Self::Store(err)
    }
}
