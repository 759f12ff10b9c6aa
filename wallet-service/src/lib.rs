//! Wallet transaction history: reverse keyset pagination over the position
//! index, cache-miss backfill from the upstream node, and the task-queue
//! protocol that funnels every mutation through the single writer process.

pub mod error;
pub mod fetcher;
pub mod history;
pub mod pagination;
pub mod writer;
pub mod writer_client;

pub use error::{HistoryError, ValidationError};
pub use fetcher::{BitcoindRpcFetcher, TransactionFetcher, UpstreamError};
pub use history::{HistoryService, TransactionPage};
pub use pagination::{Position, RangeParams, TxidPage, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};
pub use writer::{TaskError, WriterServer, WriterStore};
pub use writer_client::{WriterClient, WriterError};
