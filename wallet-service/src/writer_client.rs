use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use wallet_db::{WalletId, WalletTransaction};
use wallet_ipc::{
    encode_frame, FrameDecoder, FramingError, Task, TaskEnvelope, TaskErrorKind, TaskResponse,
    CREATE_WALLET_PRIORITY, SAVE_TRANSACTION_PRIORITY,
};

#[derive(Debug, thiserror::Error)]
pub enum WriterError {
    #[error("writer rejected task: {message}")]
    Task {
        kind: TaskErrorKind,
        message: String,
    },
    #[error("writer connection closed")]
    ConnectionClosed,
    #[error("timed out after {0:?} waiting for writer response")]
    Timeout(Duration),
    #[error("writer connection i/o: {0}")]
    Io(String),
    #[error(transparent)]
    Framing(#[from] FramingError),
    #[error("writer returned malformed result: {0}")]
    MalformedResult(String),
}

impl From<std::io::Error> for WriterError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

type PendingTable = HashMap<u64, oneshot::Sender<Result<Value, WriterError>>>;

struct Inner {
    next_id: AtomicU64,
    /// Outstanding task callbacks; `None` once the connection has failed,
    /// so later enqueues fail fast instead of hanging.
    pending: Mutex<Option<PendingTable>>,
    write_half: tokio::sync::Mutex<OwnedWriteHalf>,
    timeout: Duration,
}

/// Task-queue client owned by one worker process: encodes mutation intents,
/// tracks outstanding task ids, and demultiplexes writer responses back to
/// their callers.
#[derive(Clone)]
pub struct WriterClient {
    inner: Arc<Inner>,
}

impl WriterClient {
    pub async fn connect(path: impl AsRef<Path>, timeout: Duration) -> Result<Self, WriterError> {
        let stream = UnixStream::connect(path).await?;
        Ok(Self::from_stream(stream, timeout))
    }

    pub fn from_stream(stream: UnixStream, timeout: Duration) -> Self {
        let (read_half, write_half) = stream.into_split();
        let inner = Arc::new(Inner {
            next_id: AtomicU64::new(0),
            pending: Mutex::new(Some(HashMap::new())),
            write_half: tokio::sync::Mutex::new(write_half),
            timeout,
        });
        tokio::spawn(demux_responses(inner.clone(), read_half));
        Self { inner }
    }

    /// Sends one task envelope and suspends until the matching response
    /// arrives, the connection fails, or the per-task timeout fires.
    pub async fn enqueue(&self, task: Task, priority: u8) -> Result<Value, WriterError> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let envelope = TaskEnvelope { id, priority, task };
        let frame = encode_frame(&envelope)?;

        // Register before writing so a response can never race the table.
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.inner.pending.lock();
            match pending.as_mut() {
                Some(table) => {
                    table.insert(id, tx);
                }
                None => return Err(WriterError::ConnectionClosed),
            }
        }

        {
            let mut write_half = self.inner.write_half.lock().await;
            if let Err(err) = write_half.write_all(&frame).await {
                self.forget(id);
                return Err(err.into());
            }
        }

        match tokio::time::timeout(self.inner.timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(WriterError::ConnectionClosed),
            Err(_) => {
                // Synthesize the failure and drop the entry so the table
                // cannot grow without bound; a late response for this id
                // is discarded by the demux loop.
                self.forget(id);
                Err(WriterError::Timeout(self.inner.timeout))
            }
        }
    }

    pub async fn save_transaction(
        &self,
        wallet_id: WalletId,
        transaction: &WalletTransaction,
    ) -> Result<(), WriterError> {
        self.enqueue(
            Task::SaveTransaction(wallet_id, transaction.clone()),
            SAVE_TRANSACTION_PRIORITY,
        )
        .await?;
        Ok(())
    }

    /// Returns the addresses that were not yet tracked for the wallet.
    pub async fn import_addresses(
        &self,
        wallet_id: WalletId,
        addresses: Vec<String>,
        priority: u8,
    ) -> Result<Vec<String>, WriterError> {
        let result = self
            .enqueue(Task::ImportWalletAddresses(wallet_id, addresses), priority)
            .await?;
        serde_json::from_value(result).map_err(|err| WriterError::MalformedResult(err.to_string()))
    }

    /// Returns the wallet id if the wallet was newly created.
    pub async fn create_wallet(&self, wallet_id: WalletId) -> Result<Option<WalletId>, WriterError> {
        let result = self
            .enqueue(Task::CreateWallet(wallet_id), CREATE_WALLET_PRIORITY)
            .await?;
        serde_json::from_value(result).map_err(|err| WriterError::MalformedResult(err.to_string()))
    }

    fn forget(&self, id: u64) {
        if let Some(table) = self.inner.pending.lock().as_mut() {
            table.remove(&id);
        }
    }
}

/// Reads framed responses off the connection and completes the matching
/// pending entry, exactly once per id. Any connection-level failure
/// resolves every outstanding callback with a connection error.
async fn demux_responses(inner: Arc<Inner>, mut read_half: OwnedReadHalf) {
    let mut decoder = FrameDecoder::new();
    let mut chunk = [0u8; 8192];
    'outer: loop {
        let n = match read_half.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) => {
                warn!(%err, "writer connection read failed");
                break;
            }
        };
        decoder.extend(&chunk[..n]);
        loop {
            match decoder.decode_next::<TaskResponse>() {
                Ok(Some(response)) => complete(&inner, response),
                Ok(None) => break,
                Err(err) => {
                    // Undecodable inbound data: the stream offset is no
                    // longer trustworthy, treat the connection as failed.
                    warn!(%err, "framing error on writer connection");
                    break 'outer;
                }
            }
        }
    }

    let drained = inner.pending.lock().take();
    if let Some(table) = drained {
        for (_, tx) in table {
            let _ = tx.send(Err(WriterError::ConnectionClosed));
        }
    }
}

fn complete(inner: &Inner, response: TaskResponse) {
    let sender = inner
        .pending
        .lock()
        .as_mut()
        .and_then(|table| table.remove(&response.id));
    let Some(sender) = sender else {
        debug!(id = response.id, "discarding response for unknown task id");
        return;
    };
    let outcome = match response.error {
        Some(message) => Err(WriterError::Task {
            kind: response.error_kind.unwrap_or(TaskErrorKind::Internal),
            message,
        }),
        None => Ok(response.result.unwrap_or(Value::Null)),
    };
    let _ = sender.send(outcome);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::TempDir;
    use tokio::net::UnixListener;

    async fn socket_pair() -> (UnixStream, UnixStream) {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("writer.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let client = UnixStream::connect(&path).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    /// Echo writer that replies `result: null` to every envelope.
    async fn run_echo_writer(stream: UnixStream, observed_ids: flume::Sender<u64>) {
        let (mut read_half, mut write_half) = stream.into_split();
        let mut decoder = FrameDecoder::new();
        let mut chunk = [0u8; 8192];
        loop {
            let n = match read_half.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            };
            decoder.extend(&chunk[..n]);
            while let Some(envelope) = decoder.decode_next::<TaskEnvelope>().unwrap() {
                let _ = observed_ids.send(envelope.id);
                let frame =
                    encode_frame(&TaskResponse::ok(envelope.id, Value::Null)).unwrap();
                if write_half.write_all(&frame).await.is_err() {
                    return;
                }
            }
        }
    }

    #[tokio::test]
    async fn test_concurrent_enqueues_get_distinct_ids_and_own_results() {
        let (client_stream, server_stream) = socket_pair().await;
        let (ids_tx, ids_rx) = flume::unbounded();
        tokio::spawn(run_echo_writer(server_stream, ids_tx));
        let client = WriterClient::from_stream(client_stream, Duration::from_secs(5));

        let wallet = WalletId([1u8; 32]);
        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let client = client.clone();
                tokio::spawn(async move {
                    client
                        .enqueue(Task::CreateWallet(wallet), CREATE_WALLET_PRIORITY)
                        .await
                })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }

        let mut seen = HashSet::new();
        while let Ok(id) = ids_rx.try_recv() {
            assert!(seen.insert(id), "task id {id} reused");
        }
        assert_eq!(seen.len(), 32);
    }

    #[tokio::test]
    async fn test_unknown_response_id_is_discarded() {
        let (client_stream, server_stream) = socket_pair().await;
        let client = WriterClient::from_stream(client_stream, Duration::from_secs(5));

        let (mut read_half, mut write_half) = server_stream.into_split();
        let client_task = {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .enqueue(Task::CreateWallet(WalletId([2u8; 32])), 20)
                    .await
            })
        };

        let mut decoder = FrameDecoder::new();
        let mut chunk = [0u8; 8192];
        let envelope: TaskEnvelope = loop {
            let n = read_half.read(&mut chunk).await.unwrap();
            decoder.extend(&chunk[..n]);
            if let Some(envelope) = decoder.decode_next().unwrap() {
                break envelope;
            }
        };
        // A response nobody asked for, then the correct one.
        let stray = encode_frame(&TaskResponse::ok(999, Value::Null)).unwrap();
        write_half.write_all(&stray).await.unwrap();
        let frame = encode_frame(&TaskResponse::ok(envelope.id, Value::Bool(true))).unwrap();
        write_half.write_all(&frame).await.unwrap();

        let result = client_task.await.unwrap().unwrap();
        assert_eq!(result, Value::Bool(true));
    }

    #[tokio::test]
    async fn test_error_response_propagates_as_task_error() {
        let (client_stream, server_stream) = socket_pair().await;
        let client = WriterClient::from_stream(client_stream, Duration::from_secs(5));

        let (mut read_half, mut write_half) = server_stream.into_split();
        let client_task = {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .enqueue(Task::CreateWallet(WalletId([3u8; 32])), 20)
                    .await
            })
        };

        let mut decoder = FrameDecoder::new();
        let mut chunk = [0u8; 8192];
        let envelope: TaskEnvelope = loop {
            let n = read_half.read(&mut chunk).await.unwrap();
            decoder.extend(&chunk[..n]);
            if let Some(envelope) = decoder.decode_next().unwrap() {
                break envelope;
            }
        };
        let frame = encode_frame(&TaskResponse::err(
            envelope.id,
            TaskErrorKind::UnknownWallet,
            "unknown wallet",
        ))
        .unwrap();
        write_half.write_all(&frame).await.unwrap();

        match client_task.await.unwrap() {
            Err(WriterError::Task { kind, message }) => {
                assert_eq!(kind, TaskErrorKind::UnknownWallet);
                assert_eq!(message, "unknown wallet");
            }
            other => panic!("expected task error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_connection_close_fails_all_pending() {
        let (client_stream, server_stream) = socket_pair().await;
        let client = WriterClient::from_stream(client_stream, Duration::from_secs(5));

        let pending: Vec<_> = (0..4)
            .map(|_| {
                let client = client.clone();
                tokio::spawn(async move {
                    client
                        .enqueue(Task::CreateWallet(WalletId([4u8; 32])), 20)
                        .await
                })
            })
            .collect();
        // Give the enqueues a chance to register before the writer dies.
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(server_stream);

        for task in pending {
            assert!(matches!(
                task.await.unwrap(),
                Err(WriterError::ConnectionClosed)
            ));
        }
        // Later enqueues fail fast.
        assert!(matches!(
            client
                .enqueue(Task::CreateWallet(WalletId([4u8; 32])), 20)
                .await,
            Err(WriterError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_timeout_resolves_and_removes_the_entry() {
        let (client_stream, server_stream) = socket_pair().await;
        let client = WriterClient::from_stream(client_stream, Duration::from_millis(50));

        // Writer never answers.
        let result = client
            .enqueue(Task::CreateWallet(WalletId([5u8; 32])), 20)
            .await;
        assert!(matches!(result, Err(WriterError::Timeout(_))));
        assert!(client.inner.pending.lock().as_ref().unwrap().is_empty());
        drop(server_stream);
    }
}
