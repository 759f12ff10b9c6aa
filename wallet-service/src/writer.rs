use serde_json::Value;
use std::cmp::Reverse;
use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use anyhow::Context;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};
use wallet_db::fjall::TxKeyspace;
use wallet_db::transactions::{WalletTransactionPartition, WalletTxKey};
use wallet_db::wallets::{WalletAddressesPartition, WalletsPartition};
use wallet_db::WalletId;
use wallet_ipc::{encode_frame, FrameDecoder, Task, TaskEnvelope, TaskErrorKind, TaskResponse};

/// Task rejection with a machine-readable kind, so callers map outcomes
/// without parsing the message text.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("unknown wallet {0}")]
    UnknownWallet(WalletId),
    #[error("invalid task params: {0}")]
    Invalid(String),
    #[error("store failure: {0}")]
    Store(anyhow::Error),
}

impl TaskError {
    pub fn kind(&self) -> TaskErrorKind {
        match self {
            TaskError::UnknownWallet(_) => TaskErrorKind::UnknownWallet,
            TaskError::Invalid(_) => TaskErrorKind::InvalidParams,
            TaskError::Store(_) => TaskErrorKind::Internal,
        }
    }
}

impl From<anyhow::Error> for TaskError {
    fn from(err: anyhow::Error) -> Self {
        Self::Store(err)
    }
}

/// The single mutator of the wallet partitions. Each task is applied in
/// its own committed write transaction, so a crash never leaves a task
/// half-applied.
#[derive(Clone)]
pub struct WriterStore {
    keyspace: TxKeyspace,
    wallets: WalletsPartition,
    addresses: WalletAddressesPartition,
    transactions: WalletTransactionPartition,
}

impl WriterStore {
    pub fn new(keyspace: &TxKeyspace) -> anyhow::Result<Self> {
        Ok(Self {
            keyspace: keyspace.clone(),
            wallets: WalletsPartition::new(keyspace)?,
            addresses: WalletAddressesPartition::new(keyspace)?,
            transactions: WalletTransactionPartition::new(keyspace)?,
        })
    }

    pub fn apply(&self, task: &Task) -> Result<Value, TaskError> {
        match task {
            Task::SaveTransaction(wallet_id, transaction) => {
                let mut wtx = self.keyspace.write_tx().map_err(anyhow::Error::from)?;
                let key = WalletTxKey::new(*wallet_id, transaction.txid);
                self.transactions.insert_wtx(&mut wtx, &key, transaction)?;
                commit(wtx)?;
                Ok(Value::String(transaction.txid.to_string()))
            }
            Task::ImportWalletAddresses(wallet_id, addresses) => {
                if addresses.iter().any(|address| address.is_empty()) {
                    return Err(TaskError::Invalid("empty address".into()));
                }
                let mut wtx = self.keyspace.write_tx().map_err(anyhow::Error::from)?;
                if !self.wallets.contains_wtx(&mut wtx, wallet_id)? {
                    return Err(TaskError::UnknownWallet(*wallet_id));
                }
                let added = self.addresses.import_wtx(&mut wtx, wallet_id, addresses)?;
                commit(wtx)?;
                Ok(serde_json::to_value(added).map_err(anyhow::Error::from)?)
            }
            Task::CreateWallet(wallet_id) => {
                let mut wtx = self.keyspace.write_tx().map_err(anyhow::Error::from)?;
                let created = self.wallets.create_wtx(&mut wtx, wallet_id)?;
                commit(wtx)?;
                if created {
                    Ok(Value::String(wallet_id.to_string()))
                } else {
                    Ok(Value::Null)
                }
            }
        }
    }
}

fn commit(wtx: wallet_db::fjall::WriteTransaction) -> Result<(), TaskError> {
    wtx.commit()
        .map_err(anyhow::Error::from)?
        .map_err(anyhow::Error::from)?;
    Ok(())
}

/// Priority queue with bounded waiting: higher priority is served first,
/// ties in arrival order, and any task that has waited longer than
/// `max_wait` is served next regardless of priority so a stream of urgent
/// tasks cannot starve the cheap ones.
pub struct TaskScheduler<T> {
    queue: BTreeMap<(Reverse<u8>, u64), (Instant, T)>,
    arrivals: VecDeque<(Reverse<u8>, u64)>,
    next_seq: u64,
    max_wait: Duration,
}

impl<T> TaskScheduler<T> {
    pub fn new(max_wait: Duration) -> Self {
        Self {
            queue: BTreeMap::new(),
            arrivals: VecDeque::new(),
            next_seq: 0,
            max_wait,
        }
    }

    pub fn push(&mut self, priority: u8, item: T) {
        let key = (Reverse(priority), self.next_seq);
        self.next_seq += 1;
        self.queue.insert(key, (Instant::now(), item));
        self.arrivals.push_back(key);
    }

    pub fn pop(&mut self) -> Option<T> {
        // Arrival records of already-served tasks are dropped lazily.
        while let Some(key) = self.arrivals.front() {
            if self.queue.contains_key(key) {
                break;
            }
            self.arrivals.pop_front();
        }
        if let Some(key) = self.arrivals.front().copied() {
            let overdue = self
                .queue
                .get(&key)
                .is_some_and(|(enqueued_at, _)| enqueued_at.elapsed() >= self.max_wait);
            if overdue {
                self.arrivals.pop_front();
                return self.queue.remove(&key).map(|(_, item)| item);
            }
        }
        self.queue.pop_first().map(|(_, (_, item))| item)
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

struct QueuedTask {
    envelope: TaskEnvelope,
    reply: flume::Sender<TaskResponse>,
}

/// Accepts worker connections on a unix socket, funnels their task
/// envelopes through one shared scheduler, and applies them one at a time
/// against the store.
pub struct WriterServer {
    store: WriterStore,
    socket_path: PathBuf,
    max_wait: Duration,
}

impl WriterServer {
    pub fn new(store: WriterStore, socket_path: impl Into<PathBuf>, max_wait: Duration) -> Self {
        Self {
            store,
            socket_path: socket_path.into(),
            max_wait,
        }
    }

    pub async fn serve(self, mut shutdown: oneshot::Receiver<()>) -> anyhow::Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)
                .with_context(|| format!("removing stale socket {:?}", self.socket_path))?;
        }
        let listener = UnixListener::bind(&self.socket_path)
            .with_context(|| format!("binding writer socket {:?}", self.socket_path))?;
        info!(path = ?self.socket_path, "writer listening");

        let (intake_tx, intake_rx) = flume::unbounded::<QueuedTask>();
        let drain = tokio::spawn(drain_queue(self.store.clone(), intake_rx, self.max_wait));
        let (conn_shutdown_tx, conn_shutdown_rx) = watch::channel(false);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("writer shutting down");
                    break;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => {
                            debug!("worker connected");
                            tokio::spawn(handle_connection(
                                stream,
                                intake_tx.clone(),
                                conn_shutdown_rx.clone(),
                            ));
                        }
                        Err(err) => {
                            error!(%err, "accept failed");
                        }
                    }
                }
            }
        }

        // Connection handlers hold intake senders while blocked on their
        // sockets; tell them to stop reading, then drop the last local
        // sender so the drain task finishes the backlog and exits.
        let _ = conn_shutdown_tx.send(true);
        drop(intake_tx);
        drain.await?;
        Ok(())
    }
}

/// Single consumer of the task queue. New arrivals are folded into the
/// scheduler before each pop so priorities take effect across connections.
async fn drain_queue(store: WriterStore, intake_rx: flume::Receiver<QueuedTask>, max_wait: Duration) {
    let mut scheduler = TaskScheduler::new(max_wait);
    loop {
        if scheduler.is_empty() {
            match intake_rx.recv_async().await {
                Ok(queued) => scheduler.push(queued.envelope.priority, queued),
                Err(_) => break,
            }
        }
        while let Ok(queued) = intake_rx.try_recv() {
            scheduler.push(queued.envelope.priority, queued);
        }
        let Some(queued) = scheduler.pop() else {
            continue;
        };
        let id = queued.envelope.id;
        let response = match store.apply(&queued.envelope.task) {
            Ok(result) => TaskResponse::ok(id, result),
            Err(err) => {
                warn!(%err, id, method = queued.envelope.task.method(), "task failed");
                TaskResponse::err(id, err.kind(), err.to_string())
            }
        };
        // The worker may have disconnected while the task was queued.
        let _ = queued.reply.send(response);
    }
}

async fn handle_connection(
    stream: UnixStream,
    intake_tx: flume::Sender<QueuedTask>,
    mut shutdown: watch::Receiver<bool>,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    let (reply_tx, reply_rx) = flume::unbounded::<TaskResponse>();

    let writer_loop = tokio::spawn(async move {
        while let Ok(response) = reply_rx.recv_async().await {
            let frame = match encode_frame(&response) {
                Ok(frame) => frame,
                Err(err) => {
                    error!(%err, "failed to encode response");
                    continue;
                }
            };
            if write_half.write_all(&frame).await.is_err() {
                break;
            }
        }
    });

    let mut decoder = FrameDecoder::new();
    let mut chunk = [0u8; 8192];
    'outer: loop {
        let n = tokio::select! {
            read = read_half.read(&mut chunk) => match read {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            },
            // The server is shutting down; stop holding an intake sender
            // so the drain loop can finish. `changed` also fires when the
            // server drops its end of the channel.
            _ = shutdown.changed() => break,
        };
        decoder.extend(&chunk[..n]);
        loop {
            match decoder.decode_next::<TaskEnvelope>() {
                Ok(Some(envelope)) => {
                    debug!(id = envelope.id, method = envelope.task.method(), "task received");
                    let queued = QueuedTask {
                        envelope,
                        reply: reply_tx.clone(),
                    };
                    if intake_tx.send(queued).is_err() {
                        break 'outer;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    // The byte stream is desynchronized, nothing after this
                    // point can be trusted.
                    warn!(%err, "framing error from worker, dropping connection");
                    break 'outer;
                }
            }
        }
    }

    drop(reply_tx);
    let _ = writer_loop.await;
    debug!("worker disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer_client::{WriterClient, WriterError};
    use tempfile::TempDir;
    use wallet_db::fjall::Config;
    use wallet_db::{Txid, WalletId, WalletTransaction};
    use wallet_ipc::IMPORT_ADDRESSES_PRIORITY;

    fn create_test_store() -> (TempDir, WriterStore) {
        let temp_dir = TempDir::new().unwrap();
        let keyspace = Config::new(temp_dir.path().join("db"))
            .open_transactional()
            .unwrap();
        let store = WriterStore::new(&keyspace).unwrap();
        (temp_dir, store)
    }

    #[test]
    fn test_scheduler_serves_higher_priority_first() {
        let mut scheduler = TaskScheduler::new(Duration::from_secs(3600));
        scheduler.push(1, "save");
        scheduler.push(20, "create");
        scheduler.push(10, "import");
        assert_eq!(scheduler.pop(), Some("create"));
        assert_eq!(scheduler.pop(), Some("import"));
        assert_eq!(scheduler.pop(), Some("save"));
        assert_eq!(scheduler.pop(), None);
    }

    #[test]
    fn test_scheduler_ties_are_fifo() {
        let mut scheduler = TaskScheduler::new(Duration::from_secs(3600));
        for i in 0..5 {
            scheduler.push(5, i);
        }
        for i in 0..5 {
            assert_eq!(scheduler.pop(), Some(i));
        }
    }

    #[test]
    fn test_scheduler_escalates_overdue_tasks() {
        // With a zero bound every task is immediately overdue, so the
        // scheduler degrades to pure arrival order.
        let mut scheduler = TaskScheduler::new(Duration::ZERO);
        scheduler.push(1, "first");
        scheduler.push(20, "second");
        assert_eq!(scheduler.pop(), Some("first"));
        assert_eq!(scheduler.pop(), Some("second"));
    }

    #[test]
    fn test_scheduler_len_tracks_queue() {
        let mut scheduler = TaskScheduler::new(Duration::from_secs(1));
        assert!(scheduler.is_empty());
        scheduler.push(1, ());
        scheduler.push(2, ());
        assert_eq!(scheduler.len(), 2);
        scheduler.pop();
        assert_eq!(scheduler.len(), 1);
    }

    #[test]
    fn test_apply_create_wallet_is_idempotent() {
        let (_temp_dir, store) = create_test_store();
        let wallet = WalletId([1u8; 32]);
        let first = store.apply(&Task::CreateWallet(wallet)).unwrap();
        assert_eq!(first, Value::String(wallet.to_string()));
        let second = store.apply(&Task::CreateWallet(wallet)).unwrap();
        assert_eq!(second, Value::Null);
    }

    #[test]
    fn test_apply_import_requires_existing_wallet() {
        let (_temp_dir, store) = create_test_store();
        let wallet = WalletId([2u8; 32]);
        let task = Task::ImportWalletAddresses(wallet, vec!["addr".into()]);
        assert!(matches!(
            store.apply(&task),
            Err(TaskError::UnknownWallet(id)) if id == wallet
        ));

        store.apply(&Task::CreateWallet(wallet)).unwrap();
        let added = store.apply(&task).unwrap();
        assert_eq!(added, serde_json::json!(["addr"]));
        // Reimporting reports nothing new.
        assert_eq!(store.apply(&task).unwrap(), serde_json::json!([]));
    }

    #[test]
    fn test_apply_save_transaction_returns_txid() {
        let (_temp_dir, store) = create_test_store();
        let wallet = WalletId([3u8; 32]);
        let transaction = WalletTransaction {
            txid: Txid([4u8; 32]),
            hex: "0200".into(),
            block_hash: Some("aa".repeat(32)),
            block_time: Some(1_700_000_000),
        };
        let task = Task::SaveTransaction(wallet, transaction.clone());
        let result = store.apply(&task).unwrap();
        assert_eq!(result, Value::String(transaction.txid.to_string()));
        // Saving again is a no-op, not an error.
        assert_eq!(store.apply(&task).unwrap(), result);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_server_round_trip_over_socket() {
        let (temp_dir, store) = create_test_store();
        let socket_path = temp_dir.path().join("writer.sock");
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let server = WriterServer::new(store, &socket_path, Duration::from_secs(30));
        let server_task = tokio::spawn(server.serve(shutdown_rx));

        // The listener may not be bound yet.
        let client = loop {
            match WriterClient::connect(&socket_path, Duration::from_secs(5)).await {
                Ok(client) => break client,
                Err(_) => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        };

        let wallet = WalletId([7u8; 32]);
        assert_eq!(client.create_wallet(wallet).await.unwrap(), Some(wallet));
        assert_eq!(client.create_wallet(wallet).await.unwrap(), None);

        let added = client
            .import_addresses(
                wallet,
                vec!["bc1qexample".into()],
                IMPORT_ADDRESSES_PRIORITY,
            )
            .await
            .unwrap();
        assert_eq!(added, vec!["bc1qexample".to_string()]);

        let unknown = WalletId([8u8; 32]);
        let outcome = client
            .import_addresses(unknown, vec!["x".into()], IMPORT_ADDRESSES_PRIORITY)
            .await;
        assert!(matches!(
            outcome,
            Err(WriterError::Task {
                kind: TaskErrorKind::UnknownWallet,
                ..
            })
        ));

        client
            .save_transaction(
                wallet,
                &WalletTransaction {
                    txid: Txid([9u8; 32]),
                    hex: "0100".into(),
                    block_hash: None,
                    block_time: None,
                },
            )
            .await
            .unwrap();

        shutdown_tx.send(()).unwrap();
        server_task.await.unwrap().unwrap();
    }

    #[test]
    fn test_apply_rejects_empty_address_as_invalid() {
        let (_temp_dir, store) = create_test_store();
        let wallet = WalletId([5u8; 32]);
        store.apply(&Task::CreateWallet(wallet)).unwrap();
        let task = Task::ImportWalletAddresses(wallet, vec![String::new()]);
        assert!(matches!(store.apply(&task), Err(TaskError::Invalid(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_shutdown_completes_while_workers_stay_connected() {
        let (temp_dir, store) = create_test_store();
        let socket_path = temp_dir.path().join("writer.sock");
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let server = WriterServer::new(store, &socket_path, Duration::from_secs(30));
        let server_task = tokio::spawn(server.serve(shutdown_rx));

        let client = loop {
            match WriterClient::connect(&socket_path, Duration::from_secs(5)).await {
                Ok(client) => break client,
                Err(_) => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        };
        let wallet = WalletId([6u8; 32]);
        assert_eq!(client.create_wallet(wallet).await.unwrap(), Some(wallet));

        // The client stays connected; shutdown must still finish.
        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), server_task)
            .await
            .expect("writer shutdown hung with a connected worker")
            .unwrap()
            .unwrap();

        // The connection was closed from the server side.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(matches!(
            client.create_wallet(wallet).await,
            Err(WriterError::ConnectionClosed | WriterError::Io(_))
        ));
    }
}
