use crate::api::v1::wallets::WalletApi;
use crate::api::v1::Api;
use crate::config::{get_server_config, Role};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::FmtSubscriber;
use wallet_db::fjall::Config;
use wallet_service::{
    BitcoindRpcFetcher, HistoryService, WriterClient, WriterServer, WriterStore,
};

mod api;
mod config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    let config = get_server_config()?;
    info!(role = ?config.role, db_root = ?config.wallet_db_root, "starting");

    std::fs::create_dir_all(&config.wallet_db_root)?;
    let tx_keyspace = Config::new(&config.wallet_db_root).open_transactional()?;

    let mut writer_handle = None;
    let mut shutdown_writer_tx = None;
    if matches!(config.role, Role::Writer | Role::All) {
        let store = WriterStore::new(&tx_keyspace)?;
        let server = WriterServer::new(
            store,
            &config.writer_socket,
            Duration::from_secs(config.writer_max_wait_secs),
        );
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        shutdown_writer_tx = Some(shutdown_tx);
        writer_handle = Some(tokio::spawn(server.serve(shutdown_rx)));
    }

    let mut api_handle = None;
    let mut shutdown_api_tx = None;
    if matches!(config.role, Role::Web | Role::All) {
        let writer_timeout = Duration::from_secs(config.writer_timeout_secs);
        let writer_client = connect_writer(&config.writer_socket, writer_timeout).await?;

        let auth = match (&config.bitcoind_user, &config.bitcoind_password) {
            (Some(user), Some(password)) => Some((user.clone(), password.clone())),
            _ => None,
        };
        let fetcher = BitcoindRpcFetcher::new(
            &config.bitcoind_url,
            auth,
            Duration::from_secs(config.upstream_timeout_secs),
        )?;
        let history = Arc::new(HistoryService::new(
            &tx_keyspace,
            fetcher,
            writer_client.clone(),
        )?);

        let api = Api::new(WalletApi::new(history, writer_client));
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        shutdown_api_tx = Some(shutdown_tx);
        let listen = config.api_listen.clone();
        api_handle = Some(tokio::spawn(
            async move { api.serve(&listen, shutdown_rx).await },
        ));
    }

    tokio::signal::ctrl_c().await?;
    info!("Termination signal received. Shutting down...");

    if let Some(shutdown) = shutdown_api_tx {
        _ = shutdown
            .send(())
            .inspect_err(|_err| error!("failed to shutdown api server"));
    }
    if let Some(handle) = api_handle {
        _ = handle.await?.inspect(|_| info!("api server has stopped"));
    }

    if let Some(shutdown) = shutdown_writer_tx {
        _ = shutdown
            .send(())
            .inspect_err(|_err| error!("failed to shutdown writer"));
    }
    if let Some(handle) = writer_handle {
        _ = handle.await?.inspect(|_| info!("writer has stopped"));
    }

    info!("All tasks shut down.");
    Ok(())
}

/// The writer binds its socket on startup; when both roles run in one
/// process the client may race it, so retry briefly before giving up.
async fn connect_writer(
    socket_path: &std::path::Path,
    timeout: Duration,
) -> anyhow::Result<WriterClient> {
    let mut attempts = 0;
    loop {
        match WriterClient::connect(socket_path, timeout).await {
            Ok(client) => return Ok(client),
            Err(err) if attempts < 50 => {
                attempts += 1;
                tokio::time::sleep(Duration::from_millis(100)).await;
                if attempts % 10 == 0 {
                    info!(%err, ?socket_path, "waiting for writer socket");
                }
            }
            Err(err) => {
                return Err(anyhow::anyhow!(
                    "failed to connect to writer at {socket_path:?}: {err}"
                ))
            }
        }
    }
}
