use crate::api::v1::wallets::WalletApi;
use axum::Router;
use std::net::SocketAddr;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tracing::error;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub mod wallets;

#[derive(OpenApi)]
#[openapi(
    paths(
        wallets::get_wallet_txids,
        wallets::get_wallet_transactions,
        wallets::create_wallet,
        wallets::import_address,
        wallets::import_addresses,
    ),
    components(
        schemas(
            wallets::TxidPageResponse,
            wallets::TransactionPageResponse,
            wallets::TransactionResponse,
            wallets::PositionResponse,
            wallets::ImportAddressesRequest,
            wallets::ImportedAddressesResponse,
            wallets::CreatedWalletResponse,
            crate::api::ErrorResponse,
        )
    ),
    tags(
        (name = "Wallet History API", description = "Wallet transaction history")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct Api {
    wallet_api: WalletApi,
}

impl Api {
    pub fn new(wallet_api: WalletApi) -> Self {
        Self { wallet_api }
    }

    pub async fn serve(
        self,
        bind_address: &str,
        shutdown: tokio::sync::oneshot::Receiver<()>,
    ) -> anyhow::Result<()> {
        let addr: SocketAddr = bind_address.parse()?;
        let app = self.router();
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Starting API server on {}", addr);
        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async move {
                _ = shutdown
                    .await
                    .inspect_err(|_err| error!("shutdown receive error"));
            })
            .await?;
        Ok(())
    }

    fn router(&self) -> Router {
        Router::new()
            .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
            .nest("/wallets", wallets::router())
            .layer(CompressionLayer::new())
            .layer(CorsLayer::permissive())
            .with_state(self.wallet_api.clone())
    }
}
