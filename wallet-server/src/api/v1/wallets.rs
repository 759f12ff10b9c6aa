use crate::api::{error_response, map_history_error, map_writer_error, ApiError, ErrorResponse};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::spawn_blocking;
use utoipa::{IntoParams, ToSchema};
use wallet_db::{WalletId, WalletTransaction};
use wallet_ipc::{IMPORT_ADDRESSES_PRIORITY, IMPORT_ADDRESS_PRIORITY};
use wallet_service::{
    BitcoindRpcFetcher, HistoryService, Position, RangeParams, TransactionPage, TxidPage,
    ValidationError, WriterClient,
};

#[derive(Clone)]
pub struct WalletApi {
    history: Arc<HistoryService<BitcoindRpcFetcher>>,
    writer: WriterClient,
}

impl WalletApi {
    pub fn new(history: Arc<HistoryService<BitcoindRpcFetcher>>, writer: WriterClient) -> Self {
        Self { history, writer }
    }
}

pub fn router() -> Router<WalletApi> {
    Router::new()
        .route("/{wallet_id}", put(create_wallet))
        .route("/{wallet_id}/txids", get(get_wallet_txids))
        .route("/{wallet_id}/transactions", get(get_wallet_transactions))
        .route("/{wallet_id}/addresses", post(import_addresses))
        .route("/{wallet_id}/addresses/{address}", put(import_address))
}

/// Pagination over the position index. Absent height/index means "from
/// the latest position".
#[derive(Debug, Deserialize, IntoParams)]
pub struct HistoryRangeParams {
    pub height: Option<i64>,
    pub index: Option<i64>,
    pub limit: Option<i64>,
}

impl From<&HistoryRangeParams> for RangeParams {
    fn from(params: &HistoryRangeParams) -> Self {
        Self {
            height: params.height,
            sequence: params.index,
            limit: params.limit,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PositionResponse {
    pub height: u32,
    pub index: u32,
}

impl From<Position> for PositionResponse {
    fn from(position: Position) -> Self {
        Self {
            height: position.height,
            index: position.sequence,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TxidPageResponse {
    pub txids: Vec<String>,
    pub start: PositionResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<PositionResponse>,
}

impl From<TxidPage> for TxidPageResponse {
    fn from(page: TxidPage) -> Self {
        Self {
            txids: page.txids.iter().map(|txid| txid.to_string()).collect(),
            start: page.start.into(),
            end: page.end.map(Into::into),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TransactionResponse {
    pub txid: String,
    pub hex: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_time: Option<u64>,
}

impl From<WalletTransaction> for TransactionResponse {
    fn from(transaction: WalletTransaction) -> Self {
        Self {
            txid: transaction.txid.to_string(),
            hex: transaction.hex,
            block_hash: transaction.block_hash,
            block_time: transaction.block_time,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TransactionPageResponse {
    pub transactions: Vec<TransactionResponse>,
    pub start: PositionResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<PositionResponse>,
}

impl From<TransactionPage> for TransactionPageResponse {
    fn from(page: TransactionPage) -> Self {
        Self {
            transactions: page.transactions.into_iter().map(Into::into).collect(),
            start: page.start.into(),
            end: page.end.map(Into::into),
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ImportAddressesRequest {
    pub addresses: Vec<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ImportedAddressesResponse {
    pub addresses: Vec<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CreatedWalletResponse {
    pub wallet_id: String,
}

fn parse_wallet_id(raw: &str) -> Result<WalletId, ApiError> {
    raw.parse().map_err(|err| {
        error_response(StatusCode::BAD_REQUEST, format!("invalid wallet id: {err}"))
    })
}

#[utoipa::path(
    get,
    path = "/wallets/{wallet_id}/txids",
    params(
        ("wallet_id" = String, Path, description = "Wallet id, 64 hex chars"),
        HistoryRangeParams,
    ),
    responses(
        (status = 200, description = "Txids in descending position order", body = TxidPageResponse),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn get_wallet_txids(
    State(state): State<WalletApi>,
    Path(wallet_id): Path<String>,
    Query(params): Query<HistoryRangeParams>,
) -> Result<impl IntoResponse, ApiError> {
    let wallet_id = parse_wallet_id(&wallet_id)?;
    let range = RangeParams::from(&params);
    let page = spawn_blocking(move || state.history.list_wallet_txids(wallet_id, &range))
        .await
        .map_err(|err| error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?
        .map_err(map_history_error)?;
    Ok(Json(TxidPageResponse::from(page)))
}

#[utoipa::path(
    get,
    path = "/wallets/{wallet_id}/transactions",
    params(
        ("wallet_id" = String, Path, description = "Wallet id, 64 hex chars"),
        HistoryRangeParams,
    ),
    responses(
        (status = 200, description = "Full transactions in descending position order", body = TransactionPageResponse),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 502, description = "Upstream node or writer unavailable", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn get_wallet_transactions(
    State(state): State<WalletApi>,
    Path(wallet_id): Path<String>,
    Query(params): Query<HistoryRangeParams>,
) -> Result<impl IntoResponse, ApiError> {
    let wallet_id = parse_wallet_id(&wallet_id)?;
    let range = RangeParams::from(&params);
    let page = state
        .history
        .get_wallet_transactions(wallet_id, &range)
        .await
        .map_err(map_history_error)?;
    Ok(Json(TransactionPageResponse::from(page)))
}

#[utoipa::path(
    put,
    path = "/wallets/{wallet_id}",
    params(("wallet_id" = String, Path, description = "Wallet id, 64 hex chars")),
    responses(
        (status = 201, description = "Wallet created", body = CreatedWalletResponse),
        (status = 204, description = "Wallet already existed"),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 502, description = "Writer unavailable", body = ErrorResponse)
    )
)]
pub async fn create_wallet(
    State(state): State<WalletApi>,
    Path(wallet_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let wallet_id = parse_wallet_id(&wallet_id)?;
    match state
        .writer
        .create_wallet(wallet_id)
        .await
        .map_err(map_writer_error)?
    {
        Some(created) => Ok((
            StatusCode::CREATED,
            Json(CreatedWalletResponse {
                wallet_id: created.to_string(),
            }),
        )
            .into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

#[utoipa::path(
    put,
    path = "/wallets/{wallet_id}/addresses/{address}",
    params(
        ("wallet_id" = String, Path, description = "Wallet id, 64 hex chars"),
        ("address" = String, Path, description = "Address to track"),
    ),
    responses(
        (status = 201, description = "Address newly tracked", body = ImportedAddressesResponse),
        (status = 200, description = "Address was already tracked", body = ImportedAddressesResponse),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 404, description = "Unknown wallet", body = ErrorResponse),
        (status = 502, description = "Writer unavailable", body = ErrorResponse)
    )
)]
pub async fn import_address(
    State(state): State<WalletApi>,
    Path((wallet_id, address)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let wallet_id = parse_wallet_id(&wallet_id)?;
    if address.is_empty() {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            ValidationError::InvalidAddress(address).to_string(),
        ));
    }
    let added = state
        .writer
        .import_addresses(wallet_id, vec![address], IMPORT_ADDRESS_PRIORITY)
        .await
        .map_err(map_writer_error)?;
    let status = if added.is_empty() {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(ImportedAddressesResponse { addresses: added })))
}

#[utoipa::path(
    post,
    path = "/wallets/{wallet_id}/addresses",
    params(("wallet_id" = String, Path, description = "Wallet id, 64 hex chars")),
    request_body = ImportAddressesRequest,
    responses(
        (status = 201, description = "Addresses newly tracked", body = ImportedAddressesResponse),
        (status = 204, description = "All addresses were already tracked"),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 404, description = "Unknown wallet", body = ErrorResponse),
        (status = 502, description = "Writer unavailable", body = ErrorResponse)
    )
)]
pub async fn import_addresses(
    State(state): State<WalletApi>,
    Path(wallet_id): Path<String>,
    Json(request): Json<ImportAddressesRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let wallet_id = parse_wallet_id(&wallet_id)?;
    if request.addresses.is_empty() {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            ValidationError::EmptyAddressList.to_string(),
        ));
    }
    let added = state
        .writer
        .import_addresses(wallet_id, request.addresses, IMPORT_ADDRESSES_PRIORITY)
        .await
        .map_err(map_writer_error)?;
    if added.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }
    Ok((
        StatusCode::CREATED,
        Json(ImportedAddressesResponse { addresses: added }),
    )
        .into_response())
}
