use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;
use wallet_ipc::TaskErrorKind;
use wallet_service::{HistoryError, UpstreamError, WriterError};

pub mod v1;

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn error_response(status: StatusCode, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
}

pub fn map_writer_error(err: WriterError) -> ApiError {
    match err {
        WriterError::Task { kind, message } => {
            let status = match kind {
                TaskErrorKind::UnknownWallet => StatusCode::NOT_FOUND,
                TaskErrorKind::InvalidParams => StatusCode::BAD_REQUEST,
                TaskErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            };
            error_response(status, message)
        }
        other => error_response(StatusCode::BAD_GATEWAY, other.to_string()),
    }
}

pub fn map_history_error(err: HistoryError) -> ApiError {
    match err {
        HistoryError::Validation(err) => error_response(StatusCode::BAD_REQUEST, err.to_string()),
        HistoryError::Upstream(UpstreamError::NotFound(txid)) => error_response(
            StatusCode::BAD_GATEWAY,
            format!("transaction {txid} not found upstream"),
        ),
        HistoryError::Upstream(err) => error_response(StatusCode::BAD_GATEWAY, err.to_string()),
        HistoryError::Writer(err) => map_writer_error(err),
        HistoryError::Store(err) => {
            tracing::error!(%err, "store failure");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writer_task_errors_map_by_kind() {
        let (status, _) = map_writer_error(WriterError::Task {
            kind: TaskErrorKind::UnknownWallet,
            message: "unknown wallet".into(),
        });
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = map_writer_error(WriterError::Task {
            kind: TaskErrorKind::InvalidParams,
            message: "empty address".into(),
        });
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = map_writer_error(WriterError::Task {
            kind: TaskErrorKind::Internal,
            message: "store failure".into(),
        });
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

        let (status, _) = map_writer_error(WriterError::ConnectionClosed);
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }
}
