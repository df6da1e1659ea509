//! HTTP mapping for ledger errors

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use votestore::{LedgerError, VoteResponse};

/// Ledger error rendered as a `{success: false, error}` envelope
#[derive(Debug)]
pub struct ApiError(pub LedgerError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(VoteResponse::failure(&self.0))).into_response()
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        ApiError(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError(LedgerError::InvalidRequest(format!(
            "Invalid request body: {}",
            rejection.body_text()
        )))
    }
}
