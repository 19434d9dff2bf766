//! Request plumbing shared by every handler: principal extraction, error
//! responses and the blocking bridge into the ledger.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequestParts},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::{error, warn};

use ladder_ledger::{AccountId, ErrorKind, Ledger, LedgerError, LedgerResult, Principal, Role};

pub const ACCOUNT_ID_HEADER: &str = "x-account-id";
pub const ACCOUNT_ROLE_HEADER: &str = "x-account-role";

// ════════════════════════════════════════════════════════════════════════════
// PRINCIPAL
// ════════════════════════════════════════════════════════════════════════════

/// Principal attached by the upstream auth layer.
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedPrincipal(pub Principal);

/// 401 rejection for missing or malformed identity headers.
#[derive(Debug)]
pub struct Unauthorized(String);

impl IntoResponse for Unauthorized {
    fn into_response(self) -> Response {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": self.0, "code": "unauthorized" })),
        )
            .into_response()
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Result<&'a str, Unauthorized> {
    parts
        .headers
        .get(name)
        .ok_or_else(|| Unauthorized(format!("missing {} header", name)))?
        .to_str()
        .map_err(|_| Unauthorized(format!("malformed {} header", name)))
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for AuthenticatedPrincipal {
    type Rejection = Unauthorized;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id: u64 = header(parts, ACCOUNT_ID_HEADER)?
            .trim()
            .parse()
            .map_err(|_| Unauthorized(format!("malformed {} header", ACCOUNT_ID_HEADER)))?;
        let role: Role = header(parts, ACCOUNT_ROLE_HEADER)?
            .parse()
            .map_err(|_| Unauthorized(format!("malformed {} header", ACCOUNT_ROLE_HEADER)))?;
        Ok(AuthenticatedPrincipal(Principal::new(AccountId(id), role)))
    }
}

// ════════════════════════════════════════════════════════════════════════════
// ERRORS
// ════════════════════════════════════════════════════════════════════════════

/// Ledger error rendered as `{ "message", "code" }`.
#[derive(Debug)]
pub struct ApiError(pub LedgerError);

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        ApiError(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError(LedgerError::Validation(rejection.body_text()))
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::AlreadyProcessed | ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Forbidden | ErrorKind::BusinessRule => StatusCode::FORBIDDEN,
        ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let message = match kind {
            ErrorKind::Internal => {
                error!(error = %self.0, "request failed");
                "internal error".to_string()
            }
            ErrorKind::Validation | ErrorKind::NotFound => self.0.to_string(),
            _ => {
                warn!(code = kind.code(), error = %self.0, "request refused");
                self.0.to_string()
            }
        };
        (
            status_for(kind),
            Json(json!({ "message": message, "code": kind.code() })),
        )
            .into_response()
    }
}

// ════════════════════════════════════════════════════════════════════════════
// BLOCKING BRIDGE
// ════════════════════════════════════════════════════════════════════════════

/// Run a ledger call on the blocking pool. LMDB write transactions block
/// the calling thread until the writer lock is free.
pub async fn blocking<T, F>(ledger: &Arc<Ledger>, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&Ledger) -> LedgerResult<T> + Send + 'static,
{
    let ledger = Arc::clone(ledger);
    tokio::task::spawn_blocking(move || f(&ledger))
        .await
        .map_err(|e| ApiError(LedgerError::Internal(format!("ledger task failed: {}", e))))?
        .map_err(ApiError)
}

/// Current Unix time in seconds.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(ErrorKind::Validation), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorKind::BusinessRule), StatusCode::FORBIDDEN);
        assert_eq!(status_for(ErrorKind::AlreadyProcessed), StatusCode::CONFLICT);
        assert_eq!(status_for(ErrorKind::RateLimited), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn test_internal_detail_is_masked() {
        let resp = ApiError(LedgerError::Internal("disk on fire".into())).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
