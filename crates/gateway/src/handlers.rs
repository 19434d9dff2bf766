//! HTTP handlers for the ladder gateway
//!
//! Each handler parses its input, hands the call to the ledger on the
//! blocking pool and serializes the row it gets back.
//!
//! ## Endpoints
//!
//! | Endpoint | Method | Caller |
//! |----------|--------|--------|
//! | `/surveys/select-plan` | POST | user |
//! | `/surveys/submit` | POST | user |
//! | `/surveys/progress` | GET | user |
//! | `/activation/submit` | POST | user |
//! | `/activation/:id/approve` | PATCH | admin |
//! | `/activation/:id/reject` | PATCH | admin |
//! | `/withdraw/request` | POST | user |
//! | `/withdraw/history` | GET | user |
//! | `/withdraw/admin/:id/approve` | PATCH | admin |
//! | `/withdraw/admin/:id/reject` | PATCH | admin |
//! | `/withdraw/admin/pending` | GET | admin |
//! | `/withdraw/admin/all` | GET | admin |
//! | `/admin/activations` | GET | admin |
//! | `/admin/activations/pending` | GET | admin |
//! | `/admin/accounts` | POST | admin |
//! | `/admin/accounts/:id/status` | PATCH | admin |
//! | `/admin/accounts/:id/adjust-balance` | POST | admin |
//! | `/account/me` | GET | user |

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use serde::Deserialize;

use ladder_ledger::{
    Account, AccountId, AccountSnapshot, AccountStatus, ActivationPayment, LedgerError, PaymentId,
    PaymentReceipt, PaymentStatus, Plan, PlanProgress, RequestId, SurveyOutcome, WithdrawRequest,
    WithdrawStatus,
};

use crate::api::{blocking, now_secs, ApiError, AuthenticatedPrincipal};
use crate::AppState;

type ApiResult<T> = Result<Json<T>, ApiError>;

// ════════════════════════════════════════════════════════════════════════════
// REQUEST TYPES
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
pub struct PlanReq {
    pub plan: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitPaymentReq {
    #[serde(alias = "mpesa_code")]
    pub reference: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NoteReq {
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WithdrawReq {
    #[serde(alias = "phone")]
    pub destination: String,
    pub amount: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusReq {
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdjustBalanceReq {
    pub delta: i64,
}

fn parse_plan(raw: &str) -> Result<Plan, ApiError> {
    raw.parse()
        .map_err(|e: String| ApiError(LedgerError::Validation(e)))
}

/// The admin note body is optional. Only a request sent without a JSON
/// body means "no note"; a body that fails to parse is refused.
fn optional_note(body: Result<Json<NoteReq>, JsonRejection>) -> Result<Option<String>, ApiError> {
    match body {
        Ok(Json(req)) => Ok(req.note),
        Err(JsonRejection::MissingJsonContentType(_)) => Ok(None),
        Err(rejection) => Err(rejection.into()),
    }
}

// ════════════════════════════════════════════════════════════════════════════
// SURVEYS
// ════════════════════════════════════════════════════════════════════════════

async fn select_plan_handler(
    State(state): State<Arc<AppState>>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    body: Result<Json<PlanReq>, JsonRejection>,
) -> ApiResult<PlanProgress> {
    let Json(req) = body?;
    let plan = parse_plan(&req.plan)?;
    let progress = blocking(&state.ledger, move |l| {
        l.select_plan(&principal, plan, now_secs())
    })
    .await?;
    Ok(Json(progress))
}

async fn submit_survey_handler(
    State(state): State<Arc<AppState>>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    body: Result<Json<PlanReq>, JsonRejection>,
) -> ApiResult<SurveyOutcome> {
    let Json(req) = body?;
    let plan = parse_plan(&req.plan)?;
    let outcome = blocking(&state.ledger, move |l| {
        l.submit_survey(&principal, plan, now_secs())
    })
    .await?;
    Ok(Json(outcome))
}

async fn progress_handler(
    State(state): State<Arc<AppState>>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
) -> ApiResult<Vec<PlanProgress>> {
    let rows = blocking(&state.ledger, move |l| l.plan_progress(&principal)).await?;
    Ok(Json(rows))
}

// ════════════════════════════════════════════════════════════════════════════
// ACTIVATION
// ════════════════════════════════════════════════════════════════════════════

async fn submit_payment_handler(
    State(state): State<Arc<AppState>>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    body: Result<Json<SubmitPaymentReq>, JsonRejection>,
) -> Result<(StatusCode, Json<PaymentReceipt>), ApiError> {
    let Json(req) = body?;
    let receipt = blocking(&state.ledger, move |l| {
        l.submit_payment(&principal, &req.reference, now_secs())
    })
    .await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

async fn approve_payment_handler(
    State(state): State<Arc<AppState>>,
    AuthenticatedPrincipal(admin): AuthenticatedPrincipal,
    Path(id): Path<u64>,
    body: Result<Json<NoteReq>, JsonRejection>,
) -> ApiResult<ActivationPayment> {
    let note = optional_note(body)?;
    let payment = blocking(&state.ledger, move |l| {
        l.approve_payment(&admin, PaymentId(id), note, now_secs())
    })
    .await?;
    Ok(Json(payment))
}

async fn reject_payment_handler(
    State(state): State<Arc<AppState>>,
    AuthenticatedPrincipal(admin): AuthenticatedPrincipal,
    Path(id): Path<u64>,
    body: Result<Json<NoteReq>, JsonRejection>,
) -> ApiResult<ActivationPayment> {
    let note = optional_note(body)?;
    let payment = blocking(&state.ledger, move |l| {
        l.reject_payment(&admin, PaymentId(id), note, now_secs())
    })
    .await?;
    Ok(Json(payment))
}

async fn list_activations_handler(
    State(state): State<Arc<AppState>>,
    AuthenticatedPrincipal(admin): AuthenticatedPrincipal,
) -> ApiResult<Vec<ActivationPayment>> {
    let rows = blocking(&state.ledger, move |l| l.list_activation_payments(&admin, None)).await?;
    Ok(Json(rows))
}

async fn pending_activations_handler(
    State(state): State<Arc<AppState>>,
    AuthenticatedPrincipal(admin): AuthenticatedPrincipal,
) -> ApiResult<Vec<ActivationPayment>> {
    let rows = blocking(&state.ledger, move |l| {
        l.list_activation_payments(&admin, Some(PaymentStatus::Submitted))
    })
    .await?;
    Ok(Json(rows))
}

// ════════════════════════════════════════════════════════════════════════════
// WITHDRAWALS
// ════════════════════════════════════════════════════════════════════════════

async fn request_withdraw_handler(
    State(state): State<Arc<AppState>>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    body: Result<Json<WithdrawReq>, JsonRejection>,
) -> Result<(StatusCode, Json<WithdrawRequest>), ApiError> {
    let Json(req) = body?;
    let request = blocking(&state.ledger, move |l| {
        l.request_withdraw(&principal, &req.destination, req.amount, now_secs())
    })
    .await?;
    Ok((StatusCode::CREATED, Json(request)))
}

async fn withdraw_history_handler(
    State(state): State<Arc<AppState>>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
) -> ApiResult<Vec<WithdrawRequest>> {
    let rows = blocking(&state.ledger, move |l| l.withdraw_history(&principal)).await?;
    Ok(Json(rows))
}

async fn approve_withdraw_handler(
    State(state): State<Arc<AppState>>,
    AuthenticatedPrincipal(admin): AuthenticatedPrincipal,
    Path(id): Path<u64>,
) -> ApiResult<WithdrawRequest> {
    let request = blocking(&state.ledger, move |l| {
        l.approve_withdraw(&admin, RequestId(id), now_secs())
    })
    .await?;
    Ok(Json(request))
}

async fn reject_withdraw_handler(
    State(state): State<Arc<AppState>>,
    AuthenticatedPrincipal(admin): AuthenticatedPrincipal,
    Path(id): Path<u64>,
) -> ApiResult<WithdrawRequest> {
    let request = blocking(&state.ledger, move |l| {
        l.reject_withdraw(&admin, RequestId(id), now_secs())
    })
    .await?;
    Ok(Json(request))
}

async fn pending_withdrawals_handler(
    State(state): State<Arc<AppState>>,
    AuthenticatedPrincipal(admin): AuthenticatedPrincipal,
) -> ApiResult<Vec<WithdrawRequest>> {
    let rows = blocking(&state.ledger, move |l| {
        l.list_withdraw_requests(&admin, Some(WithdrawStatus::Processing))
    })
    .await?;
    Ok(Json(rows))
}

async fn all_withdrawals_handler(
    State(state): State<Arc<AppState>>,
    AuthenticatedPrincipal(admin): AuthenticatedPrincipal,
) -> ApiResult<Vec<WithdrawRequest>> {
    let rows = blocking(&state.ledger, move |l| l.list_withdraw_requests(&admin, None)).await?;
    Ok(Json(rows))
}

// ════════════════════════════════════════════════════════════════════════════
// ACCOUNTS
// ════════════════════════════════════════════════════════════════════════════

async fn account_me_handler(
    State(state): State<Arc<AppState>>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
) -> ApiResult<AccountSnapshot> {
    let snapshot = blocking(&state.ledger, move |l| l.account_snapshot(&principal)).await?;
    Ok(Json(snapshot))
}

async fn register_account_handler(
    State(state): State<Arc<AppState>>,
    AuthenticatedPrincipal(admin): AuthenticatedPrincipal,
) -> Result<(StatusCode, Json<Account>), ApiError> {
    if !admin.is_admin() {
        return Err(ApiError(LedgerError::Forbidden("admin role required".into())));
    }
    let account = blocking(&state.ledger, move |l| l.register_account(now_secs())).await?;
    Ok((StatusCode::CREATED, Json(account)))
}

async fn set_status_handler(
    State(state): State<Arc<AppState>>,
    AuthenticatedPrincipal(admin): AuthenticatedPrincipal,
    Path(id): Path<u64>,
    body: Result<Json<StatusReq>, JsonRejection>,
) -> ApiResult<Account> {
    let Json(req) = body?;
    let status: AccountStatus = req
        .status
        .parse()
        .map_err(|e: String| ApiError(LedgerError::Validation(e)))?;
    let account = blocking(&state.ledger, move |l| {
        l.set_account_status(&admin, AccountId(id), status, now_secs())
    })
    .await?;
    Ok(Json(account))
}

async fn adjust_balance_handler(
    State(state): State<Arc<AppState>>,
    AuthenticatedPrincipal(admin): AuthenticatedPrincipal,
    Path(id): Path<u64>,
    body: Result<Json<AdjustBalanceReq>, JsonRejection>,
) -> ApiResult<Account> {
    let Json(req) = body?;
    let account = blocking(&state.ledger, move |l| {
        l.adjust_balance(&admin, AccountId(id), req.delta, now_secs())
    })
    .await?;
    Ok(Json(account))
}

// ════════════════════════════════════════════════════════════════════════════
// ROUTER
// ════════════════════════════════════════════════════════════════════════════

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/surveys/select-plan", post(select_plan_handler))
        .route("/surveys/submit", post(submit_survey_handler))
        .route("/surveys/progress", get(progress_handler))
        .route("/activation/submit", post(submit_payment_handler))
        .route("/activation/:id/approve", patch(approve_payment_handler))
        .route("/activation/:id/reject", patch(reject_payment_handler))
        .route("/withdraw/request", post(request_withdraw_handler))
        .route("/withdraw/history", get(withdraw_history_handler))
        .route("/withdraw/admin/pending", get(pending_withdrawals_handler))
        .route("/withdraw/admin/all", get(all_withdrawals_handler))
        .route("/withdraw/admin/:id/approve", patch(approve_withdraw_handler))
        .route("/withdraw/admin/:id/reject", patch(reject_withdraw_handler))
        .route("/admin/activations", get(list_activations_handler))
        .route("/admin/activations/pending", get(pending_activations_handler))
        .route("/admin/accounts", post(register_account_handler))
        .route("/admin/accounts/:id/status", patch(set_status_handler))
        .route("/admin/accounts/:id/adjust-balance", post(adjust_balance_handler))
        .route("/account/me", get(account_me_handler))
}

// ════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use ladder_ledger::{Ledger, LedgerConfig, Principal, Role};
    use serde_json::{json, Value};
    use tempfile::{tempdir, TempDir};
    use tower::ServiceExt;

    struct Harness {
        _dir: TempDir,
        ledger: Arc<Ledger>,
        app: Router,
    }

    fn harness() -> Harness {
        let dir = tempdir().unwrap();
        let config = LedgerConfig {
            data_dir: dir.path().to_string_lossy().into_owned(),
            map_size_bytes: 16 * 1024 * 1024,
            surveys_per_plan: 2,
            ..LedgerConfig::default()
        };
        let ledger = Arc::new(Ledger::open(config).unwrap());
        let state = Arc::new(AppState { ledger: Arc::clone(&ledger) });
        Harness {
            _dir: dir,
            ledger,
            app: routes().with_state(state),
        }
    }

    fn register(ledger: &Ledger, role: Role) -> Principal {
        let account = ledger.register_account(now_secs()).unwrap();
        Principal::new(account.id, role)
    }

    async fn call(
        app: &Router,
        method: Method,
        uri: &str,
        who: Option<&Principal>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(p) = who {
            let role = if p.is_admin() { "admin" } else { "user" };
            builder = builder
                .header("x-account-id", p.account_id.0.to_string())
                .header("x-account-role", role);
        }
        let req = match body {
            Some(v) => builder
                .header("content-type", "application/json")
                .body(Body::from(v.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_missing_identity_is_unauthorized() {
        let h = harness();
        let (status, body) = call(&h.app, Method::GET, "/account/me", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "unauthorized");
    }

    #[tokio::test]
    async fn test_survey_flow_over_http() {
        let h = harness();
        let user = register(&h.ledger, Role::User);

        let (status, body) = call(
            &h.app,
            Method::POST,
            "/surveys/submit",
            Some(&user),
            Some(json!({ "plan": "regular" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["completed"], false);

        let (_, body) = call(
            &h.app,
            Method::POST,
            "/surveys/submit",
            Some(&user),
            Some(json!({ "plan": "REGULAR" })),
        )
        .await;
        assert_eq!(body["completed"], true);
        assert_eq!(body["surveys_completed"], 2);
        assert_eq!(body["activation_required"], true);
        assert_eq!(body["earned"], 1500);

        let (status, body) = call(
            &h.app,
            Method::POST,
            "/surveys/submit",
            Some(&user),
            Some(json!({ "plan": "VIP" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "not_found");

        let (status, body) = call(
            &h.app,
            Method::POST,
            "/surveys/submit",
            Some(&user),
            Some(json!({ "plan": "gold" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "validation_error");
    }

    #[tokio::test]
    async fn test_activation_round_trip_over_http() {
        let h = harness();
        let admin = register(&h.ledger, Role::Admin);
        let user = register(&h.ledger, Role::User);
        for _ in 0..2 {
            h.ledger.submit_survey(&user, Plan::Regular, now_secs()).unwrap();
        }

        let (status, body) = call(
            &h.app,
            Method::POST,
            "/activation/submit",
            Some(&user),
            Some(json!({ "mpesa_code": "QK7H2LX9PD" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["payment"]["status"], "SUBMITTED");
        assert_eq!(body["current_plan"], "VIP");
        let id = body["payment"]["id"].as_u64().unwrap();

        let (_, pending) = call(&h.app, Method::GET, "/admin/activations/pending", Some(&admin), None).await;
        assert_eq!(pending.as_array().unwrap().len(), 1);

        let uri = format!("/activation/{}/approve", id);
        let (status, body) = call(&h.app, Method::PATCH, &uri, Some(&user), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "forbidden");

        let (status, body) = call(
            &h.app,
            Method::PATCH,
            &uri,
            Some(&admin),
            Some(json!({ "note": "verified" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "APPROVED");
        assert_eq!(body["admin_note"], "verified");

        let (status, body) = call(&h.app, Method::PATCH, &uri, Some(&admin), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "already_processed");
    }

    #[tokio::test]
    async fn test_withdraw_errors_over_http() {
        let h = harness();
        let admin = register(&h.ledger, Role::Admin);
        let user = register(&h.ledger, Role::User);

        let (status, body) = call(
            &h.app,
            Method::POST,
            "/withdraw/request",
            Some(&user),
            Some(json!({ "phone": "0712345678", "amount": 100 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "validation_error");

        let (status, body) = call(
            &h.app,
            Method::POST,
            "/withdraw/request",
            Some(&user),
            Some(json!({ "phone": "0712345678", "amount": 500 })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "business_rule");

        let uri = format!("/admin/accounts/{}/status", user.account_id.0);
        let (status, body) = call(
            &h.app,
            Method::PATCH,
            &uri,
            Some(&admin),
            Some(json!({ "status": "suspended" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "SUSPENDED");

        let (status, body) = call(
            &h.app,
            Method::POST,
            "/withdraw/request",
            Some(&user),
            Some(json!({ "destination": "0712345678", "amount": 500 })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "forbidden");
        assert_eq!(body["message"], "account is suspended");
    }

    #[tokio::test]
    async fn test_malformed_body_is_validation_error() {
        let h = harness();
        let user = register(&h.ledger, Role::User);
        let (status, body) = call(
            &h.app,
            Method::POST,
            "/withdraw/request",
            Some(&user),
            Some(json!({ "amount": "lots" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "validation_error");
    }

    #[tokio::test]
    async fn test_malformed_note_is_rejected() {
        let h = harness();
        let admin = register(&h.ledger, Role::Admin);
        let user = register(&h.ledger, Role::User);
        for _ in 0..2 {
            h.ledger.submit_survey(&user, Plan::Regular, now_secs()).unwrap();
        }
        let receipt = h.ledger.submit_payment(&user, "QK7H2LX9PD", now_secs()).unwrap();
        let id = receipt.payment.id;

        for action in ["approve", "reject"] {
            let uri = format!("/activation/{}/{}", id.0, action);
            let (status, body) = call(
                &h.app,
                Method::PATCH,
                &uri,
                Some(&admin),
                Some(json!({ "note": 42 })),
            )
            .await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["code"], "validation_error");
        }

        let stored = h.ledger.store().get_activation_payment(id).unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Submitted);
        assert_eq!(stored.admin_note, None);

        let uri = format!("/activation/{}/reject", id.0);
        let (status, body) = call(&h.app, Method::PATCH, &uri, Some(&admin), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "REJECTED");
    }

    #[tokio::test]
    async fn test_register_requires_admin() {
        let h = harness();
        let admin = register(&h.ledger, Role::Admin);
        let user = register(&h.ledger, Role::User);

        let (status, _) = call(&h.app, Method::POST, "/admin/accounts", Some(&user), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = call(&h.app, Method::POST, "/admin/accounts", Some(&admin), None).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["current_plan"], "REGULAR");
        assert_eq!(body["is_activated"], false);

        let (status, body) = call(&h.app, Method::GET, "/account/me", Some(&user), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["account"]["status"], "ACTIVE");
        assert_eq!(body["progress"].as_array().unwrap().len(), 1);
    }
}
