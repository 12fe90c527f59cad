//! HTTP Handlers

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use creator_ledger::{
    Account, Balance, CreatorId, Currency, Eligibility, ErrorKind, LedgerError, PayoutRequest,
    PayoutStatus, ProcessorNotification, ReconcileOutcome, RevenueEvent, RevenueSource,
    VerificationResult,
    webhook::{SIGNATURE_HEADER, verify_signature},
};

use crate::state::AppState;

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub processor: String,
    pub webhooks_configured: bool,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    pub detail: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

#[derive(Debug, Deserialize)]
pub struct RecordRevenueRequest {
    pub amount: Decimal,
    pub currency: Currency,
    pub source: RevenueSource,
    pub external_reference_id: String,
}

#[derive(Debug, Deserialize)]
pub struct VerificationResultRequest {
    pub result: VerificationResult,
}

#[derive(Debug, Deserialize)]
pub struct LinkAccountRequest {
    pub external_account_id: String,
}

#[derive(Debug, Deserialize)]
pub struct PayoutRequestBody {
    pub amount: Decimal,
    pub currency: Currency,
}

#[derive(Debug, Deserialize)]
pub struct PayoutListQuery {
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StaleQuery {
    #[serde(default)]
    pub older_than_secs: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub received: bool,
    pub outcome: &'static str,
}

// ============================================================================
// Error mapping
// ============================================================================

fn error_code(err: &LedgerError) -> &'static str {
    match err {
        LedgerError::InvalidAmount(_) => "INVALID_AMOUNT",
        LedgerError::InvalidCurrency(_) => "INVALID_CURRENCY",
        LedgerError::DuplicateEvent { .. } => "DUPLICATE_EVENT",
        LedgerError::CurrencyMismatch { .. } => "CURRENCY_MISMATCH",
        LedgerError::BelowMinimum { .. } => "BELOW_MINIMUM",
        LedgerError::TooManyPending { .. } => "TOO_MANY_PENDING",
        LedgerError::VerificationRequired(_) => "VERIFICATION_REQUIRED",
        LedgerError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
        LedgerError::ProcessorUnavailable(_) => "PROCESSOR_UNAVAILABLE",
        LedgerError::ProcessorRejected(_) => "PROCESSOR_REJECTED",
        LedgerError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
        LedgerError::PayoutNotFound(_) => "PAYOUT_NOT_FOUND",
        LedgerError::InvalidVerificationTransition { .. }
        | LedgerError::InvalidPayoutTransition { .. } => "INVALID_TRANSITION",
        LedgerError::WebhookSignature(_) => "INVALID_SIGNATURE",
        LedgerError::WebhookParse(_) => "INVALID_PAYLOAD",
        LedgerError::ReservationNotFound(_)
        | LedgerError::ReservationConflict(_)
        | LedgerError::Config(_)
        | LedgerError::Storage(_) => "INTERNAL_ERROR",
    }
}

fn status_for(err: &LedgerError) -> StatusCode {
    match err {
        LedgerError::WebhookSignature(_) | LedgerError::WebhookParse(_) => StatusCode::BAD_REQUEST,
        LedgerError::DuplicateEvent { .. } => StatusCode::CONFLICT,
        LedgerError::AccountNotFound(_) | LedgerError::PayoutNotFound(_) => StatusCode::NOT_FOUND,
        LedgerError::ProcessorUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        LedgerError::ProcessorRejected(_) => StatusCode::BAD_GATEWAY,
        _ => match err.kind() {
            ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::Eligibility | ErrorKind::Reconciliation => StatusCode::CONFLICT,
            ErrorKind::Processor => StatusCode::BAD_GATEWAY,
            ErrorKind::System => StatusCode::INTERNAL_SERVER_ERROR,
        },
    }
}

fn api_error(err: LedgerError) -> ApiError {
    let status = status_for(&err);
    if status.is_server_error() {
        tracing::error!(error = %err, "Request failed");
    } else {
        tracing::debug!(error = %err, "Request rejected");
    }

    (
        status,
        Json(ErrorResponse {
            error: err.user_message(),
            code: error_code(&err).into(),
            detail: err.to_string(),
        }),
    )
}

fn bad_request(code: &str, message: impl Into<String>) -> ApiError {
    let message = message.into();
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.clone(),
            code: code.into(),
            detail: message,
        }),
    )
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        processor: state.service.processor_name().to_string(),
        webhooks_configured: state.service.config.webhook_secret.is_some(),
    })
}

/// Accrue a revenue event (201 when new, 200 on an idempotent replay)
pub async fn record_revenue(
    State(state): State<AppState>,
    Path(creator_id): Path<String>,
    Json(payload): Json<RecordRevenueRequest>,
) -> Result<(StatusCode, Json<RevenueEvent>), ApiError> {
    let recorded = state
        .service
        .record_revenue_event(
            &CreatorId::new(creator_id),
            payload.amount,
            payload.currency,
            payload.source,
            payload.external_reference_id,
        )
        .map_err(api_error)?;

    let status = if recorded.replay { StatusCode::OK } else { StatusCode::CREATED };
    Ok((status, Json(recorded.event)))
}

/// Revenue history
pub async fn list_revenue(
    State(state): State<AppState>,
    Path(creator_id): Path<String>,
) -> Result<Json<Vec<RevenueEvent>>, ApiError> {
    state
        .service
        .query
        .list_events(&CreatorId::new(creator_id))
        .map(Json)
        .map_err(api_error)
}

pub async fn begin_verification(
    State(state): State<AppState>,
    Path(creator_id): Path<String>,
) -> Result<Json<Account>, ApiError> {
    state
        .service
        .verification
        .begin_verification(&CreatorId::new(creator_id))
        .map(Json)
        .map_err(api_error)
}

/// Result callback from the verification collaborator
pub async fn apply_verification(
    State(state): State<AppState>,
    Path(creator_id): Path<String>,
    Json(payload): Json<VerificationResultRequest>,
) -> Result<Json<Account>, ApiError> {
    state
        .service
        .verification
        .apply_verification_result(&CreatorId::new(creator_id), payload.result)
        .map(Json)
        .map_err(api_error)
}

pub async fn link_account(
    State(state): State<AppState>,
    Path(creator_id): Path<String>,
    Json(payload): Json<LinkAccountRequest>,
) -> Result<Json<Account>, ApiError> {
    if payload.external_account_id.trim().is_empty() {
        return Err(bad_request("INVALID_ACCOUNT", "external_account_id is required"));
    }

    state
        .service
        .verification
        .link_external_account(&CreatorId::new(creator_id), payload.external_account_id)
        .map(Json)
        .map_err(api_error)
}

pub async fn request_payout(
    State(state): State<AppState>,
    Path(creator_id): Path<String>,
    Json(payload): Json<PayoutRequestBody>,
) -> Result<(StatusCode, Json<PayoutRequest>), ApiError> {
    let payout = state
        .service
        .request_payout(&CreatorId::new(creator_id), payload.amount, payload.currency)
        .await
        .map_err(api_error)?;

    Ok((StatusCode::CREATED, Json(payout)))
}

pub async fn list_payouts(
    State(state): State<AppState>,
    Path(creator_id): Path<String>,
    Query(query): Query<PayoutListQuery>,
) -> Result<Json<Vec<PayoutRequest>>, ApiError> {
    let status = match query.status.as_deref() {
        None => None,
        Some(raw) => Some(
            PayoutStatus::parse(raw)
                .ok_or_else(|| bad_request("INVALID_STATUS", format!("unknown status {raw:?}")))?,
        ),
    };

    state
        .service
        .query
        .list_payouts(&CreatorId::new(creator_id), status)
        .map(Json)
        .map_err(api_error)
}

pub async fn get_balance(
    State(state): State<AppState>,
    Path(creator_id): Path<String>,
) -> Result<Json<Balance>, ApiError> {
    state
        .service
        .query
        .get_balance(&CreatorId::new(creator_id))
        .map(Json)
        .map_err(api_error)
}

pub async fn get_eligibility(
    State(state): State<AppState>,
    Path(creator_id): Path<String>,
) -> Result<Json<Eligibility>, ApiError> {
    state
        .service
        .query
        .get_eligibility(&CreatorId::new(creator_id))
        .map(Json)
        .map_err(api_error)
}

/// Operator audit: payouts stuck without a terminal status
pub async fn stale_payouts(
    State(state): State<AppState>,
    Query(query): Query<StaleQuery>,
) -> Result<Json<Vec<PayoutRequest>>, ApiError> {
    let older_than = match query.older_than_secs {
        None => state.service.config.stale_payout_after,
        Some(secs) => {
            let in_range = i64::try_from(secs)
                .ok()
                .and_then(chrono::TimeDelta::try_seconds)
                .and_then(|d| Utc::now().checked_sub_signed(d))
                .is_some();
            if !in_range {
                return Err(bad_request(
                    "INVALID_THRESHOLD",
                    format!("older_than_secs {secs} is out of range"),
                ));
            }
            Duration::from_secs(secs)
        }
    };

    state
        .service
        .query
        .stale_payouts(older_than)
        .map(Json)
        .map_err(api_error)
}

const fn outcome_label(outcome: &ReconcileOutcome) -> &'static str {
    match outcome {
        ReconcileOutcome::Duplicate => "duplicate",
        ReconcileOutcome::UnknownPayout => "unknown_payout",
        ReconcileOutcome::UnrecognizedStatus(_) => "unrecognized_status",
        ReconcileOutcome::Conflict(_) => "conflict",
        ReconcileOutcome::Ignored { .. } => "ignored",
        ReconcileOutcome::Applied { .. } => "applied",
        ReconcileOutcome::Recovered { .. } => "recovered",
    }
}

/// Payout processor webhook
pub async fn processor_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookResponse>, ApiError> {
    let config = &state.service.config;
    let secret = config.webhook_secret.as_deref().ok_or_else(|| {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: "Webhooks not configured".into(),
                code: "WEBHOOKS_DISABLED".into(),
                detail: "PROCESSOR_WEBHOOK_SECRET is not set".into(),
            }),
        )
    })?;

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| bad_request("MISSING_SIGNATURE", "Missing processor signature"))?;

    verify_signature(&body, signature, secret, config.webhook_tolerance, Utc::now()).map_err(|e| {
        tracing::warn!(error = %e, "Webhook signature failed");
        api_error(e)
    })?;

    let notification = ProcessorNotification::from_json(&body).map_err(api_error)?;
    let outcome = state
        .service
        .reconciler
        .handle_notification(&notification)
        .map_err(api_error)?;

    if outcome == ReconcileOutcome::UnknownPayout {
        // Not acknowledged, so the processor redelivers once our write lands
        return Err((
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: "Payout not yet known".into(),
                code: "PAYOUT_NOT_YET_KNOWN".into(),
                detail: format!("no payout with external id {}", notification.payout_id),
            }),
        ));
    }

    Ok(Json(WebhookResponse {
        received: true,
        outcome: outcome_label(&outcome),
    }))
}
