//! creator-ledger HTTP Server
//!
//! Axum-based server exposing revenue accrual, payout requests,
//! balance queries and the processor webhook.

mod handlers;
mod state;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post, put},
};
use tokio::sync::broadcast::error::RecvError;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use creator_ledger::{
    HttpPayoutProcessor, HttpProcessorConfig, LedgerConfig, LedgerService, MockPayoutProcessor,
    PayoutProcessor,
};

use crate::handlers::{
    apply_verification, begin_verification, get_balance, get_eligibility, health_check,
    link_account, list_payouts, list_revenue, processor_webhook, record_revenue, request_payout,
    stale_payouts,
};
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        // Creator API
        .route(
            "/api/creators/{id}/revenue",
            post(record_revenue).get(list_revenue),
        )
        .route("/api/creators/{id}/verification/begin", post(begin_verification))
        .route("/api/creators/{id}/verification", post(apply_verification))
        .route("/api/creators/{id}/account", put(link_account))
        .route(
            "/api/creators/{id}/payouts",
            post(request_payout).get(list_payouts),
        )
        .route("/api/creators/{id}/balance", get(get_balance))
        .route("/api/creators/{id}/eligibility", get(get_eligibility))
        // Operators
        .route("/api/admin/payouts/stale", get(stale_payouts))
        // Processor
        .route("/webhook/processor", post(processor_webhook))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn build_processor() -> anyhow::Result<Arc<dyn PayoutProcessor>> {
    match HttpProcessorConfig::from_env() {
        Some(config) => {
            tracing::info!(base_url = %config.base_url, "✓ Payout processor configured");
            Ok(Arc::new(HttpPayoutProcessor::new(config)?))
        }
        None => {
            tracing::warn!("⚠ PROCESSOR_BASE_URL not set - using mock payout processor");
            Ok(Arc::new(MockPayoutProcessor::new()))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = LedgerConfig::from_env()?;
    if config.webhook_secret.is_none() {
        tracing::warn!("⚠ PROCESSOR_WEBHOOK_SECRET not set - webhooks disabled");
    }

    let processor = build_processor()?;
    let service = Arc::new(LedgerService::in_memory(processor, config));

    let mut notices = service.reconciler.subscribe();
    tokio::spawn(async move {
        loop {
            match notices.recv().await {
                Ok(notice) => tracing::info!(
                    payout_id = %notice.payout_id,
                    creator_id = %notice.creator_id,
                    from = ?notice.from,
                    to = ?notice.to,
                    amount = %notice.amount,
                    "Payout status changed"
                ),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Payout notice logger lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let app = router(AppState { service });

    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("🚀 creator-ledger server running on http://{}", addr);
    tracing::info!("  POST /api/creators/{{id}}/revenue  - Record revenue event");
    tracing::info!("  POST /api/creators/{{id}}/payouts  - Request payout");
    tracing::info!("  GET  /api/creators/{{id}}/balance  - Balance");
    tracing::info!("  POST /webhook/processor          - Processor webhook");

    axum::serve(listener, app).await?;

    Ok(())
}
