//! HTTP server implementation using Axum.

use std::sync::Arc;

use axum::{
    extract::State,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use facturio_core::config::FacturioConfig;
use facturio_core::error::Result;
use facturio_engine::{BillingCycleGenerator, DailyRunner, DispatchWorker, ReminderOrchestrator};

/// Shared state for the gateway server.
#[derive(Clone)]
pub struct AppState {
    /// Full config; each daily run snapshots the sections it reads.
    pub config: FacturioConfig,
    pub runner: Arc<DailyRunner>,
    pub generator: Arc<BillingCycleGenerator>,
    pub orchestrator: Arc<ReminderOrchestrator>,
    pub worker: Arc<DispatchWorker>,
    pub start_time: std::time::Instant,
}

/// Bearer-secret auth middleware. An empty configured secret allows all
/// (local development only); otherwise the Authorization header must be
/// exactly `Bearer <secret>`.
async fn require_trigger_secret(
    State(state): State<Arc<AppState>>,
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let expected = &state.config.gateway.trigger_secret;
    if expected.is_empty() {
        return next.run(req).await;
    }

    let presented = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");
    if presented == expected {
        return next.run(req).await;
    }

    tracing::warn!("🚫 Rejected request to {} — bad trigger secret", req.uri().path());
    axum::response::Response::builder()
        .status(axum::http::StatusCode::UNAUTHORIZED)
        .header("Content-Type", "application/json")
        .body(axum::body::Body::from(
            serde_json::json!({"ok": false, "error": "Unauthorized — invalid or missing trigger secret"})
                .to_string(),
        ))
        .unwrap()
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    let shared = Arc::new(state);

    let protected = Router::new()
        .route("/api/v1/run/daily", post(super::routes::run_daily))
        .route("/api/v1/invoices/generate", post(super::routes::generate_invoice))
        .route("/api/v1/reminders/generate", post(super::routes::generate_reminders))
        .route("/api/v1/reminders/{id}/send", post(super::routes::send_reminder))
        .route("/api/v1/reminders/{id}/cancel", post(super::routes::cancel_reminder))
        .route_layer(axum::middleware::from_fn_with_state(
            shared.clone(),
            require_trigger_secret,
        ));

    let public = Router::new().route("/health", get(super::routes::health_check));

    Router::new()
        .merge(protected)
        .merge(public)
        .layer(
            CorsLayer::new()
                .allow_methods(Any)
                .allow_headers(Any)
                .allow_origin(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

/// Start the HTTP server.
pub async fn start(state: AppState) -> Result<()> {
    let addr = format!("{}:{}", state.config.gateway.host, state.config.gateway.port);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("🌐 Gateway listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
