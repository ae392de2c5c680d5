//! HTTP/JSON status API.
//!
//! Read-only views of engine metrics, error statistics and risk state, plus
//! the operator controls: emergency stop, its reset, the risk circuit
//! breaker reset, and risk-gated order placement.

use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use crate::context::{PlaceOrderOutcome, TradingContext};
use crate::engine::{EngineMetrics, EngineState};
use crate::error::ApiError;
use crate::resilience::{EmergencyStatus, ErrorStats};
use crate::risk::{RiskStatus, TradeRequest, TradingMode};

/// Create the Axum router with all endpoints.
#[must_use]
pub fn create_router(ctx: TradingContext) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/metrics", get(engine_metrics))
        .route("/api/v1/errors", get(error_stats))
        .route("/api/v1/risk", get(risk_status))
        .route("/api/v1/risk/alerts/acknowledge", post(acknowledge_alerts))
        .route("/api/v1/risk/circuit-breaker/reset", post(reset_risk_breaker))
        .route("/api/v1/emergency-stop", post(trigger_emergency_stop))
        .route("/api/v1/emergency-stop/reset", post(reset_emergency_stop))
        .route("/api/v1/orders", post(place_order))
        .with_state(ctx)
}

/// Health summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `ok` when trading is possible, `degraded` otherwise.
    pub status: String,
    /// Engine lifecycle state.
    pub engine: EngineState,
    /// Risk gate mode.
    pub trading_mode: TradingMode,
    /// Emergency stop status.
    pub emergency_stop: EmergencyStatus,
}

async fn health_check(State(ctx): State<TradingContext>) -> Json<HealthResponse> {
    let engine = ctx.engine().state();
    let trading_mode = ctx.risk().trading_mode();
    let emergency_stop = ctx.resilience().emergency_status();

    let healthy = engine == EngineState::Running
        && trading_mode != TradingMode::Halted
        && !emergency_stop.active;

    Json(HealthResponse {
        status: if healthy { "ok" } else { "degraded" }.to_string(),
        engine,
        trading_mode,
        emergency_stop,
    })
}

async fn engine_metrics(State(ctx): State<TradingContext>) -> Json<EngineMetrics> {
    Json(ctx.engine().get_metrics())
}

async fn error_stats(State(ctx): State<TradingContext>) -> Json<ErrorStats> {
    Json(ctx.resilience().get_error_stats())
}

async fn risk_status(State(ctx): State<TradingContext>) -> Json<RiskStatus> {
    Json(ctx.risk().get_risk_status())
}

/// Count of alerts acknowledged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcknowledgeResponse {
    /// Alerts newly acknowledged.
    pub acknowledged: usize,
}

async fn acknowledge_alerts(State(ctx): State<TradingContext>) -> Json<AcknowledgeResponse> {
    Json(AcknowledgeResponse {
        acknowledged: ctx.risk().acknowledge_alerts(),
    })
}

/// Request to trip the emergency stop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyStopRequest {
    /// Operator-supplied reason.
    pub reason: String,
}

/// Emergency stop trigger result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyStopResponse {
    /// False when the stop was already active (the first reason is kept).
    pub triggered: bool,
    /// Status after the call.
    pub status: EmergencyStatus,
}

async fn trigger_emergency_stop(
    State(ctx): State<TradingContext>,
    Json(req): Json<EmergencyStopRequest>,
) -> Result<Json<EmergencyStopResponse>, ApiError> {
    let reason = req.reason.trim();
    if reason.is_empty() {
        return Err(ApiError::invalid_request("reason must not be empty").with_context("field", "reason"));
    }

    tracing::warn!(reason = %reason, "Emergency stop requested via API");
    let triggered = ctx.resilience().emergency_stop(reason);
    Ok(Json(EmergencyStopResponse {
        triggered,
        status: ctx.resilience().emergency_status(),
    }))
}

/// Reset result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetResponse {
    /// Reason of the cleared stop or breaker.
    pub previous_reason: String,
}

async fn reset_emergency_stop(
    State(ctx): State<TradingContext>,
) -> Result<Json<ResetResponse>, ApiError> {
    let previous_reason = ctx
        .resilience()
        .reset_emergency_stop()
        .ok_or_else(|| ApiError::not_found("emergency stop is not active"))?;
    tracing::info!(previous_reason = %previous_reason, "Emergency stop reset via API");
    Ok(Json(ResetResponse { previous_reason }))
}

async fn reset_risk_breaker(
    State(ctx): State<TradingContext>,
) -> Result<Json<ResetResponse>, ApiError> {
    let previous_reason = ctx
        .risk()
        .reset_circuit_breaker()
        .ok_or_else(|| ApiError::not_found("risk circuit breaker is not active"))?;
    tracing::info!(previous_reason = %previous_reason, "Risk circuit breaker reset via API");
    Ok(Json(ResetResponse { previous_reason }))
}

async fn place_order(
    State(ctx): State<TradingContext>,
    Json(req): Json<TradeRequest>,
) -> Result<Json<PlaceOrderOutcome>, ApiError> {
    tracing::info!(
        symbol = %req.symbol,
        side = %req.side,
        size = %req.size,
        "Placing order via API"
    );
    let outcome = ctx.place_order(&req).await?;
    Ok(Json(outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::HttpErrorResponse;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use rust_decimal_macros::dec;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    fn make_context() -> TradingContext {
        let mut config = Config::default();
        config.engine.adaptive.enabled = false;
        config.engine.global_throttle_ns = 0;
        config.engine.initial_workers = 1;
        TradingContext::from_config(config, CancellationToken::new())
    }

    async fn send(app: Router, method: &str, uri: &str, body: Option<String>) -> (StatusCode, Vec<u8>) {
        let mut builder = Request::builder().method(method).uri(uri);
        if body.is_some() {
            builder = builder.header("content-type", "application/json");
        }
        let request = builder
            .body(body.map_or_else(Body::empty, Body::from))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, bytes.to_vec())
    }

    #[tokio::test]
    async fn test_health_check_idle_engine_is_degraded() {
        let app = create_router(make_context());
        let (status, body) = send(app, "GET", "/health", None).await;

        assert_eq!(status, StatusCode::OK);
        let health: HealthResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(health.status, "degraded");
        assert_eq!(health.engine, EngineState::Idle);
    }

    #[tokio::test]
    async fn test_read_endpoints() {
        let ctx = make_context();
        let app = create_router(ctx.clone());

        let (status, body) = send(app.clone(), "GET", "/api/v1/risk", None).await;
        assert_eq!(status, StatusCode::OK);
        let risk: RiskStatus = serde_json::from_slice(&body).unwrap();
        assert_eq!(risk.trading_mode, TradingMode::Normal);

        let (status, body) = send(app.clone(), "GET", "/api/v1/errors", None).await;
        assert_eq!(status, StatusCode::OK);
        let stats: ErrorStats = serde_json::from_slice(&body).unwrap();
        assert_eq!(stats.total_errors, 0);

        let (status, body) = send(app, "GET", "/api/v1/metrics", None).await;
        assert_eq!(status, StatusCode::OK);
        let metrics: EngineMetrics = serde_json::from_slice(&body).unwrap();
        assert_eq!(metrics.instance_id, ctx.engine().instance_id());
    }

    #[tokio::test]
    async fn test_emergency_stop_roundtrip() {
        let ctx = make_context();
        let app = create_router(ctx.clone());

        let body = serde_json::to_string(&EmergencyStopRequest {
            reason: "operator halt".into(),
        })
        .unwrap();
        let (status, bytes) = send(app.clone(), "POST", "/api/v1/emergency-stop", Some(body.clone())).await;
        assert_eq!(status, StatusCode::OK);
        let first: EmergencyStopResponse = serde_json::from_slice(&bytes).unwrap();
        assert!(first.triggered);

        let (_, bytes) = send(app.clone(), "POST", "/api/v1/emergency-stop", Some(body)).await;
        let second: EmergencyStopResponse = serde_json::from_slice(&bytes).unwrap();
        assert!(!second.triggered);
        assert_eq!(second.status.reason.as_deref(), Some("operator halt"));

        let (status, bytes) = send(app.clone(), "POST", "/api/v1/emergency-stop/reset", None).await;
        assert_eq!(status, StatusCode::OK);
        let reset: ResetResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(reset.previous_reason, "operator halt");

        let (status, bytes) = send(app, "POST", "/api/v1/emergency-stop/reset", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let error: HttpErrorResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(error.code, "NOT_FOUND");
        assert!(!ctx.resilience().emergency_status().active);
    }

    #[tokio::test]
    async fn test_empty_reason_rejected() {
        let app = create_router(make_context());
        let body = r#"{"reason": "  "}"#.to_string();
        let (status, _) = send(app, "POST", "/api/v1/emergency-stop", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_risk_breaker_reset() {
        let ctx = make_context();
        let app = create_router(ctx.clone());

        let (status, _) = send(app.clone(), "POST", "/api/v1/risk/circuit-breaker/reset", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        ctx.risk()
            .trigger_circuit_breaker("stop cascade", std::time::Duration::from_secs(3600));
        let (status, bytes) = send(app, "POST", "/api/v1/risk/circuit-breaker/reset", None).await;
        assert_eq!(status, StatusCode::OK);
        let reset: ResetResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(reset.previous_reason, "stop cascade");
    }

    #[tokio::test]
    async fn test_place_order_before_start_is_unavailable() {
        let app = create_router(make_context());
        let request = TradeRequest::new(
            "BTC/USD",
            crate::engine::OrderSide::Buy,
            crate::engine::OrderType::Limit,
            dec!(0.01),
            dec!(50000),
        );
        let body = serde_json::to_string(&request).unwrap();
        let (status, bytes) = send(app, "POST", "/api/v1/orders", Some(body)).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let error: HttpErrorResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(error.details.get("engine_code").map(String::as_str), Some("NOT_RUNNING"));
    }

    #[tokio::test]
    async fn test_place_order_rejection_is_ok_response() {
        let ctx = make_context();
        ctx.start_simulated().unwrap();
        let app = create_router(ctx.clone());

        let request = TradeRequest::new(
            "BTC/USD",
            crate::engine::OrderSide::Buy,
            crate::engine::OrderType::Limit,
            dec!(1),
            dec!(50000),
        )
        .with_leverage(dec!(10));
        let body = serde_json::to_string(&request).unwrap();
        let (status, bytes) = send(app, "POST", "/api/v1/orders", Some(body)).await;

        assert_eq!(status, StatusCode::OK);
        let outcome: PlaceOrderOutcome = serde_json::from_slice(&bytes).unwrap();
        assert!(!outcome.validation.accepted);
        assert!(outcome.order_id.is_none());
        ctx.shutdown().await.unwrap();
    }
}
