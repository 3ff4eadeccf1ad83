//! REST API for dashboards, token flows, and operator moderation

use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::{header, Method, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use uuid::Uuid;

use trustplane_common::{
    ActionType, AuditQuery, AuditRecord, CategoryShare, Clock, ModerationAction, TokenError,
    TokenPurpose, TrendPoint, VERSION,
};
use trustplane_metrics::names;
use trustplane_moderation::{LedgerQuery, ThresholdEvaluation};

use crate::state::AppState;

type ApiError = (StatusCode, Json<Value>);
type ApiResult<T> = Result<Json<T>, ApiError>;

fn error_body(status: StatusCode, code: &str, message: impl ToString) -> ApiError {
    (
        status,
        Json(json!({"error": code, "message": message.to_string()})),
    )
}

fn token_error(err: TokenError) -> ApiError {
    let (status, code) = match &err {
        TokenError::NotFound => (StatusCode::NOT_FOUND, "not_found"),
        TokenError::Expired { .. } => (StatusCode::GONE, "expired"),
        TokenError::AlreadyConsumed { .. } => (StatusCode::GONE, "already_consumed"),
        TokenError::Revoked { .. } => (StatusCode::GONE, "revoked"),
        TokenError::WrongPurpose { .. } => (StatusCode::CONFLICT, "wrong_purpose"),
        TokenError::InvalidDuration { .. } => (StatusCode::BAD_REQUEST, "invalid_duration"),
        TokenError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
    };
    error_body(status, code, err)
}

// ============ METRICS ============

/// Resolve a requested window against the dashboard default and cap
fn window_days(state: &AppState, requested: Option<u32>) -> Result<u32, ApiError> {
    let dashboard = &state.config.dashboard;
    match requested {
        None => Ok(dashboard.trend_window_days),
        Some(days) if days == 0 || days > dashboard.max_window_days => Err(error_body(
            StatusCode::BAD_REQUEST,
            "invalid_window",
            format!(
                "days must be between 1 and {}, got {}",
                dashboard.max_window_days, days
            ),
        )),
        Some(days) => Ok(days),
    }
}

#[derive(Debug, Deserialize)]
pub struct WindowQuery {
    pub days: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TrendResponse {
    pub metric: String,
    pub window_days: u32,
    pub total: u64,
    pub points: Vec<TrendPoint>,
}

async fn get_trend(
    State(state): State<AppState>,
    Path(metric): Path<String>,
    Query(query): Query<WindowQuery>,
) -> ApiResult<TrendResponse> {
    let window_days = window_days(&state, query.days)?;
    let points = state.metrics.trend(&metric, window_days);
    let total = points.iter().map(|p| p.count).sum();
    Ok(Json(TrendResponse {
        metric,
        window_days,
        total,
        points,
    }))
}

#[derive(Debug, Deserialize)]
pub struct RecordRequest {
    pub count: Option<u64>,
    pub timestamp: Option<DateTime<Utc>>,
}

async fn record_events(
    State(state): State<AppState>,
    Path(metric): Path<String>,
    Json(req): Json<RecordRequest>,
) -> StatusCode {
    let timestamp = req.timestamp.unwrap_or_else(|| state.clock.now());
    state
        .metrics
        .record(&metric, timestamp, req.count.unwrap_or(1));
    StatusCode::ACCEPTED
}

#[derive(Debug, Deserialize)]
pub struct RateQuery {
    pub numerator: String,
    pub denominator: String,
    /// Trailing window; the current bucket only when absent
    pub days: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RateResponse {
    pub numerator: String,
    pub denominator: String,
    pub rate: f64,
    /// Rate scaled to a percentage for display
    pub percent: f64,
}

async fn get_rate(
    State(state): State<AppState>,
    Query(query): Query<RateQuery>,
) -> ApiResult<RateResponse> {
    let rate = match query.days {
        Some(days) => {
            let days = window_days(&state, Some(days))?;
            state
                .metrics
                .window_rate(&query.numerator, &query.denominator, days)
        }
        None => state
            .metrics
            .rate(&query.numerator, &query.denominator, state.clock.now()),
    };
    Ok(Json(RateResponse {
        numerator: query.numerator,
        denominator: query.denominator,
        rate,
        percent: rate * 100.0,
    }))
}

#[derive(Debug, Deserialize)]
pub struct BreakdownQuery {
    /// Comma-separated metric names; media uploads by type when absent
    pub categories: Option<String>,
    pub days: Option<u32>,
}

async fn get_breakdown(
    State(state): State<AppState>,
    Query(query): Query<BreakdownQuery>,
) -> ApiResult<Vec<CategoryShare>> {
    let days = window_days(&state, query.days)?;
    let categories: Vec<String> = match query.categories {
        Some(list) => list
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(String::from)
            .collect(),
        None => state
            .config
            .dashboard
            .media_types
            .iter()
            .map(|t| names::media_uploads(t))
            .collect(),
    };
    let refs: Vec<&str> = categories.iter().map(String::as_str).collect();
    Ok(Json(state.metrics.breakdown(&refs, days)))
}

// ============ AUDIT ============

async fn list_audit(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
) -> Json<Vec<AuditRecord>> {
    Json(state.audit.list(&query))
}

// ============ MODERATION ============

async fn list_actions(
    State(state): State<AppState>,
    Query(query): Query<LedgerQuery>,
) -> Json<Vec<ModerationAction>> {
    Json(state.moderation.ledger().list(&query))
}

async fn get_action(
    State(state): State<AppState>,
    Path(action_id): Path<String>,
) -> ApiResult<ModerationAction> {
    let id = Uuid::parse_str(&action_id)
        .map_err(|_| error_body(StatusCode::BAD_REQUEST, "invalid_id", "Invalid action_id"))?;
    state
        .moderation
        .ledger()
        .get(&id)
        .map(Json)
        .ok_or_else(|| error_body(StatusCode::NOT_FOUND, "not_found", "Action not found"))
}

/// Current evaluation of every configured threshold rule
async fn list_rules(State(state): State<AppState>) -> Json<Vec<ThresholdEvaluation>> {
    Json(
        state
            .rules
            .bindings()
            .iter()
            .map(|binding| binding.rule.evaluate(&state.metrics))
            .collect(),
    )
}

#[derive(Debug, Deserialize)]
pub struct ApplyRequest {
    pub action_type: ActionType,
    pub target_ids: Vec<String>,
    pub actor_id: String,
    pub timeout_ms: Option<u64>,
}

async fn apply_action(
    State(state): State<AppState>,
    Json(req): Json<ApplyRequest>,
) -> (StatusCode, Json<ModerationAction>) {
    let timeout = req
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| state.config.moderation.target_timeout());
    let action = state
        .moderation
        .apply(req.action_type, req.target_ids, &req.actor_id, timeout)
        .await;
    (StatusCode::CREATED, Json(action))
}

// ============ TOKENS ============

#[derive(Debug, Deserialize)]
pub struct IssueRequest {
    pub subject_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IssueResponse {
    pub token_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

async fn issue_email_verification(
    State(state): State<AppState>,
    Json(req): Json<IssueRequest>,
) -> Result<(StatusCode, Json<IssueResponse>), ApiError> {
    let (_, token) = state
        .tokens
        .issue_email_verification(&req.subject_id)
        .await
        .map_err(token_error)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(IssueResponse {
            token_id: token.id,
            expires_at: token.expires_at,
        }),
    ))
}

async fn issue_password_reset(
    State(state): State<AppState>,
    Json(req): Json<IssueRequest>,
) -> Result<(StatusCode, Json<IssueResponse>), ApiError> {
    let (_, token) = state
        .tokens
        .issue_password_reset(&req.subject_id)
        .await
        .map_err(token_error)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(IssueResponse {
            token_id: token.id,
            expires_at: token.expires_at,
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub token: String,
    pub purpose: TokenPurpose,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ValidateResponse {
    pub subject_id: String,
}

async fn validate_token(
    State(state): State<AppState>,
    Json(req): Json<ValidateRequest>,
) -> ApiResult<ValidateResponse> {
    let subject_id = state
        .tokens
        .validate(&req.token, req.purpose)
        .await
        .map_err(token_error)?;
    Ok(Json(ValidateResponse { subject_id }))
}

// ============ ROUTER ============

async fn health_check() -> Json<Value> {
    Json(json!({"status": "healthy"}))
}

async fn version() -> Json<Value> {
    Json(json!({
        "service": "trustplane-controld",
        "version": VERSION,
        "description": "Trust and operations control plane",
    }))
}

/// Build the service router
pub fn router(state: AppState) -> Router {
    // CORS layer to allow dashboard connections from any origin
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT]);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/version", get(version))
        // Metrics
        .route("/api/v1/metrics/rate", get(get_rate))
        .route("/api/v1/metrics/breakdown", get(get_breakdown))
        .route("/api/v1/metrics/:metric/trend", get(get_trend))
        .route("/api/v1/metrics/:metric/events", post(record_events))
        // Audit
        .route("/api/v1/audit", get(list_audit))
        // Moderation
        .route(
            "/api/v1/moderation/actions",
            get(list_actions).post(apply_action),
        )
        .route("/api/v1/moderation/actions/:action_id", get(get_action))
        .route("/api/v1/moderation/rules", get(list_rules))
        // Tokens
        .route(
            "/api/v1/tokens/email-verification",
            post(issue_email_verification),
        )
        .route("/api/v1/tokens/password-reset", post(issue_password_reset))
        .route("/api/v1/tokens/validate", post(validate_token))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
