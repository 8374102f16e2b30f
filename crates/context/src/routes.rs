//! HTTP surface of the context engine

use crate::engine::{AnswerResponse, RetrievalEngine, RetrieveRequest, RetrieveResponse};
use axum::{
    extract::{MatchedPath, Request, State},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use citeforge_common::cache::Cache;
use citeforge_common::cancel::CancellationToken;
use citeforge_common::config::AppConfig;
use citeforge_common::db::DbPool;
use citeforge_common::errors::{AppError, Result};
use citeforge_common::metrics::{RequestMetrics, RetrievalStatsSnapshot};
use citeforge_common::models::ProvenanceScore;
use citeforge_common::resilience::{create_rate_limiter, GlobalRateLimiter};
use citeforge_common::VERSION;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use validator::Validate;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<RetrievalEngine>,
    pub db: Option<Arc<DbPool>>,
    pub cache: Option<Arc<Cache>>,

    /// Applied to turns that carry no deadline of their own
    pub default_deadline: Option<Duration>,
}

impl AppState {
    pub fn new(engine: Arc<RetrievalEngine>) -> Self {
        Self {
            engine,
            db: None,
            cache: None,
            default_deadline: None,
        }
    }

    pub fn with_db(mut self, db: Arc<DbPool>) -> Self {
        self.db = Some(db);
        self
    }

    pub fn with_cache(mut self, cache: Arc<Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_default_deadline(mut self, deadline: Duration) -> Self {
        self.default_deadline = Some(deadline);
        self
    }
}

/// Build the service router
pub fn create_router(state: AppState, config: &AppConfig) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let mut api = Router::new()
        .route("/retrieve", post(retrieve))
        .route("/answer", post(answer))
        .route("/provenance", post(provenance))
        .route("/stats", get(stats));

    if config.rate_limit.enabled {
        let limit = RateLimit {
            limiter: create_rate_limiter(
                config.rate_limit.requests_per_second,
                config.rate_limit.burst,
            ),
            requests_per_second: config.rate_limit.requests_per_second,
        };
        api = api.layer(middleware::from_fn_with_state(limit, rate_limit));
    }

    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .nest("/v1", api)
        .route_layer(middleware::from_fn(track_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(propagate_id)
        .layer(request_id)
        .with_state(state)
}

#[derive(Clone)]
struct RateLimit {
    limiter: Arc<GlobalRateLimiter>,
    requests_per_second: u32,
}

/// Reject requests over the configured rate
async fn rate_limit(
    State(limit): State<RateLimit>,
    request: Request,
    next: Next,
) -> Result<Response> {
    match limit.limiter.check() {
        Ok(_) => Ok(next.run(request).await),
        Err(_) => {
            tracing::warn!(path = %request.uri().path(), "Rate limit exceeded");
            Err(AppError::RateLimited {
                limit: limit.requests_per_second,
            })
        }
    }
}

async fn track_metrics(request: Request, next: Next) -> Response {
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let metrics = RequestMetrics::start(request.method().as_str(), &endpoint);

    let response = next.run(request).await;
    metrics.finish(response.status().as_u16());
    response
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReadyResponse {
    pub status: String,
    pub checks: HealthChecks,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthChecks {
    pub database: CheckResult,
    pub conversation_store: CheckResult,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CheckResult {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CheckResult {
    fn skipped() -> Self {
        Self {
            status: "not_configured".to_string(),
            latency_ms: None,
            error: None,
        }
    }

    fn is_healthy(&self) -> bool {
        self.status != "down"
    }
}

async fn check<F>(probe: F) -> CheckResult
where
    F: Future<Output = Result<()>>,
{
    let start = Instant::now();
    match probe.await {
        Ok(()) => CheckResult {
            status: "up".to_string(),
            latency_ms: Some(start.elapsed().as_millis() as u64),
            error: None,
        },
        Err(e) => CheckResult {
            status: "down".to_string(),
            latency_ms: None,
            error: Some(e.to_string()),
        },
    }
}

/// Liveness probe
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: VERSION.to_string(),
    })
}

/// Readiness probe over the configured backing services
pub async fn ready(State(state): State<AppState>) -> Json<ReadyResponse> {
    let database = match &state.db {
        Some(db) => check(db.ping()).await,
        None => CheckResult::skipped(),
    };
    let conversation_store = match &state.cache {
        Some(cache) => check(cache.ping()).await,
        None => CheckResult::skipped(),
    };

    let all_healthy = database.is_healthy() && conversation_store.is_healthy();
    Json(ReadyResponse {
        status: if all_healthy { "ready" } else { "not_ready" }.to_string(),
        checks: HealthChecks {
            database,
            conversation_store,
        },
    })
}

fn validated(mut request: RetrieveRequest, state: &AppState) -> Result<RetrieveRequest> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;
    if request.options.deadline_ms.is_none() {
        request.options.deadline_ms = state.default_deadline.map(|d| d.as_millis() as u64);
    }
    Ok(request)
}

/// Retrieve and cite evidence for one turn
pub async fn retrieve(
    State(state): State<AppState>,
    Json(request): Json<RetrieveRequest>,
) -> Result<Json<RetrieveResponse>> {
    let request = validated(request, &state)?;
    // A client disconnect before the gate drops the turn; once the commit
    // started it finishes on its own task.
    let response = state
        .engine
        .retrieve(request, &CancellationToken::new())
        .await?;
    Ok(Json(response))
}

/// Retrieve, generate and score an answer
pub async fn answer(
    State(state): State<AppState>,
    Json(request): Json<RetrieveRequest>,
) -> Result<Json<AnswerResponse>> {
    let request = validated(request, &state)?;
    let response = state
        .engine
        .answer(request, &CancellationToken::new())
        .await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize, Validate)]
pub struct ProvenanceRequest {
    #[validate(length(min = 1, max = 50000))]
    pub response: String,
    pub retrieval: RetrieveResponse,
}

/// Score generated text against a retrieval response
pub async fn provenance(
    State(state): State<AppState>,
    Json(request): Json<ProvenanceRequest>,
) -> Result<Json<ProvenanceScore>> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: Some("response".to_string()),
    })?;
    Ok(Json(
        state.engine.score_response(&request.response, &request.retrieval),
    ))
}

/// Retrieval analytics since process start
pub async fn stats(State(state): State<AppState>) -> Json<RetrievalStatsSnapshot> {
    Json(state.engine.stats().snapshot())
}
