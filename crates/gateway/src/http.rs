use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use causeway_catalog::CatalogService;
use causeway_contracts::{
    Category, CoreError, NewPetition, NewSupporter, NewSupportTier, PetitionDetail, PetitionPage,
    PetitionPatch, Principal, SupporterRecord, SupportTierPatch,
};
use causeway_store::Store;
use serde::Serialize;
use ulid::Ulid;

use crate::config::{GatewayConfig, StartupError};
use crate::metrics;

mod params;

use self::params::parse_search_query;

#[derive(Clone)]
pub struct AppState {
    pub config: GatewayConfig,
    catalog: CatalogService,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

pub async fn router(config: GatewayConfig) -> Result<Router, StartupError> {
    let store = Store::connect_and_migrate(
        &config.db_url,
        Duration::from_millis(config.store_op_timeout_ms),
    )
    .await
    .map_err(|err| StartupError {
        code: "ERR_STORE_UNAVAILABLE",
        message: format!("failed to initialize store: {}", err),
    })?;

    let state = AppState {
        config,
        catalog: CatalogService::new(store),
    };

    Ok(Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_endpoint))
        .route("/v1/petitions", get(list_petitions).post(create_petition))
        .route("/v1/petitions/categories", get(list_categories))
        .route(
            "/v1/petitions/{petition_id}",
            get(get_petition)
                .patch(update_petition)
                .delete(delete_petition),
        )
        .route(
            "/v1/petitions/{petition_id}/supportTiers",
            axum::routing::put(add_support_tier),
        )
        .route(
            "/v1/petitions/{petition_id}/supportTiers/{tier_id}",
            axum::routing::patch(update_support_tier).delete(delete_support_tier),
        )
        .route(
            "/v1/petitions/{petition_id}/supporters",
            get(list_supporters).post(register_support),
        )
        .with_state(state))
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
struct ReadyzResponse {
    status: &'static str,
    checks: BTreeMap<&'static str, bool>,
}

async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let mut checks = BTreeMap::new();

    let store_ready = state.catalog.store().ping().await.is_ok();
    checks.insert("store", store_ready);

    let all_ready = checks.values().all(|ok| *ok);
    let status = if all_ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadyzResponse {
            status: if all_ready { "ready" } else { "not_ready" },
            checks,
        }),
    )
}

async fn metrics_endpoint(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if state.config.metrics_require_token {
        if let Err(err) = extract_principal(&state, &headers).await {
            return err.into_response();
        }
    }

    match metrics::render() {
        Ok((body, content_type)) => {
            let mut headers = HeaderMap::new();
            if let Ok(value) = HeaderValue::from_str(content_type.as_str()) {
                headers.insert(header::CONTENT_TYPE, value);
            }
            (headers, body).into_response()
        }
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

async fn list_petitions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Json<PetitionPage>, ApiError> {
    const ROUTE: &str = "petitions.list";
    let started = Instant::now();
    let request_id = extract_request_id(&headers);

    let query =
        parse_search_query(&pairs).map_err(|err| reject(ROUTE, "GET", &request_id, started, &err))?;

    match state.catalog.list_petitions(&query).await {
        Ok(page) => {
            observe(ROUTE, "GET", &request_id, started, StatusCode::OK);
            Ok(Json(page))
        }
        Err(err) => Err(reject(ROUTE, "GET", &request_id, started, &err)),
    }
}

async fn get_petition(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(petition_id): Path<i64>,
) -> Result<Json<PetitionDetail>, ApiError> {
    const ROUTE: &str = "petitions.get";
    let started = Instant::now();
    let request_id = extract_request_id(&headers);

    match state.catalog.petition_detail(petition_id).await {
        Ok(detail) => {
            observe(ROUTE, "GET", &request_id, started, StatusCode::OK);
            Ok(Json(detail))
        }
        Err(err) => Err(reject(ROUTE, "GET", &request_id, started, &err)),
    }
}

async fn list_categories(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Category>>, ApiError> {
    const ROUTE: &str = "categories.list";
    let started = Instant::now();
    let request_id = extract_request_id(&headers);

    match state.catalog.categories().await {
        Ok(categories) => {
            observe(ROUTE, "GET", &request_id, started, StatusCode::OK);
            Ok(Json(categories))
        }
        Err(err) => Err(reject(ROUTE, "GET", &request_id, started, &err)),
    }
}

#[derive(Debug, Serialize)]
struct CreatedPetition {
    #[serde(rename = "petitionId")]
    petition_id: i64,
}

async fn create_petition(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<NewPetition>, JsonRejection>,
) -> Result<(StatusCode, Json<CreatedPetition>), ApiError> {
    const ROUTE: &str = "petitions.create";
    let started = Instant::now();
    let request_id = extract_request_id(&headers);

    let principal = extract_principal(&state, &headers)
        .await
        .map_err(|err| observed(ROUTE, "POST", &request_id, started, err))?;
    let Json(body) = body.map_err(|_| {
        reject(
            ROUTE,
            "POST",
            &request_id,
            started,
            &CoreError::Validation("invalid JSON body".to_string()),
        )
    })?;

    match state.catalog.create_petition(principal, &body).await {
        Ok(petition_id) => {
            observe(ROUTE, "POST", &request_id, started, StatusCode::CREATED);
            Ok((StatusCode::CREATED, Json(CreatedPetition { petition_id })))
        }
        Err(err) => Err(reject(ROUTE, "POST", &request_id, started, &err)),
    }
}

async fn update_petition(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(petition_id): Path<i64>,
    body: Result<Json<PetitionPatch>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    const ROUTE: &str = "petitions.update";
    let started = Instant::now();
    let request_id = extract_request_id(&headers);

    let principal = extract_principal(&state, &headers)
        .await
        .map_err(|err| observed(ROUTE, "PATCH", &request_id, started, err))?;
    let Json(patch) = body.map_err(|_| {
        reject(
            ROUTE,
            "PATCH",
            &request_id,
            started,
            &CoreError::Validation("invalid JSON body".to_string()),
        )
    })?;

    match state
        .catalog
        .update_petition(principal, petition_id, &patch)
        .await
    {
        Ok(()) => {
            observe(ROUTE, "PATCH", &request_id, started, StatusCode::OK);
            Ok(StatusCode::OK)
        }
        Err(err) => Err(reject(ROUTE, "PATCH", &request_id, started, &err)),
    }
}

async fn delete_petition(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(petition_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    const ROUTE: &str = "petitions.delete";
    let started = Instant::now();
    let request_id = extract_request_id(&headers);

    let principal = extract_principal(&state, &headers)
        .await
        .map_err(|err| observed(ROUTE, "DELETE", &request_id, started, err))?;

    match state.catalog.delete_petition(principal, petition_id).await {
        Ok(()) => {
            observe(ROUTE, "DELETE", &request_id, started, StatusCode::OK);
            Ok(StatusCode::OK)
        }
        Err(err) => Err(reject(ROUTE, "DELETE", &request_id, started, &err)),
    }
}

#[derive(Debug, Serialize)]
struct CreatedTier {
    #[serde(rename = "supportTierId")]
    support_tier_id: i64,
}

async fn add_support_tier(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(petition_id): Path<i64>,
    body: Result<Json<NewSupportTier>, JsonRejection>,
) -> Result<(StatusCode, Json<CreatedTier>), ApiError> {
    const ROUTE: &str = "support_tiers.create";
    let started = Instant::now();
    let request_id = extract_request_id(&headers);

    let principal = extract_principal(&state, &headers)
        .await
        .map_err(|err| observed(ROUTE, "POST", &request_id, started, err))?;
    let Json(body) = body.map_err(|_| {
        reject(
            ROUTE,
            "POST",
            &request_id,
            started,
            &CoreError::Validation("invalid JSON body".to_string()),
        )
    })?;

    match state
        .catalog
        .add_support_tier(principal, petition_id, &body)
        .await
    {
        Ok(support_tier_id) => {
            observe(ROUTE, "POST", &request_id, started, StatusCode::CREATED);
            Ok((StatusCode::CREATED, Json(CreatedTier { support_tier_id })))
        }
        Err(err) => Err(reject(ROUTE, "POST", &request_id, started, &err)),
    }
}

async fn update_support_tier(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((petition_id, tier_id)): Path<(i64, i64)>,
    body: Result<Json<SupportTierPatch>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    const ROUTE: &str = "support_tiers.update";
    let started = Instant::now();
    let request_id = extract_request_id(&headers);

    let principal = extract_principal(&state, &headers)
        .await
        .map_err(|err| observed(ROUTE, "PATCH", &request_id, started, err))?;
    let Json(patch) = body.map_err(|_| {
        reject(
            ROUTE,
            "PATCH",
            &request_id,
            started,
            &CoreError::Validation("invalid JSON body".to_string()),
        )
    })?;

    match state
        .catalog
        .update_support_tier(principal, petition_id, tier_id, &patch)
        .await
    {
        Ok(()) => {
            observe(ROUTE, "PATCH", &request_id, started, StatusCode::OK);
            Ok(StatusCode::OK)
        }
        Err(err) => Err(reject(ROUTE, "PATCH", &request_id, started, &err)),
    }
}

async fn delete_support_tier(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((petition_id, tier_id)): Path<(i64, i64)>,
) -> Result<StatusCode, ApiError> {
    const ROUTE: &str = "support_tiers.delete";
    let started = Instant::now();
    let request_id = extract_request_id(&headers);

    let principal = extract_principal(&state, &headers)
        .await
        .map_err(|err| observed(ROUTE, "DELETE", &request_id, started, err))?;

    match state
        .catalog
        .delete_support_tier(principal, petition_id, tier_id)
        .await
    {
        Ok(()) => {
            observe(ROUTE, "DELETE", &request_id, started, StatusCode::OK);
            Ok(StatusCode::OK)
        }
        Err(err) => Err(reject(ROUTE, "DELETE", &request_id, started, &err)),
    }
}

async fn list_supporters(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(petition_id): Path<i64>,
) -> Result<Json<Vec<SupporterRecord>>, ApiError> {
    const ROUTE: &str = "supporters.list";
    let started = Instant::now();
    let request_id = extract_request_id(&headers);

    match state.catalog.list_supporters(petition_id).await {
        Ok(supporters) => {
            observe(ROUTE, "GET", &request_id, started, StatusCode::OK);
            Ok(Json(supporters))
        }
        Err(err) => Err(reject(ROUTE, "GET", &request_id, started, &err)),
    }
}

async fn register_support(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(petition_id): Path<i64>,
    body: Result<Json<NewSupporter>, JsonRejection>,
) -> Result<(StatusCode, Json<SupporterRecord>), ApiError> {
    const ROUTE: &str = "supporters.create";
    let started = Instant::now();
    let request_id = extract_request_id(&headers);

    let principal = extract_principal(&state, &headers)
        .await
        .map_err(|err| observed(ROUTE, "POST", &request_id, started, err))?;
    let Json(body) = body.map_err(|_| {
        reject(
            ROUTE,
            "POST",
            &request_id,
            started,
            &CoreError::Validation("invalid JSON body".to_string()),
        )
    })?;

    match state
        .catalog
        .register_support(principal, petition_id, &body)
        .await
    {
        Ok(record) => {
            metrics::observe_pledge();
            observe(ROUTE, "POST", &request_id, started, StatusCode::CREATED);
            Ok((StatusCode::CREATED, Json(record)))
        }
        Err(err) => Err(reject(ROUTE, "POST", &request_id, started, &err)),
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error_code: String,
    message: String,
}

fn json_error(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error_code: code.into(),
            message: message.into(),
        }),
    )
}

fn core_error_status(err: &CoreError) -> StatusCode {
    match err {
        CoreError::Validation(_) => StatusCode::BAD_REQUEST,
        CoreError::NotFound(_) => StatusCode::NOT_FOUND,
        CoreError::Forbidden(_) => StatusCode::FORBIDDEN,
        CoreError::Conflict(_) | CoreError::LimitExceeded(_) => StatusCode::CONFLICT,
        CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn observe(route: &str, method: &str, request_id: &str, started: Instant, status: StatusCode) {
    let latency_ms = started.elapsed().as_millis() as u64;
    metrics::observe_http_request(route, method, status.as_u16(), started.elapsed());
    tracing::info!(
        route,
        method,
        request_id,
        latency_ms,
        status = status.as_u16(),
        "request completed"
    );
}

/// Maps a core rejection to its transport form and records it once.
fn reject(
    route: &'static str,
    method: &'static str,
    request_id: &str,
    started: Instant,
    err: &CoreError,
) -> ApiError {
    let status = core_error_status(err);
    metrics::observe_rejection(route, err.code());
    observe(route, method, request_id, started, status);
    json_error(status, err.code(), err.message())
}

/// Records an already-built transport error (auth failures).
fn observed(
    route: &'static str,
    method: &'static str,
    request_id: &str,
    started: Instant,
    err: ApiError,
) -> ApiError {
    metrics::observe_rejection(route, &err.1.error_code);
    observe(route, method, request_id, started, err.0);
    err
}

async fn extract_principal(state: &AppState, headers: &HeaderMap) -> Result<Principal, ApiError> {
    let token = headers
        .get("x-authorization")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            json_error(
                StatusCode::UNAUTHORIZED,
                "ERR_UNAUTHENTICATED",
                "missing X-Authorization header",
            )
        })?;

    match state.catalog.principal_for_token(token).await {
        Ok(Some(principal)) => Ok(principal),
        Ok(None) => Err(json_error(
            StatusCode::UNAUTHORIZED,
            "ERR_UNAUTHENTICATED",
            "invalid or expired token",
        )),
        Err(err) => Err(json_error(
            core_error_status(&err),
            err.code(),
            err.message(),
        )),
    }
}

fn extract_request_id(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .and_then(sanitize_request_id)
        .unwrap_or_else(|| Ulid::new().to_string())
}

fn sanitize_request_id(raw: &str) -> Option<String> {
    const MAX_LEN: usize = 64;
    let mut out = String::with_capacity(raw.len().min(MAX_LEN));

    for ch in raw.chars() {
        if out.len() >= MAX_LEN {
            break;
        }
        if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
            out.push(ch);
        }
    }

    if out.is_empty() { None } else { Some(out) }
}
