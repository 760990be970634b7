//! HTTP routes for the valuation service.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::Json,
    routing::{delete, get, post, put},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use stockval_common::{Error, RefreshMode};

use crate::data::{Segment, StockFilter, StockRecord};
use crate::error::ApiError;
use crate::orchestrator::{RunHandle, Scope, SegmentStatus, StatusKey};
use crate::refresh::JobOutcome;
use crate::screening::{screen, ScreeningReport, Verdict};
use crate::valuation::{ValuationInputs, ValuationResult};
use crate::ServiceState;

type ApiResult<T> = Result<T, ApiError>;

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub service: String,
}

#[derive(Debug, Deserialize)]
pub struct TriggerRequest {
    pub market: String,
    #[serde(default)]
    pub mode: RefreshMode,
}

#[derive(Debug, Default, Deserialize)]
pub struct ModeQuery {
    #[serde(default)]
    pub mode: RefreshMode,
}

#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub success: bool,
    pub run_id: String,
    pub scope: String,
    pub message: String,
}

impl TriggerResponse {
    fn accepted(scope: Scope, handle: &RunHandle) -> Self {
        Self {
            success: true,
            run_id: handle.run_id.clone(),
            scope: scope.to_string(),
            message: format!("{} update started", scope),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub market: Option<String>,
    /// Substring of the symbol or name
    pub search_query: Option<String>,
    /// 低估, 合理, 高估 or 数据缺失
    pub valuation_status: Option<String>,
    #[serde(default)]
    pub skip: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

#[derive(Debug, Serialize)]
pub struct StocksResponse {
    pub stocks: Vec<StockRecord>,
    pub count: usize,
}

#[derive(Debug, Deserialize)]
pub struct BatchItem {
    pub symbol: String,
    pub market: String,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BatchCreateRequest {
    pub stocks: Vec<BatchItem>,
}

#[derive(Debug, Serialize)]
pub struct BatchCreateResponse {
    pub message: String,
    pub added: Vec<String>,
    pub skipped: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct WatchlistRequest {
    pub auto_update: bool,
}

/// New watched stock. Unset assumptions fall back to the record defaults.
#[derive(Debug, Deserialize)]
pub struct CreateStockRequest {
    pub symbol: String,
    pub market: String,
    pub name: Option<String>,
    pub book_value_per_share: Option<f64>,
    pub roe: Option<f64>,
    pub perpetual_growth_rate: Option<f64>,
    pub required_return_rate: Option<f64>,
    pub auto_update: Option<bool>,
}

// ============================================================================
// Router
// ============================================================================

/// Build the API router over shared service state.
pub fn build_router(state: Arc<ServiceState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/valuation/calculate", post(calculate_valuation))
        .route("/api/v1/update/trigger", post(trigger_update))
        .route("/api/v1/update/trigger_all", post(trigger_all))
        .route("/api/v1/update/status", get(get_update_status))
        .route("/api/v1/stocks", get(list_stocks).post(create_stock))
        .route("/api/v1/stocks/batch", post(create_stocks_batch))
        .route("/api/v1/stocks/:market/:symbol", delete(delete_stock))
        .route("/api/v1/stocks/:market/:symbol/watchlist", put(set_watchlist))
        .route("/api/v1/stocks/:market/:symbol/refresh", post(refresh_stock))
        .route("/api/v1/analysis/screening", get(screening))
        .with_state(state)
}

// ============================================================================
// Route Handlers
// ============================================================================

/// Health check endpoint
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        service: "stockval".to_string(),
    })
}

/// Price an ad-hoc set of fundamentals.
pub async fn calculate_valuation(
    State(state): State<Arc<ServiceState>>,
    Json(inputs): Json<ValuationInputs>,
) -> ApiResult<Json<ValuationResult>> {
    let result = state.engine.compute(&inputs)?;
    Ok(Json(result))
}

pub async fn trigger_update(
    State(state): State<Arc<ServiceState>>,
    Json(request): Json<TriggerRequest>,
) -> ApiResult<(StatusCode, Json<TriggerResponse>)> {
    let segment: Segment = request.market.parse()?;
    let scope = Scope::Segment(segment);
    let handle = state
        .orchestrator
        .trigger_with_mode(scope, request.mode)
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(TriggerResponse::accepted(scope, &handle)),
    ))
}

/// Refresh every segment. `?mode=full` includes records with auto-update off.
pub async fn trigger_all(
    State(state): State<Arc<ServiceState>>,
    Query(query): Query<ModeQuery>,
) -> ApiResult<(StatusCode, Json<TriggerResponse>)> {
    let handle = state
        .orchestrator
        .trigger_with_mode(Scope::All, query.mode)
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(TriggerResponse::accepted(Scope::All, &handle)),
    ))
}

pub async fn get_update_status(
    State(state): State<Arc<ServiceState>>,
) -> Json<BTreeMap<StatusKey, SegmentStatus>> {
    Json(state.orchestrator.get_status().await)
}

/// One page of records, newest first. `X-Total-Count` carries the unpaged total.
pub async fn list_stocks(
    State(state): State<Arc<ServiceState>>,
    Query(query): Query<ListQuery>,
) -> ApiResult<(HeaderMap, Json<StocksResponse>)> {
    let market = query
        .market
        .as_deref()
        .filter(|m| !m.is_empty())
        .map(str::parse::<Segment>)
        .transpose()?;
    let verdict = query
        .valuation_status
        .as_deref()
        .filter(|v| !v.is_empty())
        .map(str::parse::<Verdict>)
        .transpose()?;

    let filter = StockFilter {
        market,
        search: query.search_query.filter(|q| !q.trim().is_empty()),
        verdict,
        skip: query.skip,
        limit: query.limit,
    };
    let page = state.repository.page(&filter).await?;

    let mut headers = HeaderMap::new();
    headers.insert("x-total-count", HeaderValue::from(page.total));
    let count = page.records.len();
    Ok((
        headers,
        Json(StocksResponse {
            stocks: page.records,
            count,
        }),
    ))
}

/// Add a watched stock and kick off a refresh for it.
pub async fn create_stock(
    State(state): State<Arc<ServiceState>>,
    Json(request): Json<CreateStockRequest>,
) -> ApiResult<(StatusCode, Json<StockRecord>)> {
    let symbol = parse_symbol(&request.symbol)?;
    let market: Segment = request.market.parse()?;

    if state.repository.get(&symbol, market).await?.is_some() {
        return Err(ApiError(Error::InvalidInput(format!(
            "{} ({}) already exists",
            symbol, market
        ))));
    }

    let mut record = StockRecord::new(symbol.clone(), market);
    if let Some(name) = request.name.filter(|n| !n.trim().is_empty()) {
        record.name = name;
    }
    record.book_value_per_share = request.book_value_per_share;
    record.roe = request.roe;
    if let Some(g) = request.perpetual_growth_rate {
        record.perpetual_growth_rate = g;
    }
    if let Some(r) = request.required_return_rate {
        record.required_return_rate = r;
    }
    if let Some(auto_update) = request.auto_update {
        record.auto_update = auto_update;
    }

    if let Some(inputs) = record.valuation_inputs() {
        let result = state.engine.compute(&inputs)?;
        record.apply_valuation(&result);
    } else {
        validate_assumptions(&record)?;
    }
    record.last_updated = Utc::now();

    state.repository.upsert(&record).await?;
    tracing::info!(symbol = %symbol, market = %market, "Stock added");

    // Fill in market data without holding up the response
    spawn_refresh(&state, symbol, market);

    Ok((StatusCode::CREATED, Json(record)))
}

fn parse_symbol(raw: &str) -> ApiResult<String> {
    let symbol = raw.trim();
    if symbol.is_empty() {
        return Err(ApiError(Error::InvalidInput(
            "symbol must not be empty".into(),
        )));
    }
    Ok(symbol.to_string())
}

fn spawn_refresh(state: &ServiceState, symbol: String, market: Segment) {
    let job = state.job.clone();
    tokio::spawn(async move {
        let outcome = job.run(&symbol, market).await;
        tracing::debug!(symbol = %symbol, market = %market, outcome = ?outcome, "Background refresh finished");
    });
}

/// Add several stocks at once. Existing records are skipped, not replaced.
pub async fn create_stocks_batch(
    State(state): State<Arc<ServiceState>>,
    Json(request): Json<BatchCreateRequest>,
) -> ApiResult<Json<BatchCreateResponse>> {
    // Reject the whole batch before writing anything
    let mut items = Vec::with_capacity(request.stocks.len());
    for item in request.stocks {
        let symbol = parse_symbol(&item.symbol)?;
        let market: Segment = item.market.parse()?;
        items.push((symbol, market, item.name));
    }

    let mut added = Vec::new();
    let mut skipped = Vec::new();
    for (symbol, market, name) in items {
        if state.repository.get(&symbol, market).await?.is_some() {
            tracing::info!(symbol = %symbol, market = %market, "Already watched, skipping");
            skipped.push(symbol);
            continue;
        }

        let mut record = StockRecord::new(symbol.clone(), market);
        if let Some(name) = name.filter(|n| !n.trim().is_empty()) {
            record.name = name;
        }
        state.repository.upsert(&record).await?;
        spawn_refresh(&state, symbol.clone(), market);
        added.push(symbol);
    }

    tracing::info!(added = added.len(), skipped = skipped.len(), "Batch add finished");
    Ok(Json(BatchCreateResponse {
        message: format!("{} added, {} skipped", added.len(), skipped.len()),
        added,
        skipped,
    }))
}

/// Turn scheduled refreshes on or off for one record.
pub async fn set_watchlist(
    State(state): State<Arc<ServiceState>>,
    Path((market, symbol)): Path<(String, String)>,
    Json(request): Json<WatchlistRequest>,
) -> ApiResult<Json<StockRecord>> {
    let market: Segment = market.parse()?;
    let Some(mut record) = state.repository.get(&symbol, market).await? else {
        return Err(ApiError::not_found(format!("{} ({})", symbol, market)));
    };

    let resumed = request.auto_update && !record.auto_update;
    record.auto_update = request.auto_update;
    state.repository.upsert(&record).await?;
    tracing::info!(symbol = %symbol, market = %market, auto_update = record.auto_update, "Watchlist updated");

    // Catch up on data missed while paused
    if resumed {
        spawn_refresh(&state, symbol, market);
    }
    Ok(Json(record))
}

/// Refresh one record now and return it.
pub async fn refresh_stock(
    State(state): State<Arc<ServiceState>>,
    Path((market, symbol)): Path<(String, String)>,
) -> ApiResult<Json<StockRecord>> {
    let market: Segment = market.parse()?;
    let not_found = || ApiError::not_found(format!("{} ({})", symbol, market));
    if state.repository.get(&symbol, market).await?.is_none() {
        return Err(not_found());
    }

    match state.job.run(&symbol, market).await {
        JobOutcome::Updated => {}
        JobOutcome::SkippedNoData => {
            return Err(ApiError::not_found(format!(
                "no market data for {} ({})",
                symbol, market
            )))
        }
        JobOutcome::Failed(failure) => return Err(failure.into()),
    }

    state
        .repository
        .get(&symbol, market)
        .await?
        .map(Json)
        .ok_or_else(not_found)
}

/// Reject assumptions that could never value, even before fundamentals arrive.
fn validate_assumptions(record: &StockRecord) -> ApiResult<()> {
    let g = record.perpetual_growth_rate;
    let r = record.required_return_rate;
    if !g.is_finite() || !r.is_finite() || r <= g {
        return Err(ApiError(Error::InvalidInput(format!(
            "required_return_rate ({}) must exceed perpetual_growth_rate ({})",
            r, g
        ))));
    }
    Ok(())
}

pub async fn delete_stock(
    State(state): State<Arc<ServiceState>>,
    Path((market, symbol)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let market: Segment = market.parse()?;
    if state.repository.delete(&symbol, market).await? {
        tracing::info!(symbol = %symbol, market = %market, "Stock deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("{} ({})", symbol, market)))
    }
}

pub async fn screening(State(state): State<Arc<ServiceState>>) -> ApiResult<Json<ScreeningReport>> {
    let records = state.repository.records(None).await?;
    Ok(Json(screen(&records)))
}
