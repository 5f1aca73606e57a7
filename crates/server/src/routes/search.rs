use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use registry::RegistryReader;
use search::{SearchEnvelope, SearchError, SearchMode, SearchRequest};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;

use crate::error::ServerResult;
use crate::middleware::CallerId;
use crate::state::ServerState;

/// `POST /api/v1/search` body. Unknown fields are rejected outright so a
/// misspelled knob fails loudly instead of being silently ignored.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchBody {
    pub query: String,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub min_score: Option<f32>,
    #[serde(default)]
    pub domain_filter: Option<Vec<String>>,
    #[serde(default)]
    pub capability_filter: Option<Vec<String>>,
    #[serde(default)]
    pub response_mode: Option<String>,
    #[serde(default)]
    pub include_orchestration: Option<bool>,
    #[serde(default)]
    pub include_schemas: Option<bool>,
    #[serde(default)]
    pub include_examples: Option<bool>,
    #[serde(default)]
    pub field_projection: Option<Vec<String>>,
}

/// `GET /api/v1/search` query string; array-valued fields arrive
/// comma-separated.
#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub query: String,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub min_score: Option<f32>,
    #[serde(default)]
    pub domain_filter: Option<String>,
    #[serde(default)]
    pub capability_filter: Option<String>,
    #[serde(default)]
    pub response_mode: Option<String>,
    #[serde(default)]
    pub include_orchestration: Option<bool>,
    #[serde(default)]
    pub include_schemas: Option<bool>,
    #[serde(default)]
    pub include_examples: Option<bool>,
    #[serde(default)]
    pub field_projection: Option<String>,
}

impl From<SearchParams> for SearchBody {
    fn from(p: SearchParams) -> Self {
        SearchBody {
            query: p.query,
            mode: p.mode,
            limit: p.limit,
            min_score: p.min_score,
            domain_filter: p.domain_filter.as_deref().map(split_csv),
            capability_filter: p.capability_filter.as_deref().map(split_csv),
            response_mode: p.response_mode,
            include_orchestration: p.include_orchestration,
            include_schemas: p.include_schemas,
            include_examples: p.include_examples,
            field_projection: p.field_projection.as_deref().map(split_csv),
        }
    }
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

fn build_request(body: SearchBody) -> ServerResult<SearchRequest> {
    let mode: SearchMode = match body.mode.as_deref() {
        Some(raw) => raw.parse()?,
        None => SearchMode::default(),
    };
    let mut req = SearchRequest::new(&body.query, mode)?;
    if let Some(limit) = body.limit {
        req = req.with_limit(limit);
    }
    if let Some(min_score) = body.min_score {
        req = req.with_min_score(min_score);
    }
    if let Some(raw) = body.response_mode.as_deref() {
        req = req.with_response_mode(raw.parse()?);
    }
    if let Some(domains) = body.domain_filter {
        req = req.with_domains(domains);
    }
    if let Some(capabilities) = body.capability_filter {
        req = req.with_capabilities(capabilities);
    }
    if let Some(v) = body.include_orchestration {
        req.include_orchestration = v;
    }
    if let Some(v) = body.include_schemas {
        req.include_schemas = v;
    }
    if let Some(v) = body.include_examples {
        req.include_examples = v;
    }
    if let Some(fields) = body.field_projection {
        req.field_projection = Some(fields);
    }
    Ok(req)
}

pub async fn search_post(
    State(state): State<Arc<ServerState>>,
    Extension(caller): Extension<CallerId>,
    payload: Result<Json<SearchBody>, JsonRejection>,
) -> ServerResult<Json<SearchEnvelope>> {
    let Json(body) = payload?;
    let req = build_request(body)?;
    run_search(&state, &caller, req).await
}

pub async fn search_get(
    State(state): State<Arc<ServerState>>,
    Extension(caller): Extension<CallerId>,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> ServerResult<Json<SearchEnvelope>> {
    let Query(params) = params?;
    let req = build_request(params.into())?;
    run_search(&state, &caller, req).await
}

#[derive(Debug, Deserialize)]
pub struct SimilarParams {
    #[serde(default)]
    pub limit: Option<usize>,
}

/// `GET /similar/{service_id}`: search with the composed text of the
/// service as the query, excluding the service itself.
pub async fn similar(
    State(state): State<Arc<ServerState>>,
    Extension(caller): Extension<CallerId>,
    Path(service_id): Path<i64>,
    Query(params): Query<SimilarParams>,
) -> ServerResult<Json<SearchEnvelope>> {
    let service = state
        .registry
        .service(service_id)?
        .ok_or_else(|| SearchError::NotFound(format!("service {service_id}")))?;
    let req = SearchRequest::new(&service.name, SearchMode::AgentsOnly)?
        .with_limit(params.limit.unwrap_or(10));

    let start = Instant::now();
    let deadline = start + state.query_timeout;
    let outcome = match tokio::time::timeout(
        state.query_timeout,
        state
            .stack
            .planner
            .similar_services(service_id, req.limit, Some(deadline)),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(SearchError::Cancelled),
    };
    let elapsed = start.elapsed().as_millis() as u64;
    finish(&state, &caller, &req, outcome, elapsed)
}

async fn run_search(
    state: &Arc<ServerState>,
    caller: &CallerId,
    req: SearchRequest,
) -> ServerResult<Json<SearchEnvelope>> {
    let start = Instant::now();
    let deadline = start + state.query_timeout;
    let outcome = match tokio::time::timeout(
        state.query_timeout,
        state.stack.planner.search(&req, Some(deadline)),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(SearchError::Cancelled),
    };
    let elapsed = start.elapsed().as_millis() as u64;
    finish(state, caller, &req, outcome, elapsed)
}

/// Shape the outcome, emit the one per-query telemetry record, and update
/// the counters. `search_time_ms` covers planner time only; response
/// serialization happens after the clock stops.
fn finish(
    state: &Arc<ServerState>,
    caller: &CallerId,
    req: &SearchRequest,
    outcome: Result<Vec<search::RankedResult>, SearchError>,
    elapsed: u64,
) -> ServerResult<Json<SearchEnvelope>> {
    state.count_query(caller.as_str());
    metrics::counter!("search_queries_total").increment(1);

    match outcome {
        Ok(results) => {
            let envelope = state.stack.shaper.shape(req, &results, elapsed)?;
            metrics::histogram!("search_time_ms").record(elapsed as f64);
            tracing::info!(
                caller_id = caller.as_str(),
                mode = req.mode.as_str(),
                response_mode = req.response_mode.as_str(),
                limit = req.limit,
                total_results = envelope.total_results,
                search_time_ms = elapsed,
                "search query"
            );
            Ok(Json(envelope))
        }
        Err(e) => {
            metrics::counter!("search_errors_total").increment(1);
            tracing::info!(
                caller_id = caller.as_str(),
                mode = req.mode.as_str(),
                response_mode = req.response_mode.as_str(),
                limit = req.limit,
                search_time_ms = elapsed,
                error = %e,
                "search query failed"
            );
            Err(e.into())
        }
    }
}
