use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::PgPool;
use tracing::warn;

use crate::cache::CacheStore;
use crate::db;
use crate::error::AppError;
use crate::feed::FeedClient;
use crate::query;
use crate::scheduler::HealthState;
use crate::types::CanonicalEvent;

#[derive(Clone)]
pub struct ApiState {
    pub pool: PgPool,
    pub cache: Arc<dyn CacheStore>,
    pub feed: Arc<FeedClient>,
    pub health: HealthState,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/sports", get(list_sports))
        .route("/api/:event_type_id/competitions", get(list_competitions))
        .route("/api/:event_type_id/:competition_id/events", get(list_events))
        .route("/api/odds/by-market-ids", post(odds_by_market_ids))
        .route("/api/odds/:event_id", get(get_odds).post(filter_odds))
        .route("/api/odds/:event_id/:market_type", post(filter_odds_by_type))
        .route("/api/feed/tree", get(feed_tree))
        .route("/api/feed/odds", get(feed_odds))
        .route("/api/feed/highlight", get(feed_highlight))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request bodies / params
// ---------------------------------------------------------------------------

/// Market-id filters arrive either wrapped (`{"market_ids": [...]}`) or as a
/// bare list.
#[derive(Deserialize)]
#[serde(untagged)]
enum MarketIdsBody {
    Wrapped {
        #[serde(default)]
        market_ids: Vec<String>,
    },
    Bare(Vec<String>),
}

impl MarketIdsBody {
    fn into_ids(self) -> Vec<String> {
        match self {
            MarketIdsBody::Wrapped { market_ids } => market_ids,
            MarketIdsBody::Bare(ids) => ids,
        }
    }
}

#[derive(Deserialize)]
struct FeedOddsParams {
    sport_id: i64,
    event_id: i64,
}

#[derive(Deserialize)]
struct FeedHighlightParams {
    etid: i64,
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

async fn health(State(state): State<ApiState>) -> (StatusCode, Json<Value>) {
    let last_sync = state.health.last_sync_time.read().await;
    let last_count = state.health.last_event_count.read().await;
    let errors = state.health.error_count.read().await;

    let status = if *errors > 5 { "degraded" } else { "ok" };
    let http_status = if *errors > 10 {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (
        http_status,
        Json(json!({
            "service": "exchange-odds",
            "version": env!("CARGO_PKG_VERSION"),
            "status": status,
            "last_sync": last_sync.map(|t| t.to_rfc3339()),
            "last_event_count": *last_count,
            "consecutive_errors": *errors,
        })),
    )
}

// ---------------------------------------------------------------------------
// Hierarchy listings
// ---------------------------------------------------------------------------

async fn list_sports(State(state): State<ApiState>) -> Result<Json<Value>, AppError> {
    let sports = db::list_sports(&state.pool).await?;
    Ok(Json(json!({
        "status": true,
        "message": "Sports fetched successfully",
        "data": sports,
    })))
}

async fn list_competitions(
    State(state): State<ApiState>,
    Path(event_type_id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    let Some(sport) = db::find_sport_by_event_type(&state.pool, event_type_id).await? else {
        return Ok(Json(not_found_envelope("Sport not found")));
    };
    let competitions = db::competitions_for_sport(&state.pool, sport.id).await?;
    Ok(Json(json!({
        "status": true,
        "message": "Competition data fetched successfully",
        "sport": sport,
        "competitions": competitions,
    })))
}

async fn list_events(
    State(state): State<ApiState>,
    Path((event_type_id, competition_id)): Path<(i64, i64)>,
) -> Result<Json<Value>, AppError> {
    let Some(sport) = db::find_sport_by_event_type(&state.pool, event_type_id).await? else {
        return Ok(Json(not_found_envelope("Sport not found")));
    };
    let Some(competition) =
        db::find_competition_for_sport(&state.pool, sport.id, competition_id).await?
    else {
        return Ok(Json(not_found_envelope("Competition not found")));
    };
    let events = db::events_for_competition(&state.pool, competition.id).await?;
    if events.is_empty() {
        return Ok(Json(not_found_envelope("No events found")));
    }
    Ok(Json(json!({
        "status": true,
        "message": "Events fetched successfully",
        "sport": sport,
        "competition": competition,
        "events": events,
    })))
}

fn not_found_envelope(message: &str) -> Value {
    json!({ "status": false, "message": message })
}

// ---------------------------------------------------------------------------
// Cached odds queries
// ---------------------------------------------------------------------------

async fn get_odds(
    State(state): State<ApiState>,
    Path(event_id): Path<String>,
) -> (StatusCode, Json<Value>) {
    match lookup_event(&state, &event_id).await {
        Some(event) => (StatusCode::OK, Json(event_response(&event))),
        None => odds_not_found(&event_id),
    }
}

async fn filter_odds(
    State(state): State<ApiState>,
    Path(event_id): Path<String>,
    Json(body): Json<MarketIdsBody>,
) -> (StatusCode, Json<Value>) {
    filtered_odds(&state, &event_id, body.into_ids(), None).await
}

async fn filter_odds_by_type(
    State(state): State<ApiState>,
    Path((event_id, market_type)): Path<(String, String)>,
    Json(body): Json<MarketIdsBody>,
) -> (StatusCode, Json<Value>) {
    filtered_odds(&state, &event_id, body.into_ids(), Some(market_type)).await
}

async fn filtered_odds(
    state: &ApiState,
    event_id: &str,
    market_ids: Vec<String>,
    market_type: Option<String>,
) -> (StatusCode, Json<Value>) {
    let Some(mut event) = lookup_event(state, event_id).await else {
        return odds_not_found(event_id);
    };
    if !market_ids.is_empty() {
        query::filter_by_market_ids(&mut event, &market_ids);
    }
    if let Some(market_type) = market_type {
        query::filter_by_market_type(&mut event, &market_type);
    }
    (StatusCode::OK, Json(event_response(&event)))
}

async fn odds_by_market_ids(
    State(state): State<ApiState>,
    Json(body): Json<MarketIdsBody>,
) -> (StatusCode, Json<Value>) {
    let market_ids = body.into_ids();
    if market_ids.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "error": "market_ids is required", "data": {} })),
        );
    }

    let search = match query::find_by_market_ids(state.cache.as_ref(), &market_ids).await {
        Ok(search) => search,
        Err(e) => {
            warn!("bulk market-id search degraded to empty: {e}");
            return (
                StatusCode::OK,
                Json(json!({ "success": true, "data": [], "not_found": market_ids })),
            );
        }
    };

    let data: Vec<Value> = search
        .found
        .iter()
        .map(|hit| json!({ "marketId": hit.market_id, "event": event_response(&hit.event) }))
        .collect();
    (
        StatusCode::OK,
        Json(json!({ "success": true, "data": data, "not_found": search.not_found })),
    )
}

/// Cache failures degrade to a miss; the read API never turns them into a
/// server error.
async fn lookup_event(state: &ApiState, event_id: &str) -> Option<CanonicalEvent> {
    match query::find_event(state.cache.as_ref(), event_id).await {
        Ok(found) => found,
        Err(e) => {
            warn!(event_id, "odds lookup degraded to empty: {e}");
            None
        }
    }
}

fn odds_not_found(event_id: &str) -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "success": false,
            "error": format!("No odds data found for event {event_id}"),
            "data": {},
        })),
    )
}

/// Response document: the canonical event plus the legacy `eventId` echo
/// older consumers still read.
fn event_response(event: &CanonicalEvent) -> Value {
    let mut value = serde_json::to_value(event).unwrap_or_else(|_| json!({}));
    if let Some(map) = value.as_object_mut() {
        map.insert("eventId".to_string(), json!(event.eventid));
    }
    value
}

// ---------------------------------------------------------------------------
// Live feed proxies
// ---------------------------------------------------------------------------

async fn feed_tree(State(state): State<ApiState>) -> Result<Json<Value>, AppError> {
    let data = state.feed.fetch_tree_record().await?;
    Ok(Json(json!({ "message": "Tree data fetched successfully", "data": data })))
}

async fn feed_odds(
    State(state): State<ApiState>,
    Query(params): Query<FeedOddsParams>,
) -> Result<Json<Value>, AppError> {
    let data = state.feed.fetch_odds(params.sport_id, params.event_id).await?;
    Ok(Json(json!({ "odds": data })))
}

async fn feed_highlight(
    State(state): State<ApiState>,
    Query(params): Query<FeedHighlightParams>,
) -> Result<Json<Value>, AppError> {
    let data = state.feed.fetch_highlight(params.etid).await?;
    Ok(Json(json!({ "highlight": data })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize_event;

    #[test]
    fn market_ids_body_accepts_both_shapes() {
        let wrapped: MarketIdsBody =
            serde_json::from_str(r#"{"market_ids": ["1", "2"]}"#).unwrap();
        assert_eq!(wrapped.into_ids(), vec!["1", "2"]);

        let bare: MarketIdsBody = serde_json::from_str(r#"["3"]"#).unwrap();
        assert_eq!(bare.into_ids(), vec!["3"]);

        let empty: MarketIdsBody = serde_json::from_str("{}").unwrap();
        assert!(empty.into_ids().is_empty());
    }

    #[test]
    fn event_response_echoes_event_id() {
        let event = normalize_event(&json!({"data": [{
            "gmid": "100", "ename": "E1", "mname": "Match Odds", "mid": "M1",
            "section": [{"nat": "A", "sid": 1}]
        }]}))
        .unwrap()
        .event;

        let value = event_response(&event);
        assert_eq!(value["eventid"], "100");
        assert_eq!(value["eventId"], "100");
        assert!(value["markets"].get("Match Odds").is_some());
    }
}
