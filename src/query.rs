//! Cache-backed query engine: locate a canonical event document and answer
//! filtered views over its markets.

use serde_json::Value;
use tracing::warn;

use crate::cache::CacheStore;
use crate::error::CacheError;
use crate::json::coerce_string;
use crate::normalize::classify::market_type_key;
use crate::types::CanonicalEvent;

/// Map a caller-facing market-type token to a classifier key.
/// Unmapped tokens fall back to their lowercased form.
pub fn market_type_synonym(token: &str) -> String {
    match token.to_uppercase().as_str() {
        "MATCH_ODDS" => "odds".to_string(),
        "BOOKMAKER" => "bookmaker".to_string(),
        "FANCY" => "fancy".to_string(),
        "SESSION" => "session".to_string(),
        "TOSS" => "toss".to_string(),
        _ => token.to_lowercase(),
    }
}

/// Locate the cached canonical event for `event_id`.
///
/// Lookup order: the degraded direct key `odds:{event_id}`, then a scan over
/// `odds:*:*` comparing each document's stored event id, then a last-chance
/// exact-suffix scan `odds:*:{event_id}`. A read error on an individual key
/// is logged and treated as a miss for that key only.
pub async fn find_event<C: CacheStore + ?Sized>(
    cache: &C,
    event_id: &str,
) -> Result<Option<CanonicalEvent>, CacheError> {
    if let Some(event) = load_event(cache, &format!("odds:{event_id}")).await {
        return Ok(Some(event));
    }

    for key in cache.scan_keys("odds:*:*").await? {
        let Some(value) = load_value(cache, &key).await else {
            continue;
        };
        if stored_event_id(&value).as_deref() == Some(event_id) {
            if let Some(event) = parse_event(&key, value) {
                return Ok(Some(event));
            }
        }
    }

    for key in cache.scan_keys(&format!("odds:*:{event_id}")).await? {
        if let Some(event) = load_event(cache, &key).await {
            return Ok(Some(event));
        }
    }

    Ok(None)
}

/// Keep only markets whose id is in `market_ids`; groups left empty by the
/// filter are dropped.
pub fn filter_by_market_ids(event: &mut CanonicalEvent, market_ids: &[String]) {
    event
        .markets
        .retain_markets(|m| market_ids.iter().any(|id| id == &m.market_id));
}

/// Keep only market groups matching a market-type token.
///
/// A group matches when the token equals the group key or any contained
/// market's display name (case-insensitive), or when the synonym-mapped
/// token equals the group's classifier key, the same classifier that
/// bucketed the markets at normalization time.
pub fn filter_by_market_type(event: &mut CanonicalEvent, market_type: &str) {
    let token = market_type.to_lowercase();
    let mapped = market_type_synonym(market_type);

    event.markets.retain_groups(|key, markets| {
        key.to_lowercase() == token
            || markets.iter().any(|m| m.market.to_lowercase() == token)
            || market_type_key(key, "") == mapped
    });
}

#[derive(Debug)]
pub struct MarketIdHit {
    pub market_id: String,
    pub event: CanonicalEvent,
}

#[derive(Debug, Default)]
pub struct MarketIdSearch {
    pub found: Vec<MarketIdHit>,
    pub not_found: Vec<String>,
}

/// Bulk variant: scan every cached odds document and resolve each requested
/// market id to the first event carrying it. Ids with no owner are reported
/// in `not_found`.
pub async fn find_by_market_ids<C: CacheStore + ?Sized>(
    cache: &C,
    market_ids: &[String],
) -> Result<MarketIdSearch, CacheError> {
    let mut events: Vec<CanonicalEvent> = Vec::new();
    for key in cache.scan_keys("odds:*").await? {
        if let Some(event) = load_event(cache, &key).await {
            events.push(event);
        }
    }

    let mut search = MarketIdSearch::default();
    for market_id in market_ids {
        let owner = events
            .iter()
            .find(|e| e.markets.all_markets().any(|m| &m.market_id == market_id));
        match owner {
            Some(event) => search.found.push(MarketIdHit {
                market_id: market_id.clone(),
                event: event.clone(),
            }),
            None => search.not_found.push(market_id.clone()),
        }
    }
    Ok(search)
}

async fn load_value<C: CacheStore + ?Sized>(cache: &C, key: &str) -> Option<Value> {
    match cache.get(key).await {
        Ok(value) => value,
        Err(e) => {
            warn!(key, "cache read failed, treating as miss: {e}");
            None
        }
    }
}

async fn load_event<C: CacheStore + ?Sized>(cache: &C, key: &str) -> Option<CanonicalEvent> {
    let value = load_value(cache, key).await?;
    parse_event(key, value)
}

fn parse_event(key: &str, value: Value) -> Option<CanonicalEvent> {
    match serde_json::from_value(value) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(key, "unparseable cached odds document skipped: {e}");
            None
        }
    }
}

/// Stored documents carry the id as `eventid` (canonical) or `eventId`
/// (older writers), occasionally numeric.
fn stored_event_id(value: &Value) -> Option<String> {
    value
        .get("eventid")
        .and_then(coerce_string)
        .or_else(|| value.get("eventId").and_then(coerce_string))
}
