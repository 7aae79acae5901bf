//! Market-id reconciliation: recompute an event's market-id set and count
//! from a fresh odds payload, keeping the parent competition's aggregate in
//! step within the same atomic unit.

use std::collections::HashSet;

use serde_json::Value;

use crate::db::TreeStore;
use crate::error::{AppError, Result};
use crate::json::coerce_string;
use crate::normalize::extract_records;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub event_id: i64,
    pub market_ids: Vec<String>,
}

impl ReconcileSummary {
    pub fn market_count(&self) -> usize {
        self.market_ids.len()
    }
}

/// Every distinct `mid` present in the payload's record list. Order is not
/// significant; absent/odd-shaped payloads yield an empty set.
pub fn extract_market_ids(doc: &Value) -> Vec<String> {
    let Ok(records) = extract_records(doc) else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut mids = Vec::new();
    for record in &records {
        let Some(mid) = record.get("mid").and_then(coerce_string) else {
            continue;
        };
        if mid.is_empty() {
            continue;
        }
        if seen.insert(mid.clone()) {
            mids.push(mid);
        }
    }
    mids
}

/// Reconcile one event's market ids against a raw odds payload.
///
/// All row updates happen against the caller's store/transaction: the event
/// row and, when the event belongs to a competition, the competition's
/// aggregate count. Errors are returned, not swallowed; the fan-out caller
/// logs them with the event identity and moves on.
pub async fn reconcile_event_markets<S: TreeStore>(
    store: &mut S,
    event_id: i64,
    doc: &Value,
) -> Result<ReconcileSummary> {
    let event = store
        .find_event(event_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("event {event_id}")))?;

    let market_ids = extract_market_ids(doc);

    store.update_event_market_ids(event_id, &market_ids).await?;
    if let Some(competition_pk) = event.competition_id {
        store
            .set_competition_market_count(competition_pk, market_ids.len() as i32)
            .await?;
    }

    Ok(ReconcileSummary { event_id, market_ids })
}
