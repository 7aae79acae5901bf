//! Tree synchronizer: upserts the sport → competition → event hierarchy
//! from a raw tree payload.
//!
//! Insert-only by policy: once a row exists for its unique key it is never
//! mutated, even when the upstream name drifts on a later sync. Running the
//! same input twice is a no-op.

use chrono::NaiveDateTime;
use serde_json::Value;
use tracing::warn;

use crate::db::{NewEvent, TreeStore, TreeVariant};
use crate::error::Result;
use crate::json::{coerce_i64, string_field};

/// Upstream `sdatetime` format, e.g. `01/30/2026 07:30:00 PM`.
const OPEN_DATE_FORMAT: &str = "%m/%d/%Y %I:%M:%S %p";

#[derive(Debug, Default, PartialEq, Eq)]
pub struct TreeSyncSummary {
    pub sports_created: usize,
    pub competitions_created: usize,
    pub events_created: usize,
    /// Items missing their upstream id, dropped.
    pub skipped_items: usize,
}

/// Synchronize one raw tree document into the store.
///
/// The caller owns atomicity: wrap the store in a transaction and commit only
/// on `Ok` (`PgTreeStore::begin` / `commit`).
pub async fn sync_tree<S: TreeStore>(store: &mut S, doc: &Value) -> Result<TreeSyncSummary> {
    let mut summary = TreeSyncSummary::default();
    let data = doc.get("data");

    for sport_item in list_at(data, "t1") {
        let Some(sport) = find_or_create_sport(store, sport_item, TreeVariant::T1, &mut summary)
            .await?
        else {
            continue;
        };

        for comp_item in children(sport_item) {
            let Some(cid) = comp_item.get("cid").and_then(coerce_i64) else {
                summary.skipped_items += 1;
                continue;
            };
            let competition = match store.find_competition(cid, sport.id).await? {
                Some(existing) => existing,
                None => {
                    summary.competitions_created += 1;
                    store
                        .create_competition(
                            cid,
                            &string_field(comp_item, "name"),
                            &string_field(comp_item, "region"),
                            sport.id,
                        )
                        .await?
                }
            };

            for event_item in children(comp_item) {
                create_event_if_absent(
                    store,
                    event_item,
                    sport.id,
                    Some(competition.id),
                    &mut summary,
                )
                .await?;
            }
        }
    }

    for sport_item in list_at(data, "t2") {
        let Some(sport) = find_or_create_sport(store, sport_item, TreeVariant::T2, &mut summary)
            .await?
        else {
            continue;
        };

        for event_item in children(sport_item) {
            create_event_if_absent(store, event_item, sport.id, None, &mut summary).await?;
        }
    }

    Ok(summary)
}

async fn find_or_create_sport<S: TreeStore>(
    store: &mut S,
    item: &Value,
    tree: TreeVariant,
    summary: &mut TreeSyncSummary,
) -> Result<Option<crate::db::SportRow>> {
    let Some(etid) = item.get("etid").and_then(coerce_i64) else {
        summary.skipped_items += 1;
        return Ok(None);
    };
    match store.find_sport(etid, tree).await? {
        Some(existing) => Ok(Some(existing)),
        None => {
            summary.sports_created += 1;
            let row = store
                .create_sport(
                    etid,
                    item.get("oid").and_then(coerce_i64),
                    tree,
                    &string_field(item, "name"),
                )
                .await?;
            Ok(Some(row))
        }
    }
}

async fn create_event_if_absent<S: TreeStore>(
    store: &mut S,
    item: &Value,
    sport_id: i64,
    competition_id: Option<i64>,
    summary: &mut TreeSyncSummary,
) -> Result<()> {
    let Some(gmid) = item.get("gmid").and_then(coerce_i64) else {
        summary.skipped_items += 1;
        return Ok(());
    };
    if store.event_exists(gmid).await? {
        return Ok(());
    }

    summary.events_created += 1;
    store
        .create_event(NewEvent {
            event_id: gmid,
            name: string_field(item, "name"),
            sport_id,
            competition_id,
            open_date: parse_open_date(item),
        })
        .await?;
    Ok(())
}

/// `sdatetime` is optional and occasionally malformed; a bad value is logged
/// and left NULL rather than aborting the sync.
fn parse_open_date(item: &Value) -> Option<NaiveDateTime> {
    let raw = item.get("sdatetime")?.as_str()?;
    match NaiveDateTime::parse_from_str(raw, OPEN_DATE_FORMAT) {
        Ok(date) => Some(date),
        Err(e) => {
            warn!(sdatetime = raw, "failed to parse event open date: {e}");
            None
        }
    }
}

fn list_at<'a>(data: Option<&'a Value>, key: &str) -> impl Iterator<Item = &'a Value> {
    data.and_then(|d| d.get(key))
        .and_then(Value::as_array)
        .map(|v| v.as_slice())
        .unwrap_or_default()
        .iter()
}

fn children(item: &Value) -> impl Iterator<Item = &Value> {
    item.get("children")
        .and_then(Value::as_array)
        .map(|v| v.as_slice())
        .unwrap_or_default()
        .iter()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::InMemoryTreeStore;
    use serde_json::json;

    fn tree_doc() -> Value {
        json!({"data": {
            "t1": [{
                "etid": 4, "oid": 4, "name": "Cricket",
                "children": [{
                    "cid": 101, "name": "Big League", "region": "IN",
                    "children": [
                        {"gmid": 5611233, "name": "A v B"},
                        {"gmid": 5611234, "name": "C v D"}
                    ]
                }]
            }],
            "t2": [{
                "etid": 2, "oid": 2, "name": "Tennis",
                "children": [
                    {"gmid": 7700001, "name": "E v F", "sdatetime": "01/30/2026 07:30:00 PM"}
                ]
            }]
        }})
    }

    #[tokio::test]
    async fn builds_both_hierarchies() {
        let mut store = InMemoryTreeStore::new();
        let summary = sync_tree(&mut store, &tree_doc()).await.unwrap();

        assert_eq!(summary.sports_created, 2);
        assert_eq!(summary.competitions_created, 1);
        assert_eq!(summary.events_created, 3);

        let t2_event = store.events.iter().find(|e| e.event_id == 7700001).unwrap();
        assert!(t2_event.competition_id.is_none());
        assert_eq!(
            t2_event.open_date.unwrap().format("%Y-%m-%d %H:%M").to_string(),
            "2026-01-30 19:30"
        );

        let t1_event = store.events.iter().find(|e| e.event_id == 5611233).unwrap();
        assert!(t1_event.competition_id.is_some());
    }

    #[tokio::test]
    async fn running_twice_is_idempotent() {
        let mut store = InMemoryTreeStore::new();
        sync_tree(&mut store, &tree_doc()).await.unwrap();
        let rows_after_first = store.row_count();

        let summary = sync_tree(&mut store, &tree_doc()).await.unwrap();
        assert_eq!(summary, TreeSyncSummary::default());
        assert_eq!(store.row_count(), rows_after_first);
    }

    #[tokio::test]
    async fn existing_rows_are_never_mutated() {
        let mut store = InMemoryTreeStore::new();
        sync_tree(&mut store, &tree_doc()).await.unwrap();

        // Same keys, drifted names.
        let mut renamed = tree_doc();
        renamed["data"]["t1"][0]["name"] = json!("Cricket Renamed");
        renamed["data"]["t1"][0]["children"][0]["children"][0]["name"] = json!("A v B (late)");
        sync_tree(&mut store, &renamed).await.unwrap();

        assert_eq!(store.sports.iter().find(|s| s.tree == "t1").unwrap().name, "Cricket");
        assert_eq!(
            store.events.iter().find(|e| e.event_id == 5611233).unwrap().name,
            "A v B"
        );
    }

    #[tokio::test]
    async fn same_etid_in_both_trees_makes_two_sports() {
        let mut store = InMemoryTreeStore::new();
        let doc = json!({"data": {
            "t1": [{"etid": 4, "name": "Cricket", "children": []}],
            "t2": [{"etid": 4, "name": "Cricket", "children": []}]
        }});
        let summary = sync_tree(&mut store, &doc).await.unwrap();
        assert_eq!(summary.sports_created, 2);
    }

    #[tokio::test]
    async fn bad_open_date_is_left_null_and_sync_continues() {
        let mut store = InMemoryTreeStore::new();
        let doc = json!({"data": {"t2": [{
            "etid": 2, "name": "Tennis",
            "children": [
                {"gmid": 1, "name": "bad date", "sdatetime": "2026-01-30T19:30:00Z"},
                {"gmid": 2, "name": "no date"}
            ]
        }]}});
        let summary = sync_tree(&mut store, &doc).await.unwrap();
        assert_eq!(summary.events_created, 2);
        assert!(store.events.iter().all(|e| e.open_date.is_none()));
    }

    #[tokio::test]
    async fn items_without_ids_are_skipped() {
        let mut store = InMemoryTreeStore::new();
        let doc = json!({"data": {
            "t1": [{"name": "no etid", "children": []}],
            "t2": [{"etid": 2, "name": "Tennis", "children": [{"name": "no gmid"}]}]
        }});
        let summary = sync_tree(&mut store, &doc).await.unwrap();
        assert_eq!(summary.skipped_items, 2);
        assert_eq!(summary.sports_created, 1);
        assert_eq!(summary.events_created, 0);
    }

    #[tokio::test]
    async fn missing_data_section_is_an_empty_sync() {
        let mut store = InMemoryTreeStore::new();
        let summary = sync_tree(&mut store, &json!({})).await.unwrap();
        assert_eq!(summary, TreeSyncSummary::default());
    }
}
