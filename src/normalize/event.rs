use serde_json::Value;
use tracing::debug;

use crate::error::NormalizeError;
use crate::json::{bool_field, f64_field, i64_field, string_field};
use crate::normalize::classify::market_type_name;
use crate::normalize::ladder::build_ladders;
use crate::types::{
    CanonicalEvent, CanonicalMarket, CanonicalRunner, MarketGroups, RawOdd, SportInfo,
};

/// One payload-shape extractor: pulls the market-record list out of a raw
/// document, or `None` when the document isn't in that shape.
type Extractor = fn(&Value) -> Option<Vec<Value>>;

/// Accepted upstream shapes, tried in order. The first extractor that yields
/// a non-empty list wins.
const EXTRACTORS: &[(&str, Extractor)] = &[
    ("odds.data", extract_odds_data),
    ("highlight.data", extract_highlight_data),
    ("data", extract_data),
    ("bare-list", extract_bare_list),
];

fn extract_odds_data(doc: &Value) -> Option<Vec<Value>> {
    doc.get("odds")?.get("data")?.as_array().cloned()
}

/// `highlight.data` comes either as `{t1: [...], t2: [...]}` (flattened by
/// concatenating t1 then t2) or as a plain list.
fn extract_highlight_data(doc: &Value) -> Option<Vec<Value>> {
    let data = doc.get("highlight")?.get("data")?;
    if let Some(map) = data.as_object() {
        let mut records = Vec::new();
        for key in ["t1", "t2"] {
            if let Some(list) = map.get(key).and_then(Value::as_array) {
                records.extend(list.iter().cloned());
            }
        }
        return Some(records);
    }
    data.as_array().cloned()
}

fn extract_data(doc: &Value) -> Option<Vec<Value>> {
    doc.get("data")?.as_array().cloned()
}

fn extract_bare_list(doc: &Value) -> Option<Vec<Value>> {
    doc.as_array().cloned()
}

/// Locate the market-record list inside a raw document of any accepted shape.
pub fn extract_records(doc: &Value) -> Result<Vec<Value>, NormalizeError> {
    for (shape, extractor) in EXTRACTORS {
        if let Some(records) = extractor(doc) {
            if !records.is_empty() {
                debug!(shape, records = records.len(), "matched payload shape");
                return Ok(records);
            }
        }
    }
    Err(NormalizeError::NoData)
}

#[derive(Debug)]
pub struct NormalizeOutput {
    pub event: CanonicalEvent,
    /// Records dropped because they weren't well-formed objects.
    pub skipped_records: usize,
}

/// Assemble one canonical event document from a raw upstream payload.
///
/// Only a top-level shape mismatch is an error; a malformed individual
/// record or section is skipped and processing continues.
pub fn normalize_event(doc: &Value) -> Result<NormalizeOutput, NormalizeError> {
    let records = extract_records(doc)?;

    // The first record seeds the event-level fields.
    let first = &records[0];
    let mut event = CanonicalEvent {
        eventid: string_field(first, "gmid"),
        event_name: string_field(first, "ename"),
        update_time: None,
        status: "ACTIVE".to_string(),
        inplay: bool_field(first, "iplay"),
        sport: SportInfo::default(),
        is_live_stream: None,
        markets: MarketGroups::new(),
    };

    let mut skipped_records = 0usize;

    for record in &records {
        if !record.is_object() {
            skipped_records += 1;
            continue;
        }
        let Some(sections) = record.get("section").and_then(Value::as_array) else {
            continue;
        };
        if sections.is_empty() {
            continue;
        }

        let mname = string_field(record, "mname");
        let gtype = string_field(record, "gtype");

        let mut market = CanonicalMarket {
            market_id: string_field(record, "mid"),
            market: mname.clone(),
            status: string_field(record, "status"),
            inplay: bool_field(record, "iplay"),
            total_matched: None,
            active: None,
            markettype: market_type_name(&mname, &gtype),
            min: string_field(record, "min"),
            max: string_field(record, "max"),
            runners: Vec::new(),
        };

        for section in sections {
            if !section.is_object() {
                continue;
            }
            market.runners.push(build_runner(section));
        }

        // A market with no runners is never stored.
        if market.runners.is_empty() {
            continue;
        }

        let trimmed = mname.trim();
        let group_key = if trimmed.is_empty() { "unknown" } else { trimmed };
        event.markets.push(group_key, market);
    }

    event.status = aggregate_status(&event.markets);

    Ok(NormalizeOutput { event, skipped_records })
}

fn build_runner(section: &Value) -> CanonicalRunner {
    let raw_odds: Vec<RawOdd> = section
        .get("odds")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter(|e| e.is_object())
                .map(|e| RawOdd {
                    otype: string_field(e, "otype"),
                    odds: f64_field(e, "odds"),
                    size: f64_field(e, "size"),
                })
                .collect()
        })
        .unwrap_or_default();

    let (back, lay) = build_ladders(&raw_odds);

    CanonicalRunner {
        runner_name: string_field(section, "nat").trim().to_string(),
        selection_id: i64_field(section, "sid"),
        status: string_field(section, "gstatus"),
        back,
        lay,
    }
}

/// Aggregate event status from the contained markets' statuses, with
/// precedence SUSPENDED > OPEN > CLOSED > first market's raw status.
/// With no markets at all the seed status stands.
fn aggregate_status(markets: &MarketGroups) -> String {
    let statuses: Vec<&str> = markets.all_markets().map(|m| m.status.as_str()).collect();
    if statuses.is_empty() {
        return "ACTIVE".to_string();
    }
    for wanted in ["SUSPENDED", "OPEN", "CLOSED"] {
        if statuses.iter().any(|s| *s == wanted) {
            return wanted.to_string();
        }
    }
    statuses[0].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec_payload() -> Value {
        json!({
            "odds": {
                "data": [{
                    "gmid": "100",
                    "ename": "E1",
                    "mname": "Match Odds",
                    "mid": "M1",
                    "section": [{
                        "nat": "A",
                        "sid": 1,
                        "odds": [{"otype": "back", "odds": 1.5, "size": 100}]
                    }]
                }]
            }
        })
    }

    #[test]
    fn end_to_end_single_market_payload() {
        let out = normalize_event(&spec_payload()).unwrap();
        let event = out.event;

        assert_eq!(event.eventid, "100");
        assert_eq!(event.event_name, "E1");
        assert_eq!(event.markets.len(), 1);

        let markets = event.markets.get("Match Odds").unwrap();
        assert_eq!(markets.len(), 1);
        let market = &markets[0];
        assert_eq!(market.market_id, "M1");
        assert_eq!(market.markettype, "ODDS");

        assert_eq!(market.runners.len(), 1);
        let runner = &market.runners[0];
        assert_eq!(runner.runner_name, "A");
        assert_eq!(runner.back.len(), 1);
        assert_eq!(runner.back[0].rate, "1.5");
        assert_eq!(runner.back[0].size, 100.0);
        assert_eq!(runner.back[0].level, 0);
        assert!(runner.lay.is_empty());
    }

    #[test]
    fn shape_priority_odds_data_wins_over_data() {
        let doc = json!({
            "odds": {"data": [{"gmid": 1, "ename": "from-odds"}]},
            "data": [{"gmid": 2, "ename": "from-data"}]
        });
        let out = normalize_event(&doc).unwrap();
        assert_eq!(out.event.event_name, "from-odds");
    }

    #[test]
    fn highlight_map_concatenates_t1_then_t2() {
        let doc = json!({
            "highlight": {"data": {
                "t2": [{"gmid": 2, "ename": "second"}],
                "t1": [{"gmid": 1, "ename": "first"}]
            }}
        });
        let records = extract_records(&doc).unwrap();
        assert_eq!(string_field(&records[0], "ename"), "first");
        assert_eq!(string_field(&records[1], "ename"), "second");
    }

    #[test]
    fn bare_list_is_accepted_last() {
        let doc = json!([{"gmid": 7, "ename": "bare"}]);
        let out = normalize_event(&doc).unwrap();
        assert_eq!(out.event.eventid, "7");
    }

    #[test]
    fn unrecognized_shape_is_no_data_not_a_panic() {
        assert_eq!(normalize_event(&json!({"foo": 1})).unwrap_err(), NormalizeError::NoData);
        assert_eq!(normalize_event(&json!({"data": []})).unwrap_err(), NormalizeError::NoData);
        assert_eq!(normalize_event(&json!(null)).unwrap_err(), NormalizeError::NoData);
    }

    #[test]
    fn sectionless_markets_are_excluded() {
        let doc = json!({"data": [
            {"gmid": 1, "ename": "E", "mname": "Match Odds", "mid": "M1"},
            {"gmid": 1, "mname": "Tied Match", "mid": "M2", "section": []},
            {"gmid": 1, "mname": "Bookmaker", "mid": "M3",
             "section": [{"nat": "A", "sid": 1, "odds": [{"otype": "back", "odds": 2.0, "size": 5}]}]}
        ]});
        let out = normalize_event(&doc).unwrap();
        assert_eq!(out.event.markets.len(), 1);
        assert!(out.event.markets.get("Bookmaker").is_some());
    }

    #[test]
    fn markets_group_under_raw_name_not_classified_key() {
        // Two raw names, both classifying to ODDS, must stay separate groups.
        let doc = json!({"data": [
            {"gmid": 1, "ename": "E", "mname": "Match Odds", "mid": "M1",
             "section": [{"nat": "A", "sid": 1}]},
            {"gmid": 1, "mname": "Tied Match", "mid": "M2",
             "section": [{"nat": "B", "sid": 2}]}
        ]});
        let out = normalize_event(&doc).unwrap();
        let keys: Vec<&str> = out.event.markets.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["Match Odds", "Tied Match"]);
        for market in out.event.markets.all_markets() {
            assert_eq!(market.markettype, "ODDS");
        }
    }

    #[test]
    fn empty_market_name_buckets_as_unknown() {
        let doc = json!({"data": [
            {"gmid": 1, "ename": "E", "mid": "M1", "section": [{"nat": "A", "sid": 1}]}
        ]});
        let out = normalize_event(&doc).unwrap();
        assert!(out.event.markets.get("unknown").is_some());
        assert_eq!(out.event.markets.get("unknown").unwrap()[0].markettype, "UNKNOWN");
    }

    #[test]
    fn malformed_records_are_skipped_not_fatal() {
        let doc = json!({"data": [
            {"gmid": 1, "ename": "E", "mname": "Match Odds", "mid": "M1",
             "section": [{"nat": "A", "sid": 1}, "not-an-object"]},
            42
        ]});
        let out = normalize_event(&doc).unwrap();
        assert_eq!(out.skipped_records, 1);
        // Malformed section entry dropped, valid sibling kept.
        assert_eq!(out.event.markets.get("Match Odds").unwrap()[0].runners.len(), 1);
    }

    #[test]
    fn status_aggregation_precedence() {
        let cases = [
            (vec!["OPEN", "SUSPENDED"], "SUSPENDED"),
            (vec!["OPEN", "OPEN"], "OPEN"),
            (vec!["CLOSED"], "CLOSED"),
            (vec!["WEIRD"], "WEIRD"),
            (vec!["WEIRD", "CLOSED", "OPEN"], "OPEN"),
        ];
        for (statuses, expected) in cases {
            let records: Vec<Value> = statuses
                .iter()
                .enumerate()
                .map(|(i, status)| {
                    json!({
                        "gmid": 1, "ename": "E", "mname": format!("Market {i}"),
                        "mid": format!("M{i}"), "status": status,
                        "section": [{"nat": "A", "sid": 1}]
                    })
                })
                .collect();
            let out = normalize_event(&json!({ "data": records })).unwrap();
            assert_eq!(out.event.status, expected, "statuses {statuses:?}");
        }
    }

    #[test]
    fn no_markets_leaves_seed_status() {
        let doc = json!({"data": [{"gmid": 1, "ename": "E"}]});
        let out = normalize_event(&doc).unwrap();
        assert_eq!(out.event.status, "ACTIVE");
        assert!(out.event.is_empty());
    }

    #[test]
    fn numeric_ids_are_stringified() {
        let doc = json!({"data": [
            {"gmid": 5611233, "ename": "E", "mname": "Match Odds", "mid": 901,
             "min": 100, "max": 50000,
             "section": [{"nat": " A ", "sid": 11, "gstatus": "ACTIVE"}]}
        ]});
        let out = normalize_event(&doc).unwrap();
        assert_eq!(out.event.eventid, "5611233");
        let market = &out.event.markets.get("Match Odds").unwrap()[0];
        assert_eq!(market.market_id, "901");
        assert_eq!(market.min, "100");
        assert_eq!(market.max, "50000");
        let runner = &market.runners[0];
        assert_eq!(runner.runner_name, "A");
        assert_eq!(runner.selection_id, 11);
    }
}
