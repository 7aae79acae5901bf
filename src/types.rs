use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ---------------------------------------------------------------------------
// Raw feed records
// ---------------------------------------------------------------------------

/// One entry of a runner's raw price list.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct RawOdd {
    pub otype: String,
    pub odds: f64,
    pub size: f64,
}

impl RawOdd {
    pub fn new(otype: &str, odds: f64, size: f64) -> Self {
        Self { otype: otype.to_string(), odds, size }
    }
}

// ---------------------------------------------------------------------------
// Canonical schema: what gets stored in the cache and served by the API
// ---------------------------------------------------------------------------

/// One price level of a back or lay ladder.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceLevel {
    /// Stringified price, exactly as the feed emitted it.
    pub rate: String,
    pub size: f64,
    /// 0-based position among the kept entries of this side.
    pub level: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CanonicalRunner {
    #[serde(rename = "runnerName")]
    pub runner_name: String,
    #[serde(rename = "selectionId")]
    pub selection_id: i64,
    pub status: String,
    pub back: Vec<PriceLevel>,
    pub lay: Vec<PriceLevel>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CanonicalMarket {
    #[serde(rename = "marketId")]
    pub market_id: String,
    /// Raw display name from the feed.
    pub market: String,
    pub status: String,
    pub inplay: bool,
    #[serde(rename = "totalMatched", default)]
    pub total_matched: Option<f64>,
    #[serde(default)]
    pub active: Option<bool>,
    /// Classified market-type key, uppercased (ODDS, FANCY, ...).
    pub markettype: String,
    pub min: String,
    pub max: String,
    pub runners: Vec<CanonicalRunner>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SportInfo {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CanonicalEvent {
    #[serde(alias = "eventId")]
    pub eventid: String,
    #[serde(rename = "eventName", default)]
    pub event_name: String,
    #[serde(rename = "updateTime", default)]
    pub update_time: Option<String>,
    pub status: String,
    pub inplay: bool,
    #[serde(default)]
    pub sport: SportInfo,
    #[serde(rename = "isLiveStream", default)]
    pub is_live_stream: Option<bool>,
    #[serde(default)]
    pub markets: MarketGroups,
}

impl CanonicalEvent {
    pub fn is_empty(&self) -> bool {
        self.markets.is_empty()
    }
}

// ---------------------------------------------------------------------------
// MarketGroups: insertion-ordered market-name to market-list mapping
// ---------------------------------------------------------------------------

/// Markets bucketed by their raw (trimmed) name, in first-seen feed order.
///
/// Serializes as a JSON object. A plain map would lose the feed's emission
/// order, which downstream consumers rely on, so this is a thin ordered
/// wrapper over the group list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarketGroups(Vec<(String, Vec<CanonicalMarket>)>);

impl MarketGroups {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a market under `key`, creating the group on first sight.
    pub fn push(&mut self, key: &str, market: CanonicalMarket) {
        match self.0.iter_mut().find(|(k, _)| k == key) {
            Some((_, markets)) => markets.push(market),
            None => self.0.push((key.to_string(), vec![market])),
        }
    }

    pub fn get(&self, key: &str) -> Option<&[CanonicalMarket]> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, m)| m.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[CanonicalMarket])> {
        self.0.iter().map(|(k, m)| (k.as_str(), m.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// All markets across all groups, in group order.
    pub fn all_markets(&self) -> impl Iterator<Item = &CanonicalMarket> {
        self.0.iter().flat_map(|(_, m)| m.iter())
    }

    /// Keep only markets matching `pred`; groups left empty are dropped.
    pub fn retain_markets<F>(&mut self, mut pred: F)
    where
        F: FnMut(&CanonicalMarket) -> bool,
    {
        for (_, markets) in &mut self.0 {
            markets.retain(|m| pred(m));
        }
        self.0.retain(|(_, markets)| !markets.is_empty());
    }

    /// Keep only whole groups matching `pred` (key plus its markets).
    pub fn retain_groups<F>(&mut self, mut pred: F)
    where
        F: FnMut(&str, &[CanonicalMarket]) -> bool,
    {
        self.0.retain(|(k, markets)| pred(k, markets));
    }
}

impl Serialize for MarketGroups {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, markets) in &self.0 {
            map.serialize_entry(key, markets)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for MarketGroups {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct GroupsVisitor;

        impl<'de> Visitor<'de> for GroupsVisitor {
            type Value = MarketGroups;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a map of market name to market list")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut groups = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((key, markets)) =
                    access.next_entry::<String, Vec<CanonicalMarket>>()?
                {
                    groups.push((key, markets));
                }
                Ok(MarketGroups(groups))
            }
        }

        deserializer.deserialize_map(GroupsVisitor)
    }
}
