//! Market classification.
//!
//! Single source of truth for market typing: the same key derived here is
//! used when bucketing markets at normalization time and when resolving
//! market-type filters at query time (`crate::query`).

/// Canonical market-type key for a raw market name / group type pair.
///
/// Total over all inputs, including both empty. First match wins.
pub fn market_type_key(mname: &str, gtype: &str) -> String {
    let name = mname.to_lowercase();
    let group = gtype.to_lowercase();

    if name.contains("bookmaker") {
        "bookmaker".to_string()
    } else if name.contains("fancy") || group.contains("fancy") {
        "fancy".to_string()
    } else if name.contains("match") || name.contains("odds") {
        "odds".to_string()
    } else if name.contains("session") {
        "session".to_string()
    } else if name.contains("toss") {
        "toss".to_string()
    } else if name.is_empty() {
        "unknown".to_string()
    } else {
        name.replace(' ', "_")
    }
}

/// Display form of the market type (`markettype` field), always uppercase.
pub fn market_type_name(mname: &str, gtype: &str) -> String {
    market_type_key(mname, gtype).to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_first_match_wins() {
        // "Bookmaker Match" contains both; bookmaker takes priority.
        assert_eq!(market_type_key("Bookmaker Match", ""), "bookmaker");
        assert_eq!(market_type_key("Normal Fancy", ""), "fancy");
        assert_eq!(market_type_key("Match Odds", ""), "odds");
        assert_eq!(market_type_key("Over 10.5 Runs ODDS", ""), "odds");
        assert_eq!(market_type_key("1st Innings Session", ""), "session");
        assert_eq!(market_type_key("Who Wins The Toss", ""), "toss");
    }

    #[test]
    fn fancy_detected_from_group_type() {
        assert_eq!(market_type_key("6 Over Runs", "Fancy2"), "fancy");
    }

    #[test]
    fn fallback_slugifies_the_name() {
        assert_eq!(market_type_key("Completed Innings", ""), "completed_innings");
        assert_eq!(market_type_name("Completed Innings", ""), "COMPLETED_INNINGS");
    }

    #[test]
    fn total_over_empty_inputs() {
        assert_eq!(market_type_key("", ""), "unknown");
        assert_eq!(market_type_name("", ""), "UNKNOWN");
    }

    #[test]
    fn case_insensitive_and_idempotent() {
        assert_eq!(market_type_key("MATCH ODDS", ""), "odds");
        assert_eq!(market_type_key("match odds", ""), "odds");
        // Feeding a derived key back in re-derives the same key.
        let key = market_type_key("Who Wins The Toss", "");
        assert_eq!(market_type_key(&key, ""), key);
    }

    #[test]
    fn display_names_match_canonical_table() {
        assert_eq!(market_type_name("Bookmaker", ""), "BOOKMAKER");
        assert_eq!(market_type_name("Normal Fancy", ""), "FANCY");
        assert_eq!(market_type_name("Match Odds", ""), "ODDS");
        assert_eq!(market_type_name("Session Runs", ""), "SESSION");
        assert_eq!(market_type_name("Toss", ""), "TOSS");
    }
}
