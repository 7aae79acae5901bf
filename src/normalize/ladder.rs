use crate::types::{PriceLevel, RawOdd};

/// Build the back and lay ladders for one runner from its raw price list.
///
/// Entries with a non-positive price are discarded. The feed's emission order
/// is authoritative (assumed best-to-worst), so no sorting happens here;
/// `level` is re-assigned from 0 after filtering.
pub fn build_ladders(odds: &[RawOdd]) -> (Vec<PriceLevel>, Vec<PriceLevel>) {
    (side_ladder(odds, "back"), side_ladder(odds, "lay"))
}

fn side_ladder(odds: &[RawOdd], side: &str) -> Vec<PriceLevel> {
    odds.iter()
        .filter(|o| o.otype == side && o.odds > 0.0)
        .enumerate()
        .map(|(level, o)| PriceLevel {
            rate: o.odds.to_string(),
            size: o.size,
            level,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sides_are_split_and_levels_reindexed() {
        let odds = vec![
            RawOdd::new("back", 1.5, 100.0),
            RawOdd::new("lay", 1.6, 50.0),
            RawOdd::new("back", 0.0, 999.0),
            RawOdd::new("back", 1.4, 200.0),
            RawOdd::new("lay", 1.7, 75.0),
        ];
        let (back, lay) = build_ladders(&odds);

        let back_levels: Vec<usize> = back.iter().map(|l| l.level).collect();
        assert_eq!(back_levels, vec![0, 1]);
        assert_eq!(back[0].rate, "1.5");
        assert_eq!(back[1].rate, "1.4");

        let lay_levels: Vec<usize> = lay.iter().map(|l| l.level).collect();
        assert_eq!(lay_levels, vec![0, 1]);
        assert_eq!(lay[0].rate, "1.6");
        assert_eq!(lay[1].rate, "1.7");
    }

    #[test]
    fn non_positive_prices_never_appear() {
        let odds = vec![
            RawOdd::new("back", 0.0, 10.0),
            RawOdd::new("back", -2.0, 10.0),
            RawOdd::new("lay", 0.0, 10.0),
        ];
        let (back, lay) = build_ladders(&odds);
        assert!(back.is_empty());
        assert!(lay.is_empty());
    }

    #[test]
    fn empty_input_yields_empty_ladders() {
        let (back, lay) = build_ladders(&[]);
        assert!(back.is_empty());
        assert!(lay.is_empty());
    }

    #[test]
    fn source_order_is_kept_without_price_sorting() {
        // Out of best-to-worst order on purpose; the builder must not re-sort.
        let odds = vec![
            RawOdd::new("back", 2.0, 10.0),
            RawOdd::new("back", 5.0, 10.0),
            RawOdd::new("back", 3.0, 10.0),
        ];
        let (back, _) = build_ladders(&odds);
        let rates: Vec<&str> = back.iter().map(|l| l.rate.as_str()).collect();
        assert_eq!(rates, vec!["2", "5", "3"]);
    }

    #[test]
    fn size_passes_through_unmodified() {
        let odds = vec![RawOdd::new("back", 1.25, 1234.56)];
        let (back, _) = build_ladders(&odds);
        assert_eq!(back[0].size, 1234.56);
    }
}
