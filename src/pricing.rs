//! Price resolution over the cached card catalog.

use crate::catalog::CatalogCard;

/// Pick the most trustworthy USD price for one printing of a card.
///
/// The head of the marketplace quote list outranks the historical per-set
/// listing price, and unparseable price strings fall through silently.
/// Returns `None` when no candidate parses; callers keep the previously
/// stored price rather than fabricating a zero.
pub fn resolve_price(card: &CatalogCard, set_code: &str) -> Option<f64> {
    if let Some(quote) = card.quotes.first()
        && let Some(price) = parse_price(&quote.price)
    {
        return Some(price);
    }

    card.sets
        .iter()
        .find(|set| set.set_code == set_code)
        .and_then(|set| parse_price(&set.set_price))
}

fn parse_price(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|p| p.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CardSet, CatalogCard, PriceQuote};

    fn card(quote: &str, set_price: &str) -> CatalogCard {
        CatalogCard {
            id: 46986414,
            name: "Dark Magician".to_owned(),
            card_type: "Normal Monster".to_owned(),
            description: String::new(),
            sets: vec![
                CardSet {
                    set_name: "Starter Deck: Yugi".to_owned(),
                    set_code: "SDY-006".to_owned(),
                    set_rarity: "Ultra Rare".to_owned(),
                    set_price: set_price.to_owned(),
                },
                CardSet {
                    set_name: "Legend of Blue Eyes".to_owned(),
                    set_code: "LOB-005".to_owned(),
                    set_rarity: "Ultra Rare".to_owned(),
                    set_price: "99.00".to_owned(),
                },
            ],
            images: vec![],
            quotes: vec![
                PriceQuote {
                    source: "tcgplayer".to_owned(),
                    price: quote.to_owned(),
                },
                PriceQuote {
                    source: "cardmarket".to_owned(),
                    price: "4.20".to_owned(),
                },
            ],
        }
    }

    #[test]
    fn marketplace_quote_outranks_set_price() {
        assert_eq!(resolve_price(&card("12.50", "9.99"), "SDY-006"), Some(12.50));
    }

    #[test]
    fn unparseable_quote_falls_back_to_matching_set() {
        // The fallback is the per-set price, not the next marketplace quote.
        assert_eq!(resolve_price(&card("", "9.99"), "SDY-006"), Some(9.99));
        assert_eq!(resolve_price(&card("n/a", "9.99"), "SDY-006"), Some(9.99));
    }

    #[test]
    fn set_code_must_match_exactly() {
        assert_eq!(resolve_price(&card("", "9.99"), "LOB-005"), Some(99.00));
        assert_eq!(resolve_price(&card("", "9.99"), "MRD-000"), None);
    }

    #[test]
    fn nothing_parseable_is_unknown() {
        assert_eq!(resolve_price(&card("", ""), "SDY-006"), None);
    }

    #[test]
    fn nan_is_not_a_price() {
        assert_eq!(resolve_price(&card("NaN", "NaN"), "SDY-006"), None);
    }

    #[test]
    fn card_without_quotes_or_sets() {
        let mut c = card("", "");
        c.quotes.clear();
        c.sets.clear();
        assert_eq!(resolve_price(&c, "SDY-006"), None);
    }
}
