//! Ordered extraction rules. Each field owns a list of `(source, pattern,
//! transform)` entries tried top to bottom; the first rule whose pattern
//! matches and whose transform yields a value wins. New sources or phrasings
//! are added as rows here.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::{Captures, Regex};

/// Bumped whenever a rule is added, removed or reordered.
pub const RULES_VERSION: u32 = 4;

/// Which text block of a listing card a rule reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Title,
    Results,
    Excerpt,
}

pub struct Rule<T> {
    pub source: Source,
    pattern: Regex,
    transform: fn(&Captures<'_>) -> Option<T>,
}

impl<T> Rule<T> {
    fn new(source: Source, pattern: &str, transform: fn(&Captures<'_>) -> Option<T>) -> Self {
        Rule {
            source,
            pattern: Regex::new(pattern).unwrap(),
            transform,
        }
    }

    pub fn apply(&self, text: &str) -> Option<T> {
        self.pattern
            .captures(text)
            .and_then(|caps| (self.transform)(&caps))
    }
}

/// Run `rules` in order against the texts `text_for` provides.
pub fn first_match<'a, T>(
    rules: &[Rule<T>],
    text_for: impl Fn(Source) -> Option<&'a str>,
) -> Option<T> {
    rules
        .iter()
        .find_map(|rule| text_for(rule.source).and_then(|text| rule.apply(text)))
}

pub static YEAR_RULES: LazyLock<Vec<Rule<i32>>> =
    LazyLock::new(|| vec![Rule::new(Source::Title, r"\b(?:19|20)\d{2}\b", |c| c[0].parse().ok())]);

pub static MILEAGE_RULES: LazyLock<Vec<Rule<u32>>> = LazyLock::new(|| {
    vec![
        Rule::new(Source::Title, r"(?i)(\d+)(?:\.(\d+))?k-Mile", |c| {
            thousands(&c[1], c.get(2).map(|m| m.as_str()))
        }),
        Rule::new(Source::Excerpt, r"(?i)has\s+(\d{1,3}(?:,\d{3})*)\s*miles", |c| {
            parse_grouped(&c[1])
        }),
        Rule::new(Source::Excerpt, r"(?i)(\d{1,3}(?:,\d{3})*)\s*miles", |c| {
            parse_grouped(&c[1])
        }),
    ]
});

pub static PRICE_RULES: LazyLock<Vec<Rule<u64>>> = LazyLock::new(|| {
    vec![Rule::new(Source::Results, r"\$\s?([\d,]+)", |c| parse_grouped(&c[1]))]
});

pub static SALE_DATE_RULES: LazyLock<Vec<Rule<NaiveDate>>> = LazyLock::new(|| {
    vec![Rule::new(Source::Results, r"\bon\s+(\d{1,2}/\d{1,2}/\d{2,4})", |c| {
        NaiveDate::parse_from_str(&c[1], "%m/%d/%y").ok()
    })]
});

/// Parse `12,345` style numbers.
pub fn parse_grouped<T: std::str::FromStr>(digits: &str) -> Option<T> {
    let cleaned: String = digits.chars().filter(|c| *c != ',').collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse().ok()
}

/// `12` + `5` → 12_500, in integer arithmetic.
fn thousands(whole: &str, fraction: Option<&str>) -> Option<u32> {
    let whole: u32 = whole.parse().ok()?;
    let mut value = whole.checked_mul(1000)?;
    if let Some(frac) = fraction {
        // Digits past the third are below one mile.
        let digits: String = frac.chars().chain("000".chars()).take(3).collect();
        value = value.checked_add(digits.parse::<u32>().ok()?)?;
    }
    Some(value)
}

// ── Detail-list keyword rules ──

static ENGINE_LITRE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d+(?:\.\d+)?-?L\b").unwrap());

/// Fields taken from the itemized detail list by keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemField {
    Engine,
    Transmission,
    ExteriorColor,
}

pub struct ItemRule {
    pub field: ItemField,
    pub matches: fn(&str) -> bool,
}

pub const ITEM_RULES: &[ItemRule] = &[
    ItemRule {
        field: ItemField::Engine,
        matches: is_engine_item,
    },
    ItemRule {
        field: ItemField::Transmission,
        matches: is_transmission_item,
    },
    ItemRule {
        field: ItemField::ExteriorColor,
        matches: is_paint_item,
    },
];

fn is_engine_item(item: &str) -> bool {
    item.to_ascii_lowercase().contains("liter") || ENGINE_LITRE_RE.is_match(item)
}

fn is_transmission_item(item: &str) -> bool {
    item.contains("Speed")
}

fn is_paint_item(item: &str) -> bool {
    item.trim_end().ends_with("Paint")
}

/// Index of the first item matching `field`'s rule.
pub fn first_item(items: &[String], field: ItemField) -> Option<usize> {
    let rule = ITEM_RULES.iter().find(|r| r.field == field)?;
    items.iter().position(|item| (rule.matches)(item))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn title_only<'a>(title: &'a str) -> impl Fn(Source) -> Option<&'a str> + 'a {
        move |source| (source == Source::Title).then_some(title)
    }

    #[test]
    fn year_in_range() {
        assert_eq!(first_match(&YEAR_RULES, title_only("2005 Mercedes-Benz SLR")), Some(2005));
        assert_eq!(first_match(&YEAR_RULES, title_only("1999 Porsche 911")), Some(1999));
        assert_eq!(first_match(&YEAR_RULES, title_only("Porsche 911 GT3 (2099)")), Some(2099));
    }

    #[test]
    fn year_out_of_range_never_returned() {
        assert_eq!(first_match(&YEAR_RULES, title_only("1899 Benz Patent-Motorwagen")), None);
        assert_eq!(first_match(&YEAR_RULES, title_only("2100 Concept")), None);
        assert_eq!(first_match(&YEAR_RULES, title_only("Lot 12005 Poster")), None);
        assert_eq!(
            first_match(&YEAR_RULES, title_only("1850 Carriage then 1967 Ford")),
            Some(1967)
        );
    }

    #[test]
    fn mileage_compact_title_form() {
        assert_eq!(first_match(&MILEAGE_RULES, title_only("12.5k-Mile 2005 SLR")), Some(12_500));
        assert_eq!(first_match(&MILEAGE_RULES, title_only("8k-mile 2005 SLR")), Some(8_000));
        assert_eq!(first_match(&MILEAGE_RULES, title_only("12.3k-Mile SLR")), Some(12_300));
    }

    #[test]
    fn mileage_prefers_title_over_excerpt() {
        let texts = |s: Source| match s {
            Source::Title => Some("9k-Mile 2005 SLR"),
            Source::Excerpt => Some("This car has 45,231 miles."),
            Source::Results => None,
        };
        assert_eq!(first_match(&MILEAGE_RULES, texts), Some(9_000));
    }

    #[test]
    fn mileage_excerpt_forms() {
        let texts = |s: Source| match s {
            Source::Title => Some("2005 SLR"),
            Source::Excerpt => Some("Odometer shows 45,231 miles, and it has 44,000 miles on the engine"),
            Source::Results => None,
        };
        assert_eq!(first_match(&MILEAGE_RULES, texts), Some(44_000));

        let texts = |s: Source| match s {
            Source::Title => Some("2005 SLR"),
            Source::Excerpt => Some("Shows 45,231 miles"),
            Source::Results => None,
        };
        assert_eq!(first_match(&MILEAGE_RULES, texts), Some(45_231));
    }

    #[test]
    fn mileage_absent() {
        let texts = |s: Source| match s {
            Source::Title => Some("2005 SLR"),
            Source::Excerpt => Some("No odometer reading given."),
            Source::Results => None,
        };
        assert_eq!(first_match(&MILEAGE_RULES, texts), None);
    }

    #[test]
    fn price_strips_grouping() {
        let texts = |s: Source| (s == Source::Results).then_some("Sold for $1,234,567 on 5/12/23");
        assert_eq!(first_match(&PRICE_RULES, texts), Some(1_234_567));
    }

    #[test]
    fn sale_date_two_digit_year() {
        let texts = |s: Source| (s == Source::Results).then_some("Sold for $420,000 on 5/12/23");
        assert_eq!(first_match(&SALE_DATE_RULES, texts), NaiveDate::from_ymd_opt(2023, 5, 12));
    }

    #[test]
    fn sale_date_parse_failure_is_absent() {
        let texts = |s: Source| (s == Source::Results).then_some("Sold for $420,000 on 13/45/23");
        assert_eq!(first_match(&SALE_DATE_RULES, texts), None);
        let texts = |s: Source| (s == Source::Results).then_some("Sold for $420,000 on 5/12/2023");
        assert_eq!(first_match(&SALE_DATE_RULES, texts), None);
    }

    #[test]
    fn detail_item_keywords() {
        let items: Vec<String> = [
            "Chassis: WDDAJ76F05M000123",
            "9k Miles",
            "Supercharged 5.4-Liter V8",
            "Five-Speed Automatic Transmission",
            "Crystal Laurite Silver Paint",
            "Red Leather Upholstery",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(first_item(&items, ItemField::Engine), Some(2));
        assert_eq!(first_item(&items, ItemField::Transmission), Some(3));
        assert_eq!(first_item(&items, ItemField::ExteriorColor), Some(4));
    }

    #[test]
    fn engine_litre_suffix() {
        assert!(is_engine_item("4.0L Flat-Six"));
        assert!(is_engine_item("3.8-L V6"));
        assert!(!is_engine_item("Lightweight Seats"));
    }
}
