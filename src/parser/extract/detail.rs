use std::sync::LazyLock;

use regex::Regex;

use crate::listing::{Field, SellerType, Vin};
use crate::parser::html::DetailDocument;
use crate::parser::rules::{first_item, parse_grouped, ItemField};

static CHASSIS_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)chassis:\s*([A-Z0-9]{17})\b").unwrap());
static PREFIXED_VIN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:chassis|vin)\s*:\s*([A-Z0-9]{17})\b").unwrap());
static BARE_VIN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-HJ-NPR-Z0-9]{17}\b").unwrap());
static ZIP_SUFFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\d{5}(?:-\d{4})?$").unwrap());

/// State names and postal codes, plus DC.
const US_STATES: &[(&str, &str)] = &[
    ("Alabama", "AL"), ("Alaska", "AK"), ("Arizona", "AZ"), ("Arkansas", "AR"),
    ("California", "CA"), ("Colorado", "CO"), ("Connecticut", "CT"), ("Delaware", "DE"),
    ("District of Columbia", "DC"), ("Florida", "FL"), ("Georgia", "GA"), ("Hawaii", "HI"),
    ("Idaho", "ID"), ("Illinois", "IL"), ("Indiana", "IN"), ("Iowa", "IA"),
    ("Kansas", "KS"), ("Kentucky", "KY"), ("Louisiana", "LA"), ("Maine", "ME"),
    ("Maryland", "MD"), ("Massachusetts", "MA"), ("Michigan", "MI"), ("Minnesota", "MN"),
    ("Mississippi", "MS"), ("Missouri", "MO"), ("Montana", "MT"), ("Nebraska", "NE"),
    ("Nevada", "NV"), ("New Hampshire", "NH"), ("New Jersey", "NJ"), ("New Mexico", "NM"),
    ("New York", "NY"), ("North Carolina", "NC"), ("North Dakota", "ND"), ("Ohio", "OH"),
    ("Oklahoma", "OK"), ("Oregon", "OR"), ("Pennsylvania", "PA"), ("Rhode Island", "RI"),
    ("South Carolina", "SC"), ("South Dakota", "SD"), ("Tennessee", "TN"), ("Texas", "TX"),
    ("Utah", "UT"), ("Vermont", "VT"), ("Virginia", "VA"), ("Washington", "WA"),
    ("West Virginia", "WV"), ("Wisconsin", "WI"), ("Wyoming", "WY"),
];

pub const UNITED_STATES: &str = "United States";

/// Fields read from a parsed detail page. High bidder is resolved
/// separately since it may need more of the comment thread.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetailFields {
    pub vin: Field<Vin>,
    pub number_of_bids: Field<u32>,
    pub location: Field<String>,
    pub country: Field<String>,
    pub engine: Field<String>,
    pub transmission: Field<String>,
    pub exterior_color: Field<String>,
    pub interior_color: Field<String>,
    pub seller_name: Field<String>,
    pub seller_type: Field<SellerType>,
    pub lot_number: Field<String>,
}

pub fn extract(doc: &DetailDocument) -> DetailFields {
    let items = doc.item_texts();
    let item_at = |idx: Option<usize>| idx.and_then(|i| items.get(i)).cloned();

    let exterior_idx = first_item(&items, ItemField::ExteriorColor);
    let location = doc.essential("Location").map(str::to_string);
    let country = doc
        .essential("Country")
        .map(str::to_string)
        .or_else(|| location.as_deref().and_then(country_of));

    DetailFields {
        vin: Field::attempted(find_vin(doc)),
        number_of_bids: Field::attempted(doc.stat("Bids").and_then(parse_grouped)),
        country: Field::attempted(country),
        location: Field::attempted(location),
        engine: Field::attempted(item_at(first_item(&items, ItemField::Engine))),
        transmission: Field::attempted(item_at(first_item(&items, ItemField::Transmission))),
        exterior_color: Field::attempted(item_at(exterior_idx)),
        interior_color: Field::attempted(item_at(exterior_idx.map(|i| i + 1))),
        seller_name: Field::attempted(doc.essential("Seller").map(str::to_string)),
        seller_type: Field::attempted(
            doc.essential("Private Party or Dealer")
                .and_then(SellerType::parse),
        ),
        lot_number: Field::attempted(
            doc.essential("Lot")
                .map(|v| v.trim_start_matches('#').trim().to_string())
                .filter(|v| !v.is_empty()),
        ),
    }
}

/// VIN sources in priority order: the chassis item's link text, the chassis
/// item's own text, prefixed tokens in privileged comments, then bare
/// VIN-shaped tokens in privileged comments.
pub fn find_vin(doc: &DetailDocument) -> Option<Vin> {
    let chassis = doc
        .items
        .iter()
        .find(|i| i.text.to_ascii_lowercase().starts_with("chassis"));

    let from_link = chassis
        .and_then(|i| i.link_text.as_deref())
        .filter(|t| t.trim().chars().count() == Vin::LEN)
        .and_then(Vin::parse);
    if from_link.is_some() {
        return from_link;
    }

    let from_line = chassis
        .and_then(|i| CHASSIS_LINE_RE.captures(&i.text))
        .and_then(|caps| Vin::parse(&caps[1]));
    if from_line.is_some() {
        return from_line;
    }

    let privileged: Vec<&str> = doc
        .comments
        .iter()
        .filter(|c| c.privileged)
        .map(|c| c.text.as_str())
        .collect();

    privileged
        .iter()
        .flat_map(|text| PREFIXED_VIN_RE.captures_iter(text))
        .find_map(|caps| Vin::parse(&caps[1]))
        .or_else(|| {
            privileged
                .iter()
                .flat_map(|text| BARE_VIN_RE.find_iter(text))
                .find_map(|m| Vin::parse(m.as_str()))
        })
}

/// A trailing US state (with or without ZIP) means United States; otherwise
/// the last comma-separated component names the country.
pub fn country_of(location: &str) -> Option<String> {
    let last = location.trim().rsplit(',').next()?.trim();
    let region = ZIP_SUFFIX_RE.replace(last, "");
    let region = region.trim();
    if region.is_empty() {
        return (!last.is_empty()).then(|| UNITED_STATES.to_string());
    }
    if is_us_state(region) {
        return Some(UNITED_STATES.to_string());
    }
    Some(region.to_string())
}

fn is_us_state(region: &str) -> bool {
    US_STATES
        .iter()
        .any(|(name, code)| region.eq_ignore_ascii_case(name) || region == *code)
}
