use std::fmt;

use chrono::NaiveDate;
use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use tracing::warn;

/// Written in place of a detail value that was looked for and not found.
pub const PLACEHOLDER: &str = "N/A";

pub const DEFAULT_VARIANT: &str = "Standard";

/// One listing card as handed over by a page source. Not persisted.
#[derive(Debug, Clone)]
pub struct RawListingFragment {
    pub source_url: String,
    pub title_text: String,
    pub fragment_html: String,
}

/// Outcome of looking for a detail-page value.
///
/// `NotAttempted` means the detail page was never parsed (fetch skipped or
/// failed); `NotFound` means it was parsed and the value is not there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field<T> {
    NotAttempted,
    Found(T),
    NotFound,
}

impl<T> Default for Field<T> {
    fn default() -> Self {
        Field::NotAttempted
    }
}

impl<T> Field<T> {
    /// An attempted lookup: `Some` becomes `Found`, `None` becomes `NotFound`.
    pub fn attempted(value: Option<T>) -> Self {
        match value {
            Some(v) => Field::Found(v),
            None => Field::NotFound,
        }
    }

    pub fn found(&self) -> Option<&T> {
        match self {
            Field::Found(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_found(self) -> Option<T> {
        match self {
            Field::Found(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Field::Found(_))
    }

    pub fn is_not_attempted(&self) -> bool {
        matches!(self, Field::NotAttempted)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Field<U> {
        match self {
            Field::Found(v) => Field::Found(f(v)),
            Field::NotFound => Field::NotFound,
            Field::NotAttempted => Field::NotAttempted,
        }
    }

    /// Keep `self` if it already holds a value, otherwise take `other`.
    pub fn or(self, other: Field<T>) -> Field<T> {
        match self {
            Field::Found(_) => self,
            _ => other,
        }
    }
}

impl<T: Serialize> Serialize for Field<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Field::Found(v) => v.serialize(serializer),
            Field::NotFound => serializer.serialize_str(PLACEHOLDER),
            Field::NotAttempted => serializer.serialize_none(),
        }
    }
}

/// A value that does not parse, such as a short pre-1981 chassis number in
/// `vin`, reads as `NotFound`.
impl<'de, T: DeserializeOwned> Deserialize<'de> for Field<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        match value {
            serde_json::Value::Null => Ok(Field::NotFound),
            serde_json::Value::String(ref s) if s == PLACEHOLDER => Ok(Field::NotFound),
            other => match serde_json::from_value(other.clone()) {
                Ok(v) => Ok(Field::Found(v)),
                Err(e) => {
                    warn!(value = %other, error = %e, "unreadable field value, treated as not found");
                    Ok(Field::NotFound)
                }
            },
        }
    }
}

/// A 17-character vehicle identification number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Vin(String);

impl Vin {
    pub const LEN: usize = 17;

    /// Upper-cases the candidate and accepts it only if it is exactly 17
    /// characters from the VIN alphabet (digits and letters except I, O, Q).
    pub fn parse(candidate: &str) -> Option<Vin> {
        let upper = candidate.trim().to_ascii_uppercase();
        if upper.len() != Self::LEN {
            return None;
        }
        let valid = upper
            .chars()
            .all(|c| c.is_ascii_digit() || (c.is_ascii_uppercase() && !matches!(c, 'I' | 'O' | 'Q')));
        valid.then_some(Vin(upper))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Vin {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Vin::parse(&value).ok_or_else(|| format!("invalid VIN: {value:?}"))
    }
}

impl From<Vin> for String {
    fn from(vin: Vin) -> String {
        vin.0
    }
}

impl fmt::Display for Vin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SellerType {
    #[serde(rename = "Private Party")]
    PrivateParty,
    Dealer,
}

impl SellerType {
    pub fn parse(text: &str) -> Option<SellerType> {
        let lower = text.trim().to_ascii_lowercase();
        if lower.starts_with("private") {
            Some(SellerType::PrivateParty)
        } else if lower.starts_with("dealer") {
            Some(SellerType::Dealer)
        } else {
            None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SellerType::PrivateParty => "Private Party",
            SellerType::Dealer => "Dealer",
        }
    }
}

/// Everything the extractor could pull out of a card and its detail page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedFields {
    #[serde(alias = "url")]
    pub source_url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mileage: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<u64>,
    #[serde(default, alias = "sale_date", skip_serializing_if = "Option::is_none")]
    pub sale_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Field::is_not_attempted")]
    pub vin: Field<Vin>,
    #[serde(default, alias = "number_of_bids", skip_serializing_if = "Field::is_not_attempted")]
    pub number_of_bids: Field<u32>,
    #[serde(default, skip_serializing_if = "Field::is_not_attempted")]
    pub location: Field<String>,
    #[serde(default, skip_serializing_if = "Field::is_not_attempted")]
    pub country: Field<String>,
    #[serde(default, skip_serializing_if = "Field::is_not_attempted")]
    pub engine: Field<String>,
    #[serde(default, skip_serializing_if = "Field::is_not_attempted")]
    pub transmission: Field<String>,
    #[serde(default, skip_serializing_if = "Field::is_not_attempted")]
    pub exterior_color: Field<String>,
    #[serde(default, skip_serializing_if = "Field::is_not_attempted")]
    pub interior_color: Field<String>,
    #[serde(default, skip_serializing_if = "Field::is_not_attempted")]
    pub seller_name: Field<String>,
    #[serde(default, skip_serializing_if = "Field::is_not_attempted")]
    pub seller_type: Field<SellerType>,
    #[serde(default, skip_serializing_if = "Field::is_not_attempted")]
    pub lot_number: Field<String>,
    #[serde(default, skip_serializing_if = "Field::is_not_attempted")]
    pub high_bidder_handle: Field<String>,
}

impl ExtractedFields {
    pub fn new(source_url: impl Into<String>, title: impl Into<String>) -> Self {
        ExtractedFields {
            source_url: source_url.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    /// `(field name, present?)` for every optional field, in declaration order.
    pub fn presence(&self) -> [(&'static str, bool); 16] {
        [
            ("year", self.year.is_some()),
            ("mileage", self.mileage.is_some()),
            ("price", self.price.is_some()),
            ("saleDate", self.sale_date.is_some()),
            ("vin", self.vin.is_found()),
            ("numberOfBids", self.number_of_bids.is_found()),
            ("location", self.location.is_found()),
            ("country", self.country.is_found()),
            ("engine", self.engine.is_found()),
            ("transmission", self.transmission.is_found()),
            ("exteriorColor", self.exterior_color.is_found()),
            ("interiorColor", self.interior_color.is_found()),
            ("sellerName", self.seller_name.is_found()),
            ("sellerType", self.seller_type.is_found()),
            ("lotNumber", self.lot_number.is_found()),
            ("highBidderHandle", self.high_bidder_handle.is_found()),
        ]
    }
}

/// An extracted record tagged with its place in the make/model/variant
/// hierarchy. This is what gets written to JSON and handed to the loader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalListing {
    #[serde(flatten)]
    pub fields: ExtractedFields,
    pub make: String,
    pub model: String,
    #[serde(default = "default_variant")]
    pub variant: String,
}

fn default_variant() -> String {
    DEFAULT_VARIANT.to_string()
}
