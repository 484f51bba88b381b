use crate::listing::{ExtractedFields, RawListingFragment};
use crate::parser::html::CardDocument;
use crate::parser::rules::{
    first_match, Source, MILEAGE_RULES, PRICE_RULES, SALE_DATE_RULES, YEAR_RULES,
};

/// Title and results-block fields of one listing card. Detail fields stay
/// `NotAttempted`.
pub fn extract(fragment: &RawListingFragment) -> ExtractedFields {
    let card = CardDocument::parse(&fragment.fragment_html);
    let title = fragment.title_text.trim();

    let text_for = |source: Source| match source {
        Source::Title => Some(title),
        Source::Results => card.results.as_deref(),
        Source::Excerpt => card.excerpt.as_deref(),
    };

    ExtractedFields {
        year: first_match(&YEAR_RULES, text_for),
        mileage: first_match(&MILEAGE_RULES, text_for),
        price: first_match(&PRICE_RULES, text_for),
        sale_date: first_match(&SALE_DATE_RULES, text_for),
        ..ExtractedFields::new(fragment.source_url.clone(), title)
    }
}
