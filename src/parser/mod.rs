pub mod extract;
pub mod html;
pub mod rules;

use crate::listing::{ExtractedFields, Field, RawListingFragment};
use html::DetailDocument;

/// Card fields, plus the detail page's fields when one was parsed.
pub fn process_listing(
    fragment: &RawListingFragment,
    detail: Option<(&DetailDocument, Field<String>)>,
) -> ExtractedFields {
    let card = extract::card::extract(fragment);
    match detail {
        Some((doc, high_bidder)) => {
            extract::with_detail(card, extract::detail::extract(doc), high_bidder)
        }
        None => card,
    }
}
