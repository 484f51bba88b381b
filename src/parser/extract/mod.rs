pub mod bidder;
pub mod card;
pub mod detail;

use crate::listing::{ExtractedFields, Field};
use detail::DetailFields;

/// Fold detail-page fields into a card record. The card's own fields are
/// left alone.
pub fn with_detail(card: ExtractedFields, detail: DetailFields, high_bidder: Field<String>) -> ExtractedFields {
    ExtractedFields {
        vin: detail.vin,
        number_of_bids: detail.number_of_bids,
        location: detail.location,
        country: detail.country,
        engine: detail.engine,
        transmission: detail.transmission,
        exterior_color: detail.exterior_color,
        interior_color: detail.interior_color,
        seller_name: detail.seller_name,
        seller_type: detail.seller_type,
        lot_number: detail.lot_number,
        high_bidder_handle: high_bidder,
        ..card
    }
}

// ── Tests ──
