use crate::parser::html::DetailDocument;

/// Result of scanning the currently loaded comment thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BidderLookup {
    Found(String),
    NotFound,
    /// No match yet, but the page says older comments can be loaded.
    NeedMoreComments,
}

/// Scan bid notifications newest first. With a sale price the winning bid
/// is the one for exactly that amount; without one, the newest bid.
pub fn high_bidder(doc: &DetailDocument, price: Option<u64>, more_comments: bool) -> BidderLookup {
    let winner = doc
        .comments
        .iter()
        .rev()
        .filter_map(|c| c.bid.as_ref())
        .find(|bid| price.map_or(true, |p| bid.amount == p));

    match winner {
        Some(bid) => BidderLookup::Found(bid.bidder.clone()),
        None if more_comments => BidderLookup::NeedMoreComments,
        None => BidderLookup::NotFound,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::html::{Bid, Comment};

    fn bid(amount: u64, bidder: &str) -> Comment {
        Comment {
            author: bidder.into(),
            privileged: false,
            text: format!("${amount} bid placed by {bidder}"),
            bid: Some(Bid {
                amount,
                bidder: bidder.into(),
            }),
        }
    }

    fn thread(comments: Vec<Comment>) -> DetailDocument {
        DetailDocument {
            comments,
            ..Default::default()
        }
    }

    #[test]
    fn matches_sale_price() {
        let doc = thread(vec![bid(400_000, "early"), bid(420_000, "winner"), bid(419_000, "late")]);
        assert_eq!(high_bidder(&doc, Some(420_000), false), BidderLookup::Found("winner".into()));
    }

    #[test]
    fn newest_bid_without_price() {
        let doc = thread(vec![bid(100_000, "first"), bid(150_000, "second")]);
        assert_eq!(high_bidder(&doc, None, true), BidderLookup::Found("second".into()));
    }

    #[test]
    fn asks_for_more_comments_until_exhausted() {
        let doc = thread(vec![bid(300_000, "someone")]);
        assert_eq!(high_bidder(&doc, Some(420_000), true), BidderLookup::NeedMoreComments);
        assert_eq!(high_bidder(&doc, Some(420_000), false), BidderLookup::NotFound);
    }

    #[test]
    fn sold_fixture_winner() {
        let html = std::fs::read_to_string("tests/fixtures/detail_sold.html").unwrap();
        let doc = DetailDocument::parse(&html);
        assert_eq!(high_bidder(&doc, Some(420_000), false), BidderLookup::Found("slrfan22".into()));
    }
}
