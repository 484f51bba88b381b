use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::listing::RawListingFragment;
use crate::parser::rules::parse_grouped;

pub const BASE_URL: &str = "https://bringatrailer.com";

static CARD_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a.listing-card").unwrap());
static H3_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h3").unwrap());
static H2_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h2").unwrap());
static RESULTS_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.item-results").unwrap());
static EXCERPT_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.item-excerpt").unwrap());

static ESSENTIAL_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.essentials div.item").unwrap());
static STRONG_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("strong").unwrap());
static DETAIL_ITEM_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.essentials li").unwrap());
static LINK_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a").unwrap());
static STATS_ROW_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("table.listing-stats tr").unwrap());
static STATS_LABEL_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("td.listing-stats-label").unwrap());
static STATS_VALUE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("td.listing-stats-value").unwrap());
static COMMENT_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("div.comment").unwrap());
static AUTHOR_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".comment-authorname").unwrap());
static COMMENT_TEXT_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".comment-text").unwrap());

static BID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\$\s?([\d,]+)\s+bid placed by\s+(\S+)").unwrap());

/// Comment authors whose statements about the car are trusted.
const PRIVILEGED_CLASSES: &[&str] = &["comment-seller", "comment-moderator"];

/// Split a rendered index page into listing fragments, in page order.
/// Cards without a title or link are skipped.
pub fn listing_cards(html: &str) -> Vec<RawListingFragment> {
    let document = Html::parse_document(html);
    document
        .select(&CARD_SEL)
        .filter_map(|card| {
            let title = card
                .select(&H3_SEL)
                .next()
                .or_else(|| card.select(&H2_SEL).next())
                .map(text_of)
                .filter(|t| !t.is_empty())?;
            let href = card.value().attr("href").filter(|h| !h.trim().is_empty())?;
            Some(RawListingFragment {
                source_url: absolute_url(href.trim()),
                title_text: title,
                fragment_html: card.html(),
            })
        })
        .collect()
}

pub fn absolute_url(href: &str) -> String {
    if href.starts_with("http") {
        href.to_string()
    } else if href.starts_with('/') {
        format!("{BASE_URL}{href}")
    } else {
        format!("{BASE_URL}/{href}")
    }
}

/// Text blocks of one listing card.
#[derive(Debug, Clone, Default)]
pub struct CardDocument {
    pub results: Option<String>,
    pub excerpt: Option<String>,
}

impl CardDocument {
    pub fn parse(fragment_html: &str) -> CardDocument {
        let fragment = Html::parse_fragment(fragment_html);
        let root = fragment.root_element();
        CardDocument {
            results: root.select(&RESULTS_SEL).next().map(text_of),
            excerpt: root.select(&EXCERPT_SEL).next().map(text_of),
        }
    }
}

/// One item of the itemized "Listing Details" list.
#[derive(Debug, Clone, PartialEq)]
pub struct DetailItem {
    pub text: String,
    pub link_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comment {
    pub author: String,
    pub privileged: bool,
    pub text: String,
    pub bid: Option<Bid>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bid {
    pub amount: u64,
    pub bidder: String,
}

/// The parts of a listing detail page the extractor reads.
///
/// Comments are kept in document order, oldest first.
#[derive(Debug, Clone, Default)]
pub struct DetailDocument {
    pub essentials: Vec<(String, String)>,
    pub items: Vec<DetailItem>,
    pub stats: Vec<(String, String)>,
    pub comments: Vec<Comment>,
}

impl DetailDocument {
    pub fn parse(html: &str) -> DetailDocument {
        let document = Html::parse_document(html);

        let essentials = document
            .select(&ESSENTIAL_SEL)
            .filter_map(|item| {
                let label = item.select(&STRONG_SEL).next().map(text_of)?;
                let full = text_of(item);
                let value = full
                    .strip_prefix(label.as_str())
                    .unwrap_or(&full)
                    .trim_start()
                    .trim_start_matches(':')
                    .trim()
                    .to_string();
                Some((label.trim_end_matches(':').trim().to_string(), value))
            })
            .collect();

        let items = document
            .select(&DETAIL_ITEM_SEL)
            .map(|li| DetailItem {
                text: text_of(li),
                link_text: li.select(&LINK_SEL).next().map(text_of),
            })
            .collect();

        let stats = document
            .select(&STATS_ROW_SEL)
            .filter_map(|row| {
                let label = row.select(&STATS_LABEL_SEL).next().map(text_of)?;
                let value = row.select(&STATS_VALUE_SEL).next().map(text_of)?;
                Some((label, value))
            })
            .collect();

        let comments = document.select(&COMMENT_SEL).map(parse_comment).collect();

        DetailDocument {
            essentials,
            items,
            stats,
            comments,
        }
    }

    /// Value of the first essentials entry whose label matches, ignoring case.
    pub fn essential(&self, label: &str) -> Option<&str> {
        self.essentials
            .iter()
            .find(|(l, _)| l.eq_ignore_ascii_case(label))
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
    }

    pub fn stat(&self, label: &str) -> Option<&str> {
        self.stats
            .iter()
            .find(|(l, _)| l.eq_ignore_ascii_case(label))
            .map(|(_, v)| v.as_str())
    }

    pub fn item_texts(&self) -> Vec<String> {
        self.items.iter().map(|i| i.text.clone()).collect()
    }
}

fn parse_comment(el: ElementRef<'_>) -> Comment {
    let classes: Vec<&str> = el.value().classes().collect();
    let author = el.select(&AUTHOR_SEL).next().map(text_of).unwrap_or_default();
    let text = el
        .select(&COMMENT_TEXT_SEL)
        .next()
        .map(text_of)
        .unwrap_or_else(|| text_of(el));

    let bid = if classes.contains(&"bid-notification") {
        BID_RE.captures(&text).and_then(|caps| {
            Some(Bid {
                amount: parse_grouped(&caps[1])?,
                bidder: if author.is_empty() {
                    caps[2].to_string()
                } else {
                    author.clone()
                },
            })
        })
    } else {
        None
    };

    Comment {
        privileged: classes.iter().any(|c| PRIVILEGED_CLASSES.contains(c)),
        author,
        text,
        bid,
    }
}

/// Element text with whitespace runs collapsed to single spaces.
fn text_of(el: ElementRef<'_>) -> String {
    el.text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cards_from_index_fixture() {
        let html = std::fs::read_to_string("tests/fixtures/index_page1.html").unwrap();
        let cards = listing_cards(&html);
        assert_eq!(cards.len(), 3, "got: {:?}", cards);
        assert_eq!(
            cards[0].source_url,
            "https://bringatrailer.com/listing/2005-mercedes-benz-slr-mclaren-41/"
        );
        assert_eq!(cards[0].title_text, "9k-Mile 2005 Mercedes-Benz SLR McLaren");
        assert!(cards[0].fragment_html.contains("item-results"));
    }

    #[test]
    fn card_without_title_or_href_is_skipped() {
        let html = r#"<a class="listing-card" href="/listing/x/"><div>no title</div></a>
            <a class="listing-card"><h3>No link</h3></a>
            <a class="listing-card" href="/listing/y/"><h2>Fallback Title</h2></a>"#;
        let cards = listing_cards(html);
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].title_text, "Fallback Title");
        assert_eq!(cards[0].source_url, "https://bringatrailer.com/listing/y/");
    }

    #[test]
    fn card_blocks() {
        let card = CardDocument::parse(
            r#"<a class="listing-card" href="/l/"><h3>T</h3>
            <div class="item-excerpt">This car has   12,000
              miles.</div>
            <div class="item-results">Sold for <span>$420,000</span> on 5/12/23</div></a>"#,
        );
        assert_eq!(card.results.as_deref(), Some("Sold for $420,000 on 5/12/23"));
        assert_eq!(card.excerpt.as_deref(), Some("This car has 12,000 miles."));
    }

    #[test]
    fn detail_fixture_parts() {
        let html = std::fs::read_to_string("tests/fixtures/detail_sold.html").unwrap();
        let doc = DetailDocument::parse(&html);
        assert_eq!(doc.essential("Seller"), Some("velocityclassics"));
        assert_eq!(doc.essential("location"), Some("Beverly Hills, California 90210"));
        assert_eq!(doc.essential("Lot"), Some("#104233"));
        assert_eq!(doc.stat("Bids"), Some("27"));
        assert_eq!(doc.items[0].link_text.as_deref(), Some("WDDAJ76F05M000123"));
        assert!(doc.comments.iter().any(|c| c.privileged));
        let bids: Vec<_> = doc.comments.iter().filter_map(|c| c.bid.as_ref()).collect();
        assert_eq!(bids.len(), 3);
        assert_eq!(bids[2].amount, 420_000);
        assert_eq!(bids[2].bidder, "slrfan22");
    }

    #[test]
    fn empty_document() {
        let doc = DetailDocument::parse("");
        assert!(doc.essentials.is_empty());
        assert!(doc.items.is_empty());
        assert!(doc.comments.is_empty());
    }
}
