pub mod http;
pub mod spider;

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::listing::{ExtractedFields, Field, RawListingFragment};
use crate::parser;
use crate::parser::extract::bidder::{high_bidder, BidderLookup};
use crate::parser::html::{listing_cards, DetailDocument};

pub use self::http::HttpSource;
pub use self::spider::SpiderSource;

const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 2000;

/// Marker present on index pages that can load more cards.
const SHOW_MORE_MARKER: &str = "button-show-more";

/// One rendered page of a model's listing index.
#[derive(Debug, Clone)]
pub struct IndexPage {
    pub html: String,
    pub has_more: bool,
}

/// A rendered listing page with `comment_expansions` rounds of older
/// comments loaded.
#[derive(Debug, Clone)]
pub struct DetailPage {
    pub html: String,
    pub more_comments: bool,
}

/// Something that can hand over rendered pages: a browser, a rendering
/// API, or plain HTTP.
pub trait PageSource: Send + Sync {
    /// `page` starts at 1.
    fn index_page(&self, model_url: &str, page: u32) -> impl Future<Output = Result<IndexPage>> + Send;

    fn detail_page(
        &self,
        url: &str,
        comment_expansions: u32,
    ) -> impl Future<Output = Result<DetailPage>> + Send;
}

pub fn page_url(model_url: &str, page: u32) -> String {
    if page <= 1 {
        model_url.to_string()
    } else {
        let sep = if model_url.contains('?') { '&' } else { '?' };
        format!("{model_url}{sep}page={page}")
    }
}

pub fn has_more_marker(html: &str) -> bool {
    html.contains(SHOW_MORE_MARKER)
}

/// A non-success HTTP status from a page source.
#[derive(Debug, Error)]
#[error("server returned {0}")]
pub struct StatusError(pub u16);

fn is_retryable(err: &anyhow::Error) -> bool {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<StatusError>())
        .is_some_and(|status| matches!(status.0, 429 | 500 | 502 | 503 | 504))
}

/// Run `op`, retrying rate-limit and server errors with exponential backoff.
async fn with_retry<T, F, Fut>(what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < MAX_RETRIES && is_retryable(&e) => {
                let backoff = Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt));
                warn!(
                    "Rate limited on {} (attempt {}/{}), backing off {:.1}s",
                    what,
                    attempt + 1,
                    MAX_RETRIES,
                    backoff.as_secs_f64()
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CrawlOptions {
    pub max_pages: u32,
    pub max_comment_expansions: u32,
    /// Stop taking cards once this many have been collected.
    pub max_listings: Option<usize>,
    /// Skip detail pages and keep card fields only.
    pub cards_only: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlStats {
    pub pages: u32,
    pub cards: usize,
    pub details: usize,
    pub detail_failures: usize,
}

type DetailResult = Option<(DetailDocument, Field<String>)>;

/// Walk a model's index pages and extract every card, fetching each
/// distinct listing URL's detail page once.
///
/// A failing first index page is an error; later index failures end
/// pagination. Detail failures leave that record's detail fields
/// `NotAttempted`.
pub async fn crawl<S: PageSource>(
    source: &S,
    model_url: &str,
    opts: &CrawlOptions,
) -> Result<(Vec<ExtractedFields>, CrawlStats)> {
    let mut stats = CrawlStats::default();
    let mut fragments: Vec<RawListingFragment> = Vec::new();

    for page in 1..=opts.max_pages.max(1) {
        let index = match source.index_page(model_url, page).await {
            Ok(index) => index,
            Err(e) if page == 1 => {
                return Err(e).with_context(|| format!("fetching index {}", model_url));
            }
            Err(e) => {
                warn!(page, error = %e, "index page failed, stopping pagination");
                break;
            }
        };
        stats.pages = page;
        let cards = listing_cards(&index.html);
        debug!(page, cards = cards.len(), "index page");
        fragments.extend(cards);
        if let Some(cap) = opts.max_listings {
            if fragments.len() >= cap {
                fragments.truncate(cap);
                info!("Reached the {} listing cap", cap);
                break;
            }
        }
        if !index.has_more {
            break;
        }
    }
    stats.cards = fragments.len();
    info!("Found {} listing cards on {} pages", stats.cards, stats.pages);

    let pb = ProgressBar::new(fragments.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    let mut details: HashMap<String, DetailResult> = HashMap::new();
    let mut records = Vec::with_capacity(fragments.len());
    for fragment in &fragments {
        if opts.cards_only {
            records.push(parser::process_listing(fragment, None));
            pb.inc(1);
            continue;
        }
        if !details.contains_key(&fragment.source_url) {
            let card = parser::extract::card::extract(fragment);
            let result =
                match detail_with_bidder(source, &fragment.source_url, card.price, opts.max_comment_expansions).await {
                    Ok(found) => {
                        stats.details += 1;
                        Some(found)
                    }
                    Err(e) => {
                        stats.detail_failures += 1;
                        warn!(url = %fragment.source_url, error = %e, "detail page failed");
                        None
                    }
                };
            details.insert(fragment.source_url.clone(), result);
        }
        let detail = details
            .get(&fragment.source_url)
            .and_then(|d| d.as_ref())
            .map(|(doc, bidder)| (doc, bidder.clone()));
        records.push(parser::process_listing(fragment, detail));
        pb.inc(1);
    }
    pb.finish_and_clear();

    Ok((records, stats))
}

/// Fetch a detail page, loading older comments until the high bidder turns
/// up or `max_expansions` rounds have been spent.
async fn detail_with_bidder<S: PageSource>(
    source: &S,
    url: &str,
    price: Option<u64>,
    max_expansions: u32,
) -> Result<(DetailDocument, Field<String>)> {
    let mut expansions = 0;
    loop {
        let page = source.detail_page(url, expansions).await?;
        let doc = DetailDocument::parse(&page.html);
        let can_expand = page.more_comments && expansions < max_expansions;
        match high_bidder(&doc, price, can_expand) {
            BidderLookup::Found(handle) => return Ok((doc, Field::Found(handle))),
            BidderLookup::NotFound => return Ok((doc, Field::NotFound)),
            BidderLookup::NeedMoreComments => {
                expansions += 1;
                debug!(url, expansions, "loading older comments");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use anyhow::bail;

    use super::*;

    /// Serves fixture pages and records every request.
    struct FakeSource {
        index: Vec<String>,
        detail: HashMap<String, Vec<DetailPage>>,
        failing_detail: Option<String>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeSource {
        fn new(index: &[&str]) -> Self {
            FakeSource {
                index: index
                    .iter()
                    .map(|f| std::fs::read_to_string(format!("tests/fixtures/{f}.html")).unwrap())
                    .collect(),
                detail: HashMap::new(),
                failing_detail: None,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn with_detail(mut self, url: &str, pages: Vec<DetailPage>) -> Self {
            self.detail.insert(url.to_string(), pages);
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl PageSource for FakeSource {
        async fn index_page(&self, model_url: &str, page: u32) -> Result<IndexPage> {
            self.calls.lock().unwrap().push(page_url(model_url, page));
            let Some(html) = self.index.get(page as usize - 1) else {
                bail!("no page {page}");
            };
            Ok(IndexPage {
                html: html.clone(),
                has_more: (page as usize) < self.index.len(),
            })
        }

        async fn detail_page(&self, url: &str, comment_expansions: u32) -> Result<DetailPage> {
            self.calls.lock().unwrap().push(format!("{url}#{comment_expansions}"));
            if self.failing_detail.as_deref() == Some(url) {
                bail!("server returned 404");
            }
            let pages = self.detail.get(url);
            let page = pages
                .and_then(|p| p.get(comment_expansions as usize).or_else(|| p.last()))
                .cloned()
                .unwrap_or(DetailPage {
                    html: String::new(),
                    more_comments: false,
                });
            Ok(page)
        }
    }

    fn detail_fixture(name: &str, more_comments: bool) -> DetailPage {
        DetailPage {
            html: std::fs::read_to_string(format!("tests/fixtures/{name}.html")).unwrap(),
            more_comments,
        }
    }

    const MODEL_URL: &str = "https://bringatrailer.com/mercedes-benz/slr-mclaren/";
    const SLR_41: &str = "https://bringatrailer.com/listing/2005-mercedes-benz-slr-mclaren-41/";

    fn opts(cards_only: bool) -> CrawlOptions {
        CrawlOptions {
            max_pages: 30,
            max_comment_expansions: 3,
            max_listings: None,
            cards_only,
        }
    }

    #[test]
    fn page_urls() {
        assert_eq!(page_url(MODEL_URL, 1), MODEL_URL);
        assert_eq!(page_url(MODEL_URL, 3), format!("{MODEL_URL}?page=3"));
        assert_eq!(page_url("https://x/?sort=new", 2), "https://x/?sort=new&page=2");
    }

    #[test]
    fn retryable_errors() {
        assert!(is_retryable(&StatusError(429).into()));
        assert!(is_retryable(&StatusError(503).into()));
        assert!(!is_retryable(&StatusError(404).into()));
        let wrapped = anyhow::Error::from(StatusError(502)).context("fetching index");
        assert!(is_retryable(&wrapped));
    }

    #[test]
    fn status_digits_in_text_do_not_retry() {
        let err = anyhow::anyhow!(
            "connection reset fetching https://bringatrailer.com/listing/1991-mercedes-benz-500sl-pirate-edition/"
        );
        assert!(!is_retryable(&err));
        assert!(!is_retryable(&anyhow::anyhow!("server returned 503")));
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let attempts = Mutex::new(0);
        let result = with_retry("x", || {
            *attempts.lock().unwrap() += 1;
            async { Err::<(), _>(StatusError(404).into()) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(*attempts.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn walks_pages_until_no_more() {
        let source = FakeSource::new(&["index_page1", "index_page2"]);
        let (records, stats) = crawl(&source, MODEL_URL, &opts(true)).await.unwrap();
        assert_eq!(stats.pages, 2);
        assert_eq!(records.len(), 6);
        assert!(records.iter().all(|r| r.vin.is_not_attempted()));
        assert!(!source.calls().iter().any(|c| c.contains('#')), "cards only");
    }

    #[tokio::test]
    async fn page_cap_bounds_pagination() {
        let source = FakeSource::new(&["index_page1", "index_page2"]);
        let capped = CrawlOptions {
            max_pages: 1,
            ..opts(true)
        };
        let (records, stats) = crawl(&source, MODEL_URL, &capped).await.unwrap();
        assert_eq!(stats.pages, 1);
        assert_eq!(records.len(), 3);
    }

    #[tokio::test]
    async fn listing_cap_stops_taking_cards() {
        let source = FakeSource::new(&["index_page1", "index_page2"]);
        let capped = CrawlOptions {
            max_listings: Some(4),
            ..opts(true)
        };
        let (records, stats) = crawl(&source, MODEL_URL, &capped).await.unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(stats.cards, 4);

        let source = FakeSource::new(&["index_page1", "index_page2"]);
        let capped = CrawlOptions {
            max_listings: Some(2),
            ..opts(true)
        };
        let (records, stats) = crawl(&source, MODEL_URL, &capped).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(stats.pages, 1);
        assert!(!source.calls().iter().any(|c| c.contains("page=2")));
    }

    #[tokio::test]
    async fn first_index_failure_is_an_error() {
        let source = FakeSource::new(&[]);
        assert!(crawl(&source, MODEL_URL, &opts(true)).await.is_err());
    }

    #[tokio::test]
    async fn detail_fetched_once_per_url() {
        let source = FakeSource::new(&["index_page1", "index_page2"])
            .with_detail(SLR_41, vec![detail_fixture("detail_sold", false)]);
        let (records, stats) = crawl(&source, MODEL_URL, &opts(false)).await.unwrap();

        let slr_calls = source.calls().iter().filter(|c| c.starts_with(SLR_41)).count();
        assert_eq!(slr_calls, 1);
        assert_eq!(stats.details, 5);

        let both: Vec<_> = records.iter().filter(|r| r.source_url == SLR_41).collect();
        assert_eq!(both.len(), 2);
        assert!(both.iter().all(|r| r.high_bidder_handle == Field::Found("slrfan22".into())));
    }

    #[tokio::test]
    async fn expands_comments_until_bidder_found() {
        let thin = DetailPage {
            html: r#"<div class="comment bid-notification"><div class="comment-authorname">lowballer</div>
                <div class="comment-text">$100,000 bid placed by lowballer</div></div>"#
                .to_string(),
            more_comments: true,
        };
        let source = FakeSource::new(&["index_page1"]).with_detail(
            SLR_41,
            vec![thin.clone(), thin, detail_fixture("detail_sold", false)],
        );
        let (records, _) = crawl(&source, MODEL_URL, &opts(false)).await.unwrap();
        assert_eq!(records[0].high_bidder_handle, Field::Found("slrfan22".into()));
        let expansions: Vec<_> = source.calls().into_iter().filter(|c| c.starts_with(SLR_41)).collect();
        assert_eq!(expansions.len(), 3);
    }

    #[tokio::test]
    async fn expansion_is_bounded() {
        let endless = DetailPage {
            html: String::new(),
            more_comments: true,
        };
        let source = FakeSource::new(&["index_page1"]).with_detail(SLR_41, vec![endless]);
        let (records, _) = crawl(&source, MODEL_URL, &opts(false)).await.unwrap();
        assert_eq!(records[0].high_bidder_handle, Field::NotFound);
        let calls = source.calls().into_iter().filter(|c| c.starts_with(SLR_41)).count();
        assert_eq!(calls, 4, "initial load plus three expansions");
    }

    #[tokio::test]
    async fn detail_failure_keeps_card_fields() {
        let mut source = FakeSource::new(&["index_page1"]);
        source.failing_detail = Some(SLR_41.to_string());
        let (records, stats) = crawl(&source, MODEL_URL, &opts(false)).await.unwrap();
        assert_eq!(stats.detail_failures, 1);
        assert_eq!(records[0].price, Some(420_000));
        assert!(records[0].vin.is_not_attempted());
        assert_eq!(records[1].vin, Field::NotFound, "parsed, but the page had no VIN");
    }
}
