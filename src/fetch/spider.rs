use std::sync::LazyLock;
use std::time::Instant;

use anyhow::{anyhow, Result};
use spider_client::shapes::request::{ReturnFormat, ReturnFormatHandling};
use spider_client::{RequestParams, Spider};
use regex::Regex;
use tracing::debug;

use super::{has_more_marker, page_url, with_retry, DetailPage, IndexPage, PageSource, StatusError};

/// Status line in a transport error, e.g. "HTTP status client error (429 Too Many Requests)".
static HTTP_STATUS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"HTTP status (?:client|server) error \((\d{3})").unwrap());

fn transport_error(message: String) -> anyhow::Error {
    match HTTP_STATUS_RE
        .captures(&message)
        .and_then(|c| c[1].parse::<u16>().ok())
    {
        Some(code) => anyhow::Error::from(StatusError(code)).context(message),
        None => anyhow!("Spider scrape failed: {}", message),
    }
}

/// Pages rendered by the spider.cloud API. The API returns one snapshot per
/// request, so older comments are never expanded.
pub struct SpiderSource {
    spider: Spider,
}

impl SpiderSource {
    pub fn new(api_key: &str) -> Result<Self> {
        let spider = Spider::new(Some(api_key.to_string()))
            .map_err(|e| anyhow!("Failed to create Spider client: {}", e))?;
        Ok(SpiderSource { spider })
    }

    async fn fetch_html(&self, url: &str) -> Result<String> {
        with_retry(url, || self.scrape_once(url)).await
    }

    async fn scrape_once(&self, url: &str) -> Result<String> {
        let params = RequestParams {
            return_format: Some(ReturnFormatHandling::Single(ReturnFormat::Raw)),
            ..Default::default()
        };

        let start = Instant::now();
        let response = self
            .spider
            .scrape_url(url, Some(params), "application/json")
            .await
            .map_err(|e| transport_error(e.to_string()))?;
        debug!(url, latency_ms = start.elapsed().as_millis() as u64, "spider response");

        let parsed: serde_json::Value = match response.as_str() {
            Some(s) => serde_json::from_str(s).unwrap_or(response.clone()),
            None => response,
        };
        let first = parsed.as_array().and_then(|arr| arr.first());

        if let Some(status) = first.and_then(|obj| obj.get("status")).and_then(|s| s.as_i64()) {
            if status == 429 || status >= 500 {
                return Err(StatusError(status as u16).into());
            }
        }

        first
            .and_then(|obj| obj.get("content"))
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("No content in spider response"))
    }
}

impl PageSource for SpiderSource {
    async fn index_page(&self, model_url: &str, page: u32) -> Result<IndexPage> {
        let html = self.fetch_html(&page_url(model_url, page)).await?;
        let has_more = has_more_marker(&html);
        Ok(IndexPage { html, has_more })
    }

    async fn detail_page(&self, url: &str, _comment_expansions: u32) -> Result<DetailPage> {
        let html = self.fetch_html(url).await?;
        Ok(DetailPage {
            html,
            more_comments: false,
        })
    }
}
