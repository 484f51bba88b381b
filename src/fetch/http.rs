use std::time::Duration;

use anyhow::{Context, Result};

use super::{has_more_marker, page_url, with_retry, DetailPage, IndexPage, PageSource, StatusError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Server-rendered HTML over plain HTTP. Nothing is executed, so comment
/// threads stay as first served.
pub struct HttpSource {
    client: reqwest::Client,
}

impl HttpSource {
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("building HTTP client")?;
        Ok(HttpSource { client })
    }

    async fn fetch_html(&self, url: &str) -> Result<String> {
        with_retry(url, || self.get_once(url)).await
    }

    async fn get_once(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(StatusError(status.as_u16()).into());
        }
        Ok(response.text().await?)
    }
}

impl PageSource for HttpSource {
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
