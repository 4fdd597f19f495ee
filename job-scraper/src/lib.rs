pub mod amazon;
pub mod config;
pub mod html;
pub(crate) mod http;
pub mod location;
pub mod rss;
pub mod sitemap;
pub mod types;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

pub use config::{CompanyConfig, ConfigError, ExtractionRule};
pub use http::build_client;
pub use types::{FetchError, Identity, Posting};

/// Anything that can produce the current postings of a configured company.
#[async_trait]
pub trait PostingSource {
    async fn fetch(&self, company: &CompanyConfig) -> Result<Vec<Posting>, FetchError>;
}

/// Fetches career pages over HTTP, one shared client for every company.
#[derive(Clone)]
pub struct Fetcher {
    client: Client,
    /// pause between consecutive requests to the same site
    delay: Duration,
}

impl Fetcher {
    pub fn new(timeout: Duration, delay: Duration) -> Result<Self, FetchError> {
        Ok(Self::with_client(build_client(timeout)?, delay))
    }

    pub fn with_client(client: Client, delay: Duration) -> Self {
        Self { client, delay }
    }
}

#[async_trait]
impl PostingSource for Fetcher {
    async fn fetch(&self, company: &CompanyConfig) -> Result<Vec<Posting>, FetchError> {
        log::info!("fetching postings for {} from {}", company.name, company.url);
        let postings = match &company.rule {
            ExtractionRule::Html(rule) => html::fetch(&self.client, company, rule).await,
            ExtractionRule::Rss => rss::fetch(&self.client, company).await,
            ExtractionRule::Sitemap(rule) => {
                sitemap::fetch(&self.client, company, rule, self.delay).await
            }
            ExtractionRule::AmazonSearch(rule) => {
                amazon::fetch(&self.client, company, rule, self.delay).await
            }
        }?;
        log::info!("fetched {} postings for {}", postings.len(), company.name);
        Ok(postings)
    }
}
