use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use reqwest::{Client, RequestBuilder};

use crate::types::{FetchError, Result};

pub(crate) const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
pub(crate) const ACCEPT_XML: &str =
    "application/rss+xml, application/xml;q=0.9, text/xml;q=0.8, */*;q=0.5";
pub(crate) const ACCEPT_JSON: &str = "application/json";

const USER_AGENT_VALUE: &str = "Mozilla/5.0 (compatible; RoleRadar/1.0)";

/// Some career sites answer oddly without browser-like headers.
pub fn build_client(timeout: Duration) -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    let client = Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .build()?;
    Ok(client)
}

pub(crate) async fn get_text(request: RequestBuilder, url: &str, accept: &str) -> Result<String> {
    log::debug!("GET {}", url);
    let resp = request.header(ACCEPT, accept).send().await?;
    let status = resp.status();
    if !status.is_success() {
        let error_body = resp.text().await.map(|body| body.len());
        log::error!(
            "Request not successful, url: {}, status: {}, body length: {:?}",
            url,
            status,
            error_body
        );
        return Err(FetchError::RequestNotOk(url.to_owned(), status));
    }
    Ok(resp.text().await?)
}
