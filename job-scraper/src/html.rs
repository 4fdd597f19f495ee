use reqwest::{Client, Url};
use scraper::{ElementRef, Html, Selector};

use crate::config::{CompanyConfig, HtmlRule};
use crate::http::{get_text, ACCEPT_HTML};
use crate::types::{squash_whitespace, FetchError, Posting, Result};

pub(crate) async fn fetch(client: &Client, company: &CompanyConfig, rule: &HtmlRule) -> Result<Vec<Posting>> {
    let body = get_text(client.get(&company.url), &company.url, ACCEPT_HTML).await?;
    parse_listing(&company.name, &company.url, &body, rule)
}

fn selector(raw: &str, url: &str) -> Result<Selector> {
    Selector::parse(raw).map_err(|e| FetchError::parse(url, format!("selector '{}': {:?}", raw, e)))
}

fn first_text(item: &ElementRef, selector: &Selector) -> Option<String> {
    item.select(selector)
        .next()
        .map(|el| squash_whitespace(&el.text().collect::<String>()))
        .filter(|text| !text.is_empty())
}

/// Extracts one posting per `rule.item` element of a listing page.
/// Items without a title or a resolvable link are skipped.
pub fn parse_listing(company: &str, page_url: &str, html: &str, rule: &HtmlRule) -> Result<Vec<Posting>> {
    let base = Url::parse(page_url).map_err(|e| FetchError::parse(page_url, e))?;
    let item_selector = selector(&rule.item, page_url)?;
    let title_selector = selector(&rule.title, page_url)?;
    let link_selector = selector(&rule.link, page_url)?;
    let location_selector = rule.location.as_deref().map(|s| selector(s, page_url)).transpose()?;
    let department_selector = rule
        .department
        .as_deref()
        .map(|s| selector(s, page_url))
        .transpose()?;

    let doc = Html::parse_document(html);
    let mut postings = Vec::new();
    for item in doc.select(&item_selector) {
        let Some(title) = first_text(&item, &title_selector) else {
            log::warn!("{}: skipping listing item without title", company);
            continue;
        };
        let href = item
            .select(&link_selector)
            .next()
            .and_then(|el| el.value().attr("href"))
            .or_else(|| item.value().attr("href"));
        let Some(link) = href.and_then(|href| base.join(href.trim()).ok()) else {
            log::warn!("{}: skipping '{}', no usable link", company, title);
            continue;
        };
        let location = location_selector.as_ref().and_then(|s| first_text(&item, s));
        let department = department_selector.as_ref().and_then(|s| first_text(&item, s));
        postings.push(
            Posting::new(company, &title, link.as_str())
                .with_location(location)
                .with_department(department),
        );
    }
    Ok(postings)
}
