use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;
use reqwest::{Client, Url};
use roxmltree::Document;
use scraper::{Html, Selector};

use crate::config::{CompanyConfig, SitemapRule};
use crate::http::{get_text, ACCEPT_HTML, ACCEPT_XML};
use crate::location::normalize_free_text;
use crate::types::{squash_whitespace, FetchError, Posting, Result};

lazy_static! {
    static ref LOCATION_RE: Regex = Regex::new(r"(?i)\bLocation:\s*([^\n\r]+)").unwrap();
    static ref H1: Selector = Selector::parse("h1").unwrap();
    static ref TITLE: Selector = Selector::parse("title").unwrap();
}

/// `<loc>` values of a sitemap, either a `urlset` or a `sitemapindex`.
pub fn sitemap_locs(url: &str, xml: &str) -> Result<Vec<String>> {
    let doc = Document::parse(xml).map_err(|e| FetchError::parse(url, e))?;
    let locs = doc
        .descendants()
        .filter(|node| node.is_element() && node.tag_name().name() == "loc")
        .filter_map(|node| node.text())
        .map(str::trim)
        .filter(|loc| !loc.is_empty())
        .map(String::from)
        .collect();
    Ok(locs)
}

fn is_nested_sitemap(loc: &str) -> bool {
    loc.ends_with(".xml") && loc.contains("/sitemap/")
}

pub fn is_job_url(loc: &str, host_suffix: &str, job_path: &Regex) -> bool {
    let Ok(url) = Url::parse(loc) else {
        return false;
    };
    if !matches!(url.scheme(), "http" | "https") {
        return false;
    }
    let host_ok = url
        .host_str()
        .map(|host| host.to_lowercase().ends_with(&host_suffix.to_lowercase()))
        .unwrap_or(false);
    host_ok && job_path.is_match(url.path())
}

/// Walks the sitemap index breadth first and returns unique job page URLs in
/// discovery order. Only a failure on the index itself is fatal.
async fn collect_job_urls(
    client: &Client,
    index_url: &str,
    rule: &SitemapRule,
    job_path: &Regex,
    delay: Duration,
) -> Result<Vec<String>> {
    let mut to_visit = VecDeque::from([index_url.to_owned()]);
    let mut visited = HashSet::new();
    let mut seen_jobs = HashSet::new();
    let mut job_urls = Vec::new();

    while let Some(sitemap_url) = to_visit.pop_front() {
        if rule.max_sitemaps.map_or(false, |max| visited.len() >= max) {
            break;
        }
        if !visited.insert(sitemap_url.clone()) {
            continue;
        }
        let locs = match get_text(client.get(&sitemap_url), &sitemap_url, ACCEPT_XML).await {
            Ok(xml) => sitemap_locs(&sitemap_url, &xml),
            Err(e) => Err(e),
        };
        let locs = match locs {
            Ok(locs) => locs,
            Err(e) if sitemap_url == index_url => return Err(e),
            Err(e) => {
                log::warn!("skipping sitemap {}: {}", sitemap_url, e);
                continue;
            }
        };
        for loc in locs {
            if is_nested_sitemap(&loc) {
                if !visited.contains(&loc) {
                    to_visit.push_back(loc);
                }
            } else if is_job_url(&loc, &rule.host_suffix, job_path) && seen_jobs.insert(loc.clone()) {
                job_urls.push(loc);
            }
        }
        tokio::time::sleep(delay).await;
    }
    log::debug!(
        "visited {} sitemaps from {}, found {} job pages",
        visited.len(),
        index_url,
        job_urls.len()
    );
    Ok(job_urls)
}

/// Title from the first `<h1>`, falling back to `<title>`; location from a
/// `Location:` label anywhere in the page text.
pub fn parse_job_detail(company: &str, url: &str, html: &str) -> Option<Posting> {
    let doc = Html::parse_document(html);
    let heading = |selector: &Selector| {
        doc.select(selector)
            .next()
            .map(|el| squash_whitespace(&el.text().collect::<String>()))
            .filter(|text| !text.is_empty())
    };
    let title = heading(&*H1).or_else(|| heading(&*TITLE))?;

    let text = doc
        .root_element()
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    let location = LOCATION_RE
        .captures(&text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| normalize_free_text(m.as_str()));

    Some(Posting::new(company, &title, url).with_location(location))
}

/// Job URLs worth visiting. A sitemap without any job URL most likely
/// changed shape, so it is an error rather than an empty result.
fn visit_list(mut job_urls: Vec<String>, max_jobs: Option<usize>) -> Result<Vec<String>> {
    if job_urls.is_empty() {
        return Err(FetchError::ContentNotFound("job pages in sitemap"));
    }
    if let Some(max) = max_jobs {
        job_urls.truncate(max);
    }
    Ok(job_urls)
}

/// Outcome of visiting the detail pages one by one.
#[derive(Default)]
struct DetailPages {
    postings: Vec<Posting>,
    visited: usize,
    failed: usize,
}

impl DetailPages {
    fn record(&mut self, company: &str, url: &str, page: Result<String>) {
        self.visited += 1;
        match page {
            Ok(html) => match parse_job_detail(company, url, &html) {
                Some(posting) => self.postings.push(posting),
                None => log::warn!("{}: no title found on {}", company, url),
            },
            Err(e) => {
                self.failed += 1;
                log::warn!("{}: failed to scrape job page {}: {}", company, url, e);
            }
        }
    }

    /// Individual pages may fail; ending up without any posting fails the
    /// whole fetch.
    fn finish(self) -> Result<Vec<Posting>> {
        if self.visited > 0 && self.postings.is_empty() {
            if self.failed == self.visited {
                return Err(FetchError::NoJobPages(self.failed));
            }
            return Err(FetchError::ContentNotFound("job title on detail pages"));
        }
        Ok(self.postings)
    }
}

pub(crate) async fn fetch(
    client: &Client,
    company: &CompanyConfig,
    rule: &SitemapRule,
    delay: Duration,
) -> Result<Vec<Posting>> {
    let job_path = Regex::new(&rule.job_path).map_err(|e| FetchError::parse(&company.url, e))?;
    let job_urls = collect_job_urls(client, &company.url, rule, &job_path, delay).await?;
    let job_urls = visit_list(job_urls, rule.max_jobs)?;

    let mut pages = DetailPages::default();
    for url in &job_urls {
        let page = get_text(client.get(url), url, ACCEPT_HTML).await;
        pages.record(&company.name, url, page);
        tokio::time::sleep(delay).await;
    }
    pages.finish()
}
