use std::collections::HashSet;
use std::time::Duration;

use chrono::NaiveDate;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::Value;

use crate::config::{AmazonRule, CompanyConfig};
use crate::http::{get_text, ACCEPT_JSON};
use crate::location::normalize_location;
use crate::types::{squash_whitespace, FetchError, Identity, Posting, Result};

/// Pages in a row that add nothing new before pagination is considered stuck.
const MAX_PAGES_WITHOUT_NEW: u32 = 3;

#[derive(Deserialize, Debug)]
pub struct SearchPage {
    hits: Option<u64>,
    /// required: a body without it is an error payload, not an empty result
    jobs: Vec<SearchJob>,
}

#[derive(Deserialize, Debug)]
struct SearchJob {
    title: Option<String>,
    job_path: Option<String>,
    /// Either objects or JSON-encoded strings, depending on the endpoint version.
    #[serde(default)]
    locations: Vec<Value>,
    country_code: Option<String>,
    state: Option<String>,
    city: Option<String>,
    job_category: Option<String>,
    posted_date: Option<String>,
}

fn search_params(rule: &AmazonRule, offset: usize) -> Vec<(&'static str, String)> {
    vec![
        ("base_query", rule.base_query.clone()),
        ("offset", offset.to_string()),
        ("result_limit", rule.result_limit.to_string()),
        ("sort", "recent".to_owned()),
        ("normalized_country_code[]", rule.country_code.clone()),
    ]
}

pub fn parse_page(url: &str, body: &str) -> Result<SearchPage> {
    serde_json::from_str(body).map_err(|e| FetchError::parse(url, e))
}

fn job_location(job: &SearchJob) -> Option<String> {
    let first = job
        .locations
        .first()
        .and_then(|loc| match loc {
            Value::String(encoded) => serde_json::from_str::<Value>(encoded).ok(),
            other => Some(other.clone()),
        })
        .filter(Value::is_object);
    if let Some(loc) = first {
        let field = |names: &[&str]| {
            names.iter().find_map(|name| {
                loc.get(*name)
                    .and_then(Value::as_str)
                    .filter(|value| !value.trim().is_empty())
            })
        };
        return normalize_location(
            field(&["countryIso2a", "normalizedCountryCode"]),
            field(&["region", "normalizedStateName"]),
            field(&["normalizedCityName", "city"]),
        );
    }
    normalize_location(
        job.country_code.as_deref(),
        job.state.as_deref(),
        job.city.as_deref(),
    )
}

fn posted_on(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%B %d, %Y")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y-%m-%d"))
        .ok()
}

pub fn page_postings(company: &str, base: &Url, page: &SearchPage) -> Vec<Posting> {
    page.jobs
        .iter()
        .filter_map(|job| {
            let title = job.title.as_deref().map(squash_whitespace).filter(|t| !t.is_empty())?;
            let path = job.job_path.as_deref().filter(|p| !p.trim().is_empty())?;
            let link = base.join(path.trim()).ok()?;
            Some(
                Posting::new(company, &title, link.as_str())
                    .with_location(job_location(job))
                    .with_department(job.job_category.clone())
                    .with_posted_on(job.posted_date.as_deref().and_then(posted_on)),
            )
        })
        .collect()
}

/// Bookkeeping of the offset pagination: where the next page starts and
/// whether another page is worth requesting.
struct Pager {
    max_pages: Option<u32>,
    offset: usize,
    pages: u32,
    pages_without_new: u32,
    seen: HashSet<Identity>,
    postings: Vec<Posting>,
}

impl Pager {
    fn new(max_pages: Option<u32>) -> Self {
        Self {
            max_pages,
            offset: 0,
            pages: 0,
            pages_without_new: 0,
            seen: HashSet::new(),
            postings: Vec::new(),
        }
    }

    fn wants_more(&self) -> bool {
        !self.max_pages.map_or(false, |max| self.pages >= max)
    }

    /// Takes in one page holding `job_count` raw jobs. Returns false once
    /// pagination should stop: an empty page, the reported hit count, the
    /// page cap, or a run of pages that add no new postings.
    fn absorb(
        &mut self,
        company: &str,
        job_count: usize,
        hits: Option<u64>,
        postings: Vec<Posting>,
    ) -> bool {
        if job_count == 0 {
            return false;
        }
        let before = self.postings.len();
        for posting in postings {
            if self.seen.insert(posting.identity()) {
                self.postings.push(posting);
            }
        }
        self.pages += 1;
        log::debug!(
            "{}: page {} at offset {} added {} postings",
            company,
            self.pages,
            self.offset,
            self.postings.len() - before
        );

        if self.postings.len() == before {
            self.pages_without_new += 1;
            if self.pages_without_new >= MAX_PAGES_WITHOUT_NEW {
                log::warn!("{}: pagination stopped adding postings, giving up", company);
                return false;
            }
        } else {
            self.pages_without_new = 0;
        }

        self.offset += job_count;
        if hits.map_or(false, |hits| self.offset as u64 >= hits) {
            return false;
        }
        self.wants_more()
    }
}

pub(crate) async fn fetch(
    client: &Client,
    company: &CompanyConfig,
    rule: &AmazonRule,
    delay: Duration,
) -> Result<Vec<Posting>> {
    let base = Url::parse(&company.url).map_err(|e| FetchError::parse(&company.url, e))?;
    let mut pager = Pager::new(rule.max_pages);

    while pager.wants_more() {
        let request = client
            .get(&company.url)
            .query(&search_params(rule, pager.offset));
        let body = get_text(request, &company.url, ACCEPT_JSON).await?;
        let page = parse_page(&company.url, &body)?;
        let postings = page_postings(&company.name, &base, &page);
        if !pager.absorb(&company.name, page.jobs.len(), page.hits, postings) {
            break;
        }
        tokio::time::sleep(delay).await;
    }
    Ok(pager.postings)
}

#[cfg(test)]
mod test {
    use super::*;

    const PAGE: &str = r#"{
        "hits": 3,
        "jobs": [
            {
                "title": "Software Development Engineer",
                "job_path": "/en/jobs/2790001/software-development-engineer",
                "locations": ["{\"normalizedCityName\":\"Seattle\",\"region\":\"WA\",\"countryIso2a\":\"US\",\"buildingCodes\":[\"SEA40\"]}"],
                "job_category": "Software Development",
                "posted_date": "October 1, 2026"
            },
            {
                "title": "Applied Scientist",
                "job_path": "/en/jobs/2790002/applied-scientist",
                "locations": [{"city": "new york", "normalizedStateName": "ny", "normalizedCountryCode": "us"}]
            },
            {
                "title": "Solutions Architect",
                "job_path": "/en/jobs/2790003/solutions-architect",
                "country_code": "USA",
                "state": "VA",
                "city": "Arlington"
            },
            { "title": "", "job_path": "/en/jobs/2790004/blank" },
            { "title": "No path" }
        ]
    }"#;

    #[test]
    fn test_page_postings() {
        let base = Url::parse("https://www.amazon.jobs/search.json").unwrap();
        let page = parse_page("https://www.amazon.jobs/search.json", PAGE).unwrap();
        assert_eq!(page.hits, Some(3));

        let postings = page_postings("Amazon", &base, &page);
        assert_eq!(postings.len(), 3);

        assert_eq!(
            postings[0].link,
            "https://www.amazon.jobs/en/jobs/2790001/software-development-engineer"
        );
        assert_eq!(postings[0].location.as_deref(), Some("US-WA-Seattle"));
        assert_eq!(postings[0].department.as_deref(), Some("Software Development"));
        assert_eq!(postings[0].posted_on, NaiveDate::from_ymd_opt(2026, 10, 1));

        assert_eq!(postings[1].location.as_deref(), Some("US-NY-New_York"));
        assert_eq!(postings[2].location.as_deref(), Some("USA-VA-Arlington"));
    }

    #[test]
    fn test_search_params() {
        let rule = AmazonRule {
            base_query: "rust".to_owned(),
            country_code: "USA".to_owned(),
            result_limit: 25,
            max_pages: None,
        };
        let params = search_params(&rule, 50);
        assert!(params.contains(&("offset", "50".to_owned())));
        assert!(params.contains(&("result_limit", "25".to_owned())));
        assert!(params.contains(&("normalized_country_code[]", "USA".to_owned())));
    }

    #[test]
    fn test_invalid_json_is_a_parse_failure() {
        let err = parse_page("https://www.amazon.jobs/search.json", "<html>").unwrap_err();
        assert!(err.is_parse_failure());
    }

    #[test]
    fn test_error_body_is_a_parse_failure() {
        let err = parse_page(
            "https://www.amazon.jobs/search.json",
            r#"{"error": "service unavailable"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, FetchError::Parse { .. }));
        assert!(err.is_parse_failure());

        let empty = parse_page("https://www.amazon.jobs/search.json", r#"{"hits": 0, "jobs": []}"#)
            .unwrap();
        assert!(empty.jobs.is_empty());
    }

    fn jobs(range: std::ops::Range<u32>) -> Vec<Posting> {
        range
            .map(|n| Posting::new("Amazon", &format!("Job {}", n), &format!("https://amazon.example/{}", n)))
            .collect()
    }

    #[test]
    fn test_pager_stops_on_empty_page() {
        let mut pager = Pager::new(None);
        assert!(pager.absorb("Amazon", 2, None, jobs(0..2)));
        assert_eq!(pager.offset, 2);
        assert!(!pager.absorb("Amazon", 0, None, vec![]));
        assert_eq!(pager.postings.len(), 2);
    }

    #[test]
    fn test_pager_stops_at_hit_count() {
        let mut pager = Pager::new(None);
        assert!(pager.absorb("Amazon", 2, Some(5), jobs(0..2)));
        assert!(pager.absorb("Amazon", 2, Some(5), jobs(2..4)));
        assert!(!pager.absorb("Amazon", 2, Some(5), jobs(4..6)));
        assert_eq!(pager.offset, 6);
        assert_eq!(pager.postings.len(), 6);
    }

    #[test]
    fn test_pager_respects_page_cap() {
        let mut pager = Pager::new(Some(2));
        assert!(pager.wants_more());
        assert!(pager.absorb("Amazon", 2, None, jobs(0..2)));
        assert!(!pager.absorb("Amazon", 2, None, jobs(2..4)));
        assert!(!pager.wants_more());

        assert!(!Pager::new(Some(0)).wants_more());
    }

    #[test]
    fn test_pager_gives_up_after_pages_without_new_postings() {
        let mut pager = Pager::new(None);
        assert!(pager.absorb("Amazon", 2, None, jobs(0..2)));
        assert!(pager.absorb("Amazon", 2, None, jobs(0..2)));
        assert!(pager.absorb("Amazon", 2, None, jobs(1..2)));
        // a new posting resets the count
        assert!(pager.absorb("Amazon", 2, None, jobs(2..3)));
        assert!(pager.absorb("Amazon", 2, None, jobs(0..3)));
        assert!(pager.absorb("Amazon", 2, None, jobs(0..3)));
        assert!(!pager.absorb("Amazon", 2, None, jobs(0..3)));
        assert_eq!(pager.postings.len(), 3);
        assert_eq!(pager.pages, 7);
    }
}
