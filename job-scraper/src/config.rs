use regex::Regex;
use reqwest::Url;
use scraper::Selector;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Company entry #{index} is malformed: '{reason}'")]
    Malformed { index: usize, reason: String },
    #[error("Company entry #{0} has an empty name")]
    EmptyName(usize),
    #[error("Company '{company}' has an invalid url: '{url}'")]
    InvalidUrl { company: String, url: String },
    #[error("Company '{company}' has an invalid selector '{selector}': {reason}")]
    InvalidSelector {
        company: String,
        selector: String,
        reason: String,
    },
    #[error("Company '{company}' has an invalid job path pattern: {reason}")]
    InvalidPattern { company: String, reason: String },
    #[error("Company '{0}' is configured more than once")]
    Duplicate(String),
}

impl ConfigError {
    /// The company the error belongs to, when the entry got far enough to name one.
    pub fn company(&self) -> Option<&str> {
        match self {
            ConfigError::Malformed { .. } | ConfigError::EmptyName(_) => None,
            ConfigError::InvalidUrl { company, .. }
            | ConfigError::InvalidSelector { company, .. }
            | ConfigError::InvalidPattern { company, .. } => Some(company.as_str()),
            ConfigError::Duplicate(company) => Some(company.as_str()),
        }
    }
}

/// CSS selectors for a plain listing page. Every `item` match is one posting.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct HtmlRule {
    pub item: String,
    pub title: String,
    /// Element whose `href` holds the posting link, relative to the item.
    #[serde(default = "default_link_selector")]
    pub link: String,
    pub location: Option<String>,
    pub department: Option<String>,
}

fn default_link_selector() -> String {
    "a".to_owned()
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SitemapRule {
    /// Regex matched against the path of every `<loc>` to find job detail pages.
    pub job_path: String,
    pub host_suffix: String,
    pub max_sitemaps: Option<usize>,
    pub max_jobs: Option<usize>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AmazonRule {
    #[serde(default)]
    pub base_query: String,
    #[serde(default = "default_country_code")]
    pub country_code: String,
    #[serde(default = "default_result_limit")]
    pub result_limit: u32,
    pub max_pages: Option<u32>,
}

fn default_country_code() -> String {
    "USA".to_owned()
}

fn default_result_limit() -> u32 {
    50
}

/// How postings are pulled out of a company's career page.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtractionRule {
    Html(HtmlRule),
    Rss,
    Sitemap(SitemapRule),
    AmazonSearch(AmazonRule),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CompanyConfig {
    pub name: String,
    pub url: String,
    pub rule: ExtractionRule,
}

impl CompanyConfig {
    pub fn validate(&self, index: usize) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyName(index));
        }
        let url_ok = Url::parse(&self.url)
            .map(|url| matches!(url.scheme(), "http" | "https"))
            .unwrap_or(false);
        if !url_ok {
            return Err(ConfigError::InvalidUrl {
                company: self.name.clone(),
                url: self.url.clone(),
            });
        }
        match &self.rule {
            ExtractionRule::Html(rule) => {
                let selectors = [Some(&rule.item), Some(&rule.title), Some(&rule.link)]
                    .into_iter()
                    .chain([rule.location.as_ref(), rule.department.as_ref()]);
                for selector in selectors.flatten() {
                    Selector::parse(selector).map_err(|e| ConfigError::InvalidSelector {
                        company: self.name.clone(),
                        selector: selector.clone(),
                        reason: format!("{:?}", e),
                    })?;
                }
            }
            ExtractionRule::Sitemap(rule) => {
                Regex::new(&rule.job_path).map_err(|e| ConfigError::InvalidPattern {
                    company: self.name.clone(),
                    reason: e.to_string(),
                })?;
            }
            ExtractionRule::Rss | ExtractionRule::AmazonSearch(_) => {}
        }
        Ok(())
    }
}

/// Validates every entry on its own: a bad entry is reported and dropped,
/// the rest are kept in their original order. Entries carry their position
/// in the configuration file.
pub fn validate_companies(
    companies: impl IntoIterator<Item = (usize, CompanyConfig)>,
) -> (Vec<CompanyConfig>, Vec<ConfigError>) {
    let mut seen = HashSet::new();
    let mut valid = Vec::new();
    let mut rejected = Vec::new();
    for (index, company) in companies {
        if let Err(e) = company.validate(index) {
            rejected.push(e);
            continue;
        }
        if !seen.insert(company.name.clone()) {
            rejected.push(ConfigError::Duplicate(company.name));
            continue;
        }
        valid.push(company);
    }
    (valid, rejected)
}
