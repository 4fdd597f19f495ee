use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FetchError>;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Request error: '{0}'")]
    Request(#[from] reqwest::Error),
    #[error("Failed to scrape data from: '{0}', status: {1}")]
    RequestNotOk(String, reqwest::StatusCode),
    #[error("Failed to parse response from '{url}': {reason}")]
    Parse { url: String, reason: String },
    #[error("Content not found in html: '{0}'")]
    ContentNotFound(&'static str),
    #[error("None of the {0} job pages could be scraped")]
    NoJobPages(usize),
}

impl FetchError {
    pub(crate) fn parse(url: &str, reason: impl ToString) -> Self {
        FetchError::Parse {
            url: url.to_owned(),
            reason: reason.to_string(),
        }
    }

    /// True when the site answered but its content could not be understood.
    pub fn is_parse_failure(&self) -> bool {
        match self {
            FetchError::Parse { .. } | FetchError::ContentNotFound(_) => true,
            FetchError::Request(e) => e.is_decode(),
            FetchError::RequestNotOk(..) | FetchError::NoJobPages(_) => false,
        }
    }
}

/// The natural key of a posting, unique per store.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity {
    pub company: String,
    pub title: String,
    pub link: String,
}

/// A job listing as observed on a career page during one fetch.
/// Not authoritative until merged into the store.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Posting {
    pub company: String,
    pub title: String,
    pub location: Option<String>,
    pub link: String,
    pub department: Option<String>,
    /// formatted as yyyy-mm-dd
    pub posted_on: Option<NaiveDate>,
}

impl Posting {
    pub fn new(company: &str, title: &str, link: &str) -> Self {
        Self {
            company: company.to_owned(),
            title: title.trim().to_owned(),
            location: None,
            link: link.trim().to_owned(),
            department: None,
            posted_on: None,
        }
    }

    pub fn with_location(mut self, location: Option<String>) -> Self {
        self.location = location.filter(|l| !l.trim().is_empty());
        self
    }

    pub fn with_department(mut self, department: Option<String>) -> Self {
        self.department = department
            .map(|d| d.trim().to_owned())
            .filter(|d| !d.is_empty());
        self
    }

    pub fn with_posted_on(mut self, posted_on: Option<NaiveDate>) -> Self {
        self.posted_on = posted_on;
        self
    }

    pub fn identity(&self) -> Identity {
        Identity {
            company: self.company.clone(),
            title: self.title.clone(),
            link: self.link.clone(),
        }
    }
}

/// Collapses whitespace runs (including newlines from nested markup) into single spaces.
pub(crate) fn squash_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
