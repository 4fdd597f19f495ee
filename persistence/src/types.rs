use std::fmt::Display;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use job_scraper::{Identity, Posting};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: '{0}'")]
    Database(#[from] sqlx::Error),
    #[error("Unknown run status in store: '{0}'")]
    InvalidStatus(String),
}

/// What happens to a stored posting once it stops showing up in fetches.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Retention {
    /// keep the row, `last_seen` stays at the last sighting
    #[default]
    Keep,
    Delete,
}

/// The authoritative record of a posting.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct StoredPosting {
    pub company: String,
    pub title: String,
    pub link: String,
    pub location: Option<String>,
    pub department: Option<String>,
    pub posted_on: Option<NaiveDate>,
    pub first_seen: NaiveDate,
    pub last_seen: NaiveDate,
    pub disappeared_on: Option<NaiveDate>,
}

impl StoredPosting {
    /// A posting observed for the first time on `today`.
    pub fn first_sighting(posting: Posting, today: NaiveDate) -> Self {
        Self {
            company: posting.company,
            title: posting.title,
            link: posting.link,
            location: posting.location,
            department: posting.department,
            posted_on: posting.posted_on,
            first_seen: today,
            last_seen: today,
            disappeared_on: None,
        }
    }

    /// This record seen again on `today`, with the freshly scraped attributes.
    pub fn seen_again(&self, posting: Posting, today: NaiveDate) -> Self {
        Self {
            first_seen: self.first_seen,
            ..Self::first_sighting(posting, today)
        }
    }

    pub fn identity(&self) -> Identity {
        Identity {
            company: self.company.clone(),
            title: self.title.clone(),
            link: self.link.clone(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.disappeared_on.is_none()
    }
}

/// Outcome of reconciling one company's fetch against the store.
#[derive(Serialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct DiffResult {
    pub new: Vec<StoredPosting>,
    pub still_present: Vec<StoredPosting>,
    /// Records as they were before this run.
    pub disappeared: Vec<StoredPosting>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Ok,
    FetchFailed,
    ParseFailed,
    ConfigInvalid,
    StoreFailed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Ok => "ok",
            RunStatus::FetchFailed => "fetch_failed",
            RunStatus::ParseFailed => "parse_failed",
            RunStatus::ConfigInvalid => "config_invalid",
            RunStatus::StoreFailed => "store_failed",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RunStatus::Ok => "ok",
            RunStatus::FetchFailed => "fetch failed",
            RunStatus::ParseFailed => "parse failed",
            RunStatus::ConfigInvalid => "config invalid",
            RunStatus::StoreFailed => "store failed",
        }
    }
}

impl Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for RunStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ok" => Ok(RunStatus::Ok),
            "fetch_failed" => Ok(RunStatus::FetchFailed),
            "parse_failed" => Ok(RunStatus::ParseFailed),
            "config_invalid" => Ok(RunStatus::ConfigInvalid),
            "store_failed" => Ok(RunStatus::StoreFailed),
            other => Err(StoreError::InvalidStatus(other.to_owned())),
        }
    }
}

/// Per-company outcome of one run.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub company: String,
    pub run_date: NaiveDate,
    pub status: RunStatus,
    pub new_count: i64,
    pub still_present_count: i64,
    pub disappeared_count: i64,
    pub message: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl RunRecord {
    pub fn succeeded(company: &str, run_date: NaiveDate, diff: &DiffResult) -> Self {
        Self {
            company: company.to_owned(),
            run_date,
            status: RunStatus::Ok,
            new_count: diff.new.len() as i64,
            still_present_count: diff.still_present.len() as i64,
            disappeared_count: diff.disappeared.len() as i64,
            message: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn failed(company: &str, run_date: NaiveDate, status: RunStatus, message: String) -> Self {
        Self {
            company: company.to_owned(),
            run_date,
            status,
            new_count: 0,
            still_present_count: 0,
            disappeared_count: 0,
            message: Some(message),
            recorded_at: Utc::now(),
        }
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct RunRow {
    pub company: String,
    pub run_date: NaiveDate,
    pub status: String,
    pub new_count: i64,
    pub still_present_count: i64,
    pub disappeared_count: i64,
    pub message: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl TryFrom<RunRow> for RunRecord {
    type Error = StoreError;

    fn try_from(row: RunRow) -> Result<Self> {
        Ok(Self {
            status: row.status.parse()?,
            company: row.company,
            run_date: row.run_date,
            new_count: row.new_count,
            still_present_count: row.still_present_count,
            disappeared_count: row.disappeared_count,
            message: row.message,
            recorded_at: row.recorded_at,
        })
    }
}
