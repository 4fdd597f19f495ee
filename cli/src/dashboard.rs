//! Local web dashboard: filter form, postings table, per-company run status
//! and a refresh button that triggers a run.

use std::net::SocketAddr;
use std::sync::Arc;

use askama::Template;
use axum::extract::{RawQuery, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use job_scraper::location::display_location;
use job_scraper::PostingSource;
use persistence::{Filter, RunRecord, RunStatus, StoreError, StoredPosting};
use thiserror::Error;

use crate::scrape::{RunError, Tracker};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Store error: '{0}'")]
    Store(#[from] StoreError),
    #[error("Failed to render page: '{0}'")]
    Render(#[from] askama::Error),
    #[error("{0}")]
    Run(#[from] RunError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::Run(RunError::AlreadyRunning) => StatusCode::CONFLICT,
            AppError::Store(_) | AppError::Render(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            log::error!("{}", self);
        }
        (status, self.to_string()).into_response()
    }
}

/// Reads `keyword`, repeated `location`, `new_only` and `active_only` from a
/// query string. Unknown parameters are ignored.
pub fn parse_filter(query: Option<&str>) -> Filter {
    let mut filter = Filter::new();
    let Some(query) = query else {
        return filter;
    };
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "keyword" => filter = filter.keyword(&value),
            "location" if !value.trim().is_empty() => filter = filter.location(&value),
            "new_only" => filter = filter.new_only(is_checked(&value)),
            "active_only" => filter = filter.active_only(is_checked(&value)),
            _ => {}
        }
    }
    filter
}

fn is_checked(value: &str) -> bool {
    matches!(value, "on" | "true" | "1")
}

struct LocationOption {
    key: String,
    label: String,
    selected: bool,
}

struct PostingRow {
    company: String,
    title: String,
    link: String,
    location: String,
    department: String,
    posted_on: String,
    first_seen: String,
    last_seen: String,
    is_new: bool,
    gone_since: String,
}

impl PostingRow {
    fn new(posting: StoredPosting, latest_run: Option<NaiveDate>) -> Self {
        let is_new = latest_run
            .map(|date| posting.first_seen == date && posting.last_seen == date)
            .unwrap_or(false);
        Self {
            location: display_location(posting.location.as_deref()),
            department: posting.department.unwrap_or_default(),
            posted_on: posting.posted_on.map(|d| d.to_string()).unwrap_or_default(),
            first_seen: posting.first_seen.to_string(),
            last_seen: posting.last_seen.to_string(),
            gone_since: posting
                .disappeared_on
                .map(|d| d.to_string())
                .unwrap_or_default(),
            is_new,
            company: posting.company,
            title: posting.title,
            link: posting.link,
        }
    }
}

struct StatusRow {
    company: String,
    run_date: String,
    status: &'static str,
    healthy: bool,
    new_count: i64,
    still_present_count: i64,
    disappeared_count: i64,
    message: String,
}

impl From<RunRecord> for StatusRow {
    fn from(record: RunRecord) -> Self {
        Self {
            company: record.company,
            run_date: record.run_date.to_string(),
            status: record.status.label(),
            healthy: record.status == RunStatus::Ok,
            new_count: record.new_count,
            still_present_count: record.still_present_count,
            disappeared_count: record.disappeared_count,
            message: record.message.unwrap_or_default(),
        }
    }
}

#[derive(Template)]
#[template(path = "dashboard.html")]
struct DashboardPage {
    keyword: String,
    new_only: bool,
    active_only: bool,
    latest_run: String,
    locations: Vec<LocationOption>,
    postings: Vec<PostingRow>,
    statuses: Vec<StatusRow>,
}

async fn index<S>(
    State(tracker): State<Arc<Tracker<S>>>,
    RawQuery(query): RawQuery,
) -> Result<Html<String>, AppError>
where
    S: PostingSource + Send + Sync + 'static,
{
    let filter = parse_filter(query.as_deref());
    let store = tracker.store();
    let latest_run = store.latest_run_date().await?;

    let locations = store
        .list_locations()
        .await?
        .into_iter()
        .map(|key| LocationOption {
            label: display_location(Some(&key)),
            selected: filter.locations.contains(&key),
            key,
        })
        .collect();
    let postings = store
        .query(&filter)
        .await?
        .into_iter()
        .map(|posting| PostingRow::new(posting, latest_run))
        .collect();
    let statuses = store
        .latest_runs()
        .await?
        .into_iter()
        .map(StatusRow::from)
        .collect();

    let page = DashboardPage {
        keyword: filter.keyword.clone().unwrap_or_default(),
        new_only: filter.new_only,
        active_only: filter.active_only,
        latest_run: latest_run
            .map(|d| d.to_string())
            .unwrap_or_else(|| "never".to_owned()),
        locations,
        postings,
        statuses,
    };
    Ok(Html(page.render()?))
}

async fn refresh<S>(State(tracker): State<Arc<Tracker<S>>>) -> Result<Redirect, AppError>
where
    S: PostingSource + Send + Sync + 'static,
{
    let summary = tracker.run_today().await?;
    log::info!(
        "refresh finished with {} of {} companies failing",
        summary.failures(),
        summary.records.len()
    );
    Ok(Redirect::to("/"))
}

async fn postings<S>(
    State(tracker): State<Arc<Tracker<S>>>,
    RawQuery(query): RawQuery,
) -> Result<Json<Vec<StoredPosting>>, AppError>
where
    S: PostingSource + Send + Sync + 'static,
{
    let filter = parse_filter(query.as_deref());
    Ok(Json(tracker.store().query(&filter).await?))
}

pub fn router<S>(tracker: Arc<Tracker<S>>) -> Router
where
    S: PostingSource + Send + Sync + 'static,
{
    Router::new()
        .route("/", get(index::<S>))
        .route("/refresh", post(refresh::<S>))
        .route("/api/postings", get(postings::<S>))
        .with_state(tracker)
}

/// Serves the dashboard on `addr` until ctrl+c.
pub async fn serve<S>(tracker: Arc<Tracker<S>>, addr: SocketAddr) -> anyhow::Result<()>
where
    S: PostingSource + Send + Sync + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("dashboard listening on http://{}", addr);
    tokio::select! {
        result = axum::serve(listener, router(tracker)) => {
            if let Err(e) = result {
                log::warn!("server ended unexpectedly: {}", e);
            }
        },
        _ = tokio::signal::ctrl_c() => {
            log::info!("received ctrl+c, closing dashboard");
        }
    }
    Ok(())
}
