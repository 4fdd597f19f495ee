use std::collections::HashSet;

use chrono::{Local, NaiveDate};
use futures::{stream, StreamExt};
use job_scraper::{CompanyConfig, ConfigError, FetchError, Posting, PostingSource};
use persistence::{reconcile, Retention, RunRecord, RunStatus, Store};
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RunError {
    #[error("Run already in progress")]
    AlreadyRunning,
}

/// What one pass over the configured companies did.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_date: NaiveDate,
    /// one record per company, valid entries in configuration order
    pub records: Vec<RunRecord>,
    /// rejected entries that could not be attributed to a company
    pub unnamed_rejections: Vec<String>,
}

impl RunSummary {
    pub fn failures(&self) -> usize {
        self.records
            .iter()
            .filter(|record| record.status != RunStatus::Ok)
            .count()
    }
}

/// Runs fetch and reconcile for every configured company. Only one run
/// can be in progress at a time.
pub struct Tracker<S> {
    source: S,
    store: Store,
    companies: Vec<CompanyConfig>,
    rejected: Vec<ConfigError>,
    retention: Retention,
    concurrency: usize,
    running: Mutex<()>,
}

impl<S> Tracker<S>
where
    S: PostingSource + Send + Sync,
{
    pub fn new(source: S, store: Store, companies: Vec<CompanyConfig>) -> Self {
        Self {
            source,
            store,
            companies,
            rejected: Vec::new(),
            retention: Retention::default(),
            concurrency: 3,
            running: Mutex::new(()),
        }
    }

    pub fn with_rejected(mut self, rejected: Vec<ConfigError>) -> Self {
        self.rejected = rejected;
        self
    }

    pub fn with_retention(mut self, retention: Retention) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub async fn run_today(&self) -> Result<RunSummary, RunError> {
        self.run(Local::now().date_naive()).await
    }

    /// Fetches every company with bounded parallelism, then reconciles the
    /// results one company at a time. A failed fetch leaves that company's
    /// stored postings untouched.
    pub async fn run(&self, today: NaiveDate) -> Result<RunSummary, RunError> {
        let _running = self
            .running
            .try_lock()
            .map_err(|_| RunError::AlreadyRunning)?;
        log::info!(
            "starting run for {} companies on {}",
            self.companies.len(),
            today
        );

        let mut summary = RunSummary {
            run_date: today,
            records: Vec::with_capacity(self.companies.len() + self.rejected.len()),
            unnamed_rejections: Vec::new(),
        };
        self.record_rejected(today, &mut summary).await;

        let mut fetched = stream::iter(0..self.companies.len())
            .map(|position| async move {
                (position, self.source.fetch(&self.companies[position]).await)
            })
            .buffer_unordered(self.concurrency)
            .collect::<Vec<_>>()
            .await;
        fetched.sort_by_key(|(position, _)| *position);

        for (position, result) in fetched {
            let company = &self.companies[position];
            let record = self.settle(company, result, today).await;
            summary.records.push(record);
        }

        log::info!(
            "run finished: {} companies, {} failed",
            summary.records.len(),
            summary.failures()
        );
        Ok(summary)
    }

    async fn record_rejected(&self, today: NaiveDate, summary: &mut RunSummary) {
        let configured = self
            .companies
            .iter()
            .map(|company| company.name.as_str())
            .collect::<HashSet<_>>();
        for error in &self.rejected {
            match error.company() {
                Some(company) if !configured.contains(company) => {
                    let record = RunRecord::failed(
                        company,
                        today,
                        RunStatus::ConfigInvalid,
                        error.to_string(),
                    );
                    self.save_record(&record).await;
                    summary.records.push(record);
                }
                Some(_) => log::warn!("{}", error),
                None => summary.unnamed_rejections.push(error.to_string()),
            }
        }
    }

    async fn settle(
        &self,
        company: &CompanyConfig,
        result: Result<Vec<Posting>, FetchError>,
        today: NaiveDate,
    ) -> RunRecord {
        let postings = match result {
            Ok(postings) => postings,
            Err(e) => {
                log::error!("{}: {}", company.name, e);
                let status = if e.is_parse_failure() {
                    RunStatus::ParseFailed
                } else {
                    RunStatus::FetchFailed
                };
                let record = RunRecord::failed(&company.name, today, status, e.to_string());
                self.save_record(&record).await;
                return record;
            }
        };

        match reconcile(&self.store, &company.name, postings, today, self.retention).await {
            Ok(diff) => RunRecord::succeeded(&company.name, today, &diff),
            Err(e) => {
                log::error!("{}: changes rolled back: {}", company.name, e);
                let record =
                    RunRecord::failed(&company.name, today, RunStatus::StoreFailed, e.to_string());
                self.save_record(&record).await;
                record
            }
        }
    }

    async fn save_record(&self, record: &RunRecord) {
        if let Err(e) = self.store.record_run(record).await {
            log::error!("{}: failed to save run record: {}", record.company, e);
        }
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;
    use std::sync::Arc;

    use async_trait::async_trait;
    use job_scraper::ExtractionRule;
    use persistence::Filter;
    use tokio::sync::Notify;

    use super::*;

    enum Canned {
        Postings(Vec<Posting>),
        Unreachable,
        Garbled,
    }

    #[derive(Default)]
    struct StubSource {
        responses: HashMap<String, Canned>,
    }

    impl StubSource {
        fn with(mut self, company: &str, canned: Canned) -> Self {
            self.responses.insert(company.to_owned(), canned);
            self
        }
    }

    #[async_trait]
    impl PostingSource for StubSource {
        async fn fetch(&self, company: &CompanyConfig) -> Result<Vec<Posting>, FetchError> {
            match self.responses.get(&company.name) {
                Some(Canned::Postings(postings)) => Ok(postings.clone()),
                Some(Canned::Garbled) => Err(FetchError::ContentNotFound("job listing")),
                Some(Canned::Unreachable) | None => Err(FetchError::NoJobPages(2)),
            }
        }
    }

    fn company(name: &str) -> CompanyConfig {
        CompanyConfig {
            name: name.to_owned(),
            url: format!("https://{}.example.com/jobs.xml", name.to_lowercase()),
            rule: ExtractionRule::Rss,
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, d).unwrap()
    }

    fn posting(company: &str, title: &str) -> Posting {
        Posting::new(company, title, &format!("https://example.com/{}", title))
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_store_untouched() {
        let store = Store::in_memory().await.unwrap();
        let source = StubSource::default()
            .with("Acme", Canned::Postings(vec![posting("Acme", "A")]))
            .with("Beta", Canned::Postings(vec![posting("Beta", "B")]));
        let tracker = Tracker::new(source, store, vec![company("Acme"), company("Beta")]);
        tracker.run(day(1)).await.unwrap();

        let Tracker {
            store, companies, ..
        } = tracker;
        let source = StubSource::default()
            .with("Acme", Canned::Unreachable)
            .with("Beta", Canned::Garbled);
        let tracker = Tracker::new(source, store, companies);
        let summary = tracker.run(day(2)).await.unwrap();

        let statuses = summary
            .records
            .iter()
            .map(|r| (r.company.as_str(), r.status))
            .collect::<Vec<_>>();
        assert_eq!(
            statuses,
            vec![
                ("Acme", RunStatus::FetchFailed),
                ("Beta", RunStatus::ParseFailed)
            ]
        );
        assert_eq!(summary.failures(), 2);

        let rows = tracker.store().query(&Filter::new()).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows
            .iter()
            .all(|row| row.last_seen == day(1) && row.disappeared_on.is_none()));

        // the failed day does not count as the latest run
        let new = tracker
            .store()
            .query(&Filter::new().new_only(true))
            .await
            .unwrap();
        assert_eq!(new.len(), 2);

        let latest = tracker.store().latest_runs().await.unwrap();
        assert_eq!(latest[0].status, RunStatus::FetchFailed);
        assert!(latest[0].message.is_some());
    }

    #[tokio::test]
    async fn test_records_follow_configuration_order() {
        let store = Store::in_memory().await.unwrap();
        let source = StubSource::default()
            .with("Zeta", Canned::Postings(vec![posting("Zeta", "Z")]))
            .with("Alpha", Canned::Postings(vec![]));
        let tracker = Tracker::new(source, store, vec![company("Zeta"), company("Alpha")])
            .with_concurrency(2);
        let summary = tracker.run(day(1)).await.unwrap();
        let names = summary
            .records
            .iter()
            .map(|r| r.company.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["Zeta", "Alpha"]);
        assert_eq!(summary.records[0].new_count, 1);
        assert_eq!(summary.failures(), 0);
    }

    #[tokio::test]
    async fn test_rejected_entries_are_reported() {
        let store = Store::in_memory().await.unwrap();
        let tracker = Tracker::new(StubSource::default(), store, vec![]).with_rejected(vec![
            ConfigError::InvalidUrl {
                company: "Broken".to_owned(),
                url: "nope".to_owned(),
            },
            ConfigError::EmptyName(3),
        ]);
        let summary = tracker.run(day(1)).await.unwrap();
        assert_eq!(summary.records.len(), 1);
        assert_eq!(summary.records[0].status, RunStatus::ConfigInvalid);
        assert_eq!(summary.unnamed_rejections.len(), 1);
        assert_eq!(
            tracker.store().list_companies().await.unwrap(),
            vec!["Broken".to_owned()]
        );
    }

    /// Blocks inside `fetch` until released, so a run can be held open.
    struct GatedSource {
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl PostingSource for GatedSource {
        async fn fetch(&self, _company: &CompanyConfig) -> Result<Vec<Posting>, FetchError> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn test_second_run_is_rejected_while_running() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let source = GatedSource {
            entered: entered.clone(),
            release: release.clone(),
        };
        let store = Store::in_memory().await.unwrap();
        let tracker = Arc::new(Tracker::new(source, store, vec![company("Acme")]));

        let first = tokio::spawn({
            let tracker = tracker.clone();
            async move { tracker.run(day(1)).await }
        });
        entered.notified().await;
        assert_eq!(
            tracker.run(day(1)).await.unwrap_err(),
            RunError::AlreadyRunning
        );

        release.notify_one();
        let summary = first.await.unwrap().unwrap();
        assert_eq!(summary.records[0].status, RunStatus::Ok);

        release.notify_one();
        assert!(tracker.run(day(2)).await.is_ok());
    }
}
