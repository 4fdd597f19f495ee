use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use job_scraper::{Identity, Posting};

use crate::store::{
    company_postings, delete_with, mark_disappeared_with, record_run_with, upsert_with, Store,
};
use crate::types::{DiffResult, Result, Retention, RunRecord, StoredPosting};

/// Keeps the first posting of every identity, dropping postings that belong
/// to a different company than the one being reconciled.
fn collapse_duplicates(company: &str, fetched: Vec<Posting>) -> Vec<Posting> {
    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(fetched.len());
    for posting in fetched {
        if posting.company != company {
            log::warn!(
                "dropping posting '{}' of {} while reconciling {}",
                posting.title,
                posting.company,
                company
            );
            continue;
        }
        if seen.insert(posting.identity()) {
            unique.push(posting);
        } else {
            log::debug!("{}: duplicate posting '{}' collapsed", company, posting.title);
        }
    }
    unique
}

/// Splits `fetched ∪ stored` into new, still present and disappeared.
/// `fetched` must not contain duplicate identities. Rows that had already
/// disappeared before this run and are still missing land in none of the
/// three; fetched again they count as still present.
pub fn partition(stored: Vec<StoredPosting>, fetched: Vec<Posting>, today: NaiveDate) -> DiffResult {
    let mut remaining: HashMap<Identity, StoredPosting> = stored
        .into_iter()
        .map(|posting| (posting.identity(), posting))
        .collect();
    let mut diff = DiffResult::default();
    for posting in fetched {
        match remaining.remove(&posting.identity()) {
            Some(existing) => diff.still_present.push(existing.seen_again(posting, today)),
            None => diff.new.push(StoredPosting::first_sighting(posting, today)),
        }
    }
    diff.disappeared = remaining
        .into_values()
        .filter(StoredPosting::is_active)
        .collect();
    diff.disappeared
        .sort_by(|a, b| (&a.title, &a.link).cmp(&(&b.title, &b.link)));
    diff
}

/// Merges a fresh fetch of `company` into the store.
///
/// New postings are inserted with `first_seen = last_seen = today`, postings
/// seen again get `last_seen = today`, and postings missing from the fetch are
/// kept or deleted according to `retention`. Everything, including the run
/// record, is committed in one transaction: on error nothing is written.
/// Only rows of `company` are touched.
pub async fn reconcile(
    store: &Store,
    company: &str,
    fetched: Vec<Posting>,
    today: NaiveDate,
    retention: Retention,
) -> Result<DiffResult> {
    let fetched = collapse_duplicates(company, fetched);

    let mut tx = store.begin().await?;
    let stored = company_postings(&mut tx, company).await?;
    let diff = partition(stored, fetched, today);

    for posting in diff.new.iter().chain(&diff.still_present) {
        upsert_with(&mut tx, posting).await?;
    }
    let gone = diff
        .disappeared
        .iter()
        .map(StoredPosting::identity)
        .collect::<Vec<_>>();
    match retention {
        Retention::Keep => mark_disappeared_with(&mut tx, &gone, today).await?,
        Retention::Delete => delete_with(&mut tx, &gone).await?,
    }
    record_run_with(&mut tx, &RunRecord::succeeded(company, today, &diff)).await?;
    tx.commit().await?;

    log::info!(
        "{}: {} new, {} still present, {} disappeared",
        company,
        diff.new.len(),
        diff.still_present.len(),
        diff.disappeared.len()
    );
    Ok(diff)
}
