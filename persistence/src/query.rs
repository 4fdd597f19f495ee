use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite};

use crate::store::{Store, POSTING_COLUMNS};
use crate::types::{Result, StoredPosting};

/// Predicates for reading postings back out of the store.
/// The default filter matches everything.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    /// case-insensitive substring of the title or department
    pub keyword: Option<String>,
    /// exact location keys, empty means any location
    pub locations: BTreeSet<String>,
    /// only postings first seen on the latest successful run
    pub new_only: bool,
    /// hide postings that have disappeared
    pub active_only: bool,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keyword(mut self, keyword: &str) -> Self {
        let keyword = keyword.trim();
        self.keyword = (!keyword.is_empty()).then(|| keyword.to_owned());
        self
    }

    pub fn location(mut self, location: &str) -> Self {
        self.locations.insert(location.to_owned());
        self
    }

    pub fn new_only(mut self, new_only: bool) -> Self {
        self.new_only = new_only;
        self
    }

    pub fn active_only(mut self, active_only: bool) -> Self {
        self.active_only = active_only;
        self
    }

    pub fn matches_keyword(&self, posting: &StoredPosting) -> bool {
        let Some(keyword) = self.keyword.as_deref().map(str::trim).filter(|k| !k.is_empty()) else {
            return true;
        };
        let keyword = keyword.to_lowercase();
        std::iter::once(Some(&posting.title))
            .chain(std::iter::once(posting.department.as_ref()))
            .flatten()
            .any(|field| field.to_lowercase().contains(&keyword))
    }
}

impl Store {
    /// Postings matching `filter`, ordered by company and title.
    pub async fn query(&self, filter: &Filter) -> Result<Vec<StoredPosting>> {
        let latest_run = if filter.new_only {
            match self.latest_run_date().await? {
                Some(date) => Some(date),
                None => return Ok(Vec::new()),
            }
        } else {
            None
        };

        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM postings WHERE 1 = 1",
            POSTING_COLUMNS
        ));
        if !filter.locations.is_empty() {
            builder.push(" AND location IN (");
            let mut separated = builder.separated(", ");
            for location in &filter.locations {
                separated.push_bind(location.clone());
            }
            separated.push_unseparated(")");
        }
        if let Some(date) = latest_run {
            builder
                .push(" AND first_seen = ")
                .push_bind(date)
                .push(" AND last_seen = ")
                .push_bind(date);
        }
        if filter.active_only {
            builder.push(" AND disappeared_on IS NULL");
        }
        builder.push(" ORDER BY company, title, link");

        let postings = builder
            .build_query_as::<StoredPosting>()
            .fetch_all(&self.pool)
            .await?;
        Ok(postings
            .into_iter()
            .filter(|posting| filter.matches_keyword(posting))
            .collect())
    }
}
