//! SQLite-backed posting store.
//!
//! `postings` holds one row per identity `(company, title, link)`, enforced by
//! the primary key. `runs` keeps one row per company per run and backs both
//! the dashboard status column and the "new only" filter.

use std::str::FromStr;

use chrono::NaiveDate;
use job_scraper::Identity;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};

use crate::types::{Result, RunRecord, RunRow, StoredPosting};

pub(crate) const POSTING_COLUMNS: &str =
    "company, title, link, location, department, posted_on, first_seen, last_seen, disappeared_on";

pub struct Store {
    pub(crate) pool: SqlitePool,
}

impl Store {
    /// Opens (creating if needed) the database at `database_url` and runs migrations.
    ///
    /// # Example URLs
    /// - `sqlite://role-radar.db` - file next to the working directory
    /// - `sqlite::memory:` - use [`Store::in_memory`] instead, it pins the single connection
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        log::info!("connected to database {}", database_url);
        Self::with_pool(pool).await
    }

    /// Every connection to `:memory:` is its own database, so the pool is
    /// limited to one connection that never expires.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self> {
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS postings (
                company TEXT NOT NULL,
                title TEXT NOT NULL,
                link TEXT NOT NULL,
                location TEXT,
                department TEXT,
                posted_on TEXT,
                first_seen TEXT NOT NULL,
                last_seen TEXT NOT NULL,
                disappeared_on TEXT,
                PRIMARY KEY (company, title, link)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_postings_location ON postings(location)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                company TEXT NOT NULL,
                run_date TEXT NOT NULL,
                status TEXT NOT NULL,
                new_count INTEGER NOT NULL DEFAULT 0,
                still_present_count INTEGER NOT NULL DEFAULT 0,
                disappeared_count INTEGER NOT NULL DEFAULT 0,
                message TEXT,
                recorded_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_runs_company ON runs(company)")
            .execute(&self.pool)
            .await?;

        log::debug!("database migrations completed");
        Ok(())
    }

    pub(crate) async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    /// Inserts the posting, or overwrites the row with the same identity.
    /// `first_seen` of an existing row is never changed.
    pub async fn upsert(&self, posting: &StoredPosting) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        upsert_with(&mut conn, posting).await
    }

    pub async fn get_by_company(&self, company: &str) -> Result<Vec<StoredPosting>> {
        let mut conn = self.pool.acquire().await?;
        company_postings(&mut conn, company).await
    }

    pub async fn get_by_identity(&self, identity: &Identity) -> Result<Option<StoredPosting>> {
        let sql = format!(
            "SELECT {} FROM postings WHERE company = ? AND title = ? AND link = ?",
            POSTING_COLUMNS
        );
        let posting = sqlx::query_as::<_, StoredPosting>(&sql)
            .bind(&identity.company)
            .bind(&identity.title)
            .bind(&identity.link)
            .fetch_optional(&self.pool)
            .await?;
        Ok(posting)
    }

    /// Stamps `disappeared_on` on rows that are not already marked.
    pub async fn mark_disappeared(&self, identities: &[Identity], date: NaiveDate) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        mark_disappeared_with(&mut tx, identities, date).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn delete(&self, identities: &[Identity]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        delete_with(&mut tx, identities).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Companies with stored postings or at least one recorded run.
    pub async fn list_companies(&self) -> Result<Vec<String>> {
        let companies = sqlx::query_scalar::<_, String>(
            "SELECT company FROM postings UNION SELECT company FROM runs ORDER BY company",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(companies)
    }

    pub async fn list_locations(&self) -> Result<Vec<String>> {
        let locations = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT location FROM postings WHERE location IS NOT NULL ORDER BY location",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(locations)
    }

    /// Date of the most recent successful reconcile, if any.
    pub async fn latest_run_date(&self) -> Result<Option<NaiveDate>> {
        let date = sqlx::query_scalar::<_, Option<NaiveDate>>(
            "SELECT MAX(run_date) FROM runs WHERE status = 'ok'",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(date)
    }

    pub async fn record_run(&self, record: &RunRecord) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        record_run_with(&mut conn, record).await
    }

    /// The most recent run record of every company.
    pub async fn latest_runs(&self) -> Result<Vec<RunRecord>> {
        let rows = sqlx::query_as::<_, RunRow>(
            r#"
            SELECT company, run_date, status, new_count, still_present_count,
                   disappeared_count, message, recorded_at
            FROM runs
            WHERE id IN (SELECT MAX(id) FROM runs GROUP BY company)
            ORDER BY company
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(RunRecord::try_from).collect()
    }

    pub async fn close(&self) {
        self.pool.close().await;
        log::debug!("database pool closed");
    }
}

pub(crate) async fn upsert_with(conn: &mut SqliteConnection, posting: &StoredPosting) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO postings (company, title, link, location, department, posted_on,
                              first_seen, last_seen, disappeared_on)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (company, title, link) DO UPDATE SET
            location = excluded.location,
            department = excluded.department,
            posted_on = excluded.posted_on,
            last_seen = excluded.last_seen,
            disappeared_on = excluded.disappeared_on
        "#,
    )
    .bind(&posting.company)
    .bind(&posting.title)
    .bind(&posting.link)
    .bind(&posting.location)
    .bind(&posting.department)
    .bind(posting.posted_on)
    .bind(posting.first_seen)
    .bind(posting.last_seen)
    .bind(posting.disappeared_on)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub(crate) async fn company_postings(
    conn: &mut SqliteConnection,
    company: &str,
) -> Result<Vec<StoredPosting>> {
    let sql = format!(
        "SELECT {} FROM postings WHERE company = ? ORDER BY title, link",
        POSTING_COLUMNS
    );
    let postings = sqlx::query_as::<_, StoredPosting>(&sql)
        .bind(company)
        .fetch_all(&mut *conn)
        .await?;
    Ok(postings)
}

pub(crate) async fn mark_disappeared_with(
    conn: &mut SqliteConnection,
    identities: &[Identity],
    date: NaiveDate,
) -> Result<()> {
    for identity in identities {
        sqlx::query(
            r#"
            UPDATE postings SET disappeared_on = COALESCE(disappeared_on, ?)
            WHERE company = ? AND title = ? AND link = ?
            "#,
        )
        .bind(date)
        .bind(&identity.company)
        .bind(&identity.title)
        .bind(&identity.link)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

pub(crate) async fn delete_with(conn: &mut SqliteConnection, identities: &[Identity]) -> Result<()> {
    for identity in identities {
        sqlx::query("DELETE FROM postings WHERE company = ? AND title = ? AND link = ?")
            .bind(&identity.company)
            .bind(&identity.title)
            .bind(&identity.link)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

pub(crate) async fn record_run_with(conn: &mut SqliteConnection, record: &RunRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO runs (company, run_date, status, new_count, still_present_count,
                          disappeared_count, message, recorded_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&record.company)
    .bind(record.run_date)
    .bind(record.status.as_str())
    .bind(record.new_count)
    .bind(record.still_present_count)
    .bind(record.disappeared_count)
    .bind(&record.message)
    .bind(record.recorded_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[cfg(test)]
mod test {
    use chrono::{NaiveDate, Utc};
    use job_scraper::Posting;

    use super::*;
    use crate::types::RunStatus;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, d).unwrap()
    }

    fn stored(title: &str, link: &str, seen: NaiveDate) -> StoredPosting {
        StoredPosting::first_sighting(
            Posting::new("MathWorks", title, link).with_location(Some("Natick".to_owned())),
            seen,
        )
    }

    #[tokio::test]
    async fn test_upsert_never_duplicates_identity() {
        let store = Store::in_memory().await.unwrap();
        store.upsert(&stored("SWE I", "link1", day(1))).await.unwrap();

        let mut again = stored("SWE I", "link1", day(2));
        again.location = Some("Remote".to_owned());
        store.upsert(&again).await.unwrap();

        let rows = store.get_by_company("MathWorks").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].first_seen, day(1));
        assert_eq!(rows[0].last_seen, day(2));
        assert_eq!(rows[0].location.as_deref(), Some("Remote"));
    }

    #[tokio::test]
    async fn test_get_by_identity_and_delete() {
        let store = Store::in_memory().await.unwrap();
        let posting = stored("SWE I", "link1", day(1));
        store.upsert(&posting).await.unwrap();

        let found = store.get_by_identity(&posting.identity()).await.unwrap();
        assert_eq!(found, Some(posting.clone()));

        store.delete(&[posting.identity()]).await.unwrap();
        assert_eq!(store.get_by_identity(&posting.identity()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_mark_disappeared_keeps_first_date() {
        let store = Store::in_memory().await.unwrap();
        let posting = stored("SWE I", "link1", day(1));
        store.upsert(&posting).await.unwrap();

        store.mark_disappeared(&[posting.identity()], day(3)).await.unwrap();
        store.mark_disappeared(&[posting.identity()], day(4)).await.unwrap();

        let row = store.get_by_identity(&posting.identity()).await.unwrap().unwrap();
        assert_eq!(row.disappeared_on, Some(day(3)));
        assert_eq!(row.last_seen, day(1));
    }

    #[tokio::test]
    async fn test_latest_runs_and_run_date() {
        let store = Store::in_memory().await.unwrap();
        assert_eq!(store.latest_run_date().await.unwrap(), None);

        let mut ok = RunRecord::failed("Amazon", day(1), RunStatus::Ok, String::new());
        ok.message = None;
        store.record_run(&ok).await.unwrap();
        store
            .record_run(&RunRecord::failed(
                "Amazon",
                day(2),
                RunStatus::FetchFailed,
                "timeout".to_owned(),
            ))
            .await
            .unwrap();
        store
            .record_run(&RunRecord {
                company: "MathWorks".to_owned(),
                run_date: day(2),
                status: RunStatus::Ok,
                new_count: 2,
                still_present_count: 0,
                disappeared_count: 0,
                message: None,
                recorded_at: Utc::now(),
            })
            .await
            .unwrap();

        assert_eq!(store.latest_run_date().await.unwrap(), Some(day(2)));
        let runs = store.latest_runs().await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].company, "Amazon");
        assert_eq!(runs[0].status, RunStatus::FetchFailed);
        assert_eq!(runs[0].message.as_deref(), Some("timeout"));
        assert_eq!(runs[1].company, "MathWorks");
        assert_eq!(runs[1].new_count, 2);

        assert_eq!(store.list_companies().await.unwrap(), vec!["Amazon", "MathWorks"]);
    }
}
