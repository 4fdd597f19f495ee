pub mod query;
pub mod reconcile;
pub mod store;
pub mod types;

pub use query::Filter;
pub use reconcile::reconcile;
pub use store::Store;
pub use types::{DiffResult, Retention, RunRecord, RunStatus, StoreError, StoredPosting};

/// Opens the store at `database_url`, creating the schema on first use.
pub async fn connect(database_url: &str) -> types::Result<Store> {
    Store::connect(database_url).await
}
