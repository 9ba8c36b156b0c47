//! Persistence for snapshot data: the two-transaction writer, its storage
//! seams, and account/token lookup.

mod accounts;
mod memory;
mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use datafy_core::{ColumnValue, EntityKind, EntityRow, SnapshotData};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub use accounts::{AccountStore, StoredAccount, TokenUpdate};
pub use memory::{MemoryAccountStore, MemorySnapshotStore, MemoryTables};
pub use postgres::{build_insert, connect, migrate, PgAccountStore, PgSnapshotStore};

pub const CRATE_NAME: &str = "datafy-store";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed writing {table}: {source}")]
    Write {
        table: &'static str,
        #[source]
        source: sqlx::Error,
    },
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("transaction already finished")]
    Finished,
}

/// One bulk insert against a single table. Rows carry values in
/// [`EntityKind::columns`] order.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteStatement {
    pub kind: EntityKind,
    pub rows: Vec<Vec<ColumnValue>>,
}

impl WriteStatement {
    pub fn from_rows<R: EntityRow>(rows: &[R]) -> Self {
        Self {
            kind: R::KIND,
            rows: rows.iter().map(EntityRow::values).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError>;
}

/// An open unit of work. Nothing it executes is visible until `commit`.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Runs one statement and returns the number of rows it inserted or
    /// updated.
    async fn execute(&mut self, statement: &WriteStatement) -> Result<u64, StoreError>;
    async fn commit(&mut self) -> Result<(), StoreError>;
    async fn rollback(&mut self) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CommitReport {
    pub base_statements: usize,
    pub base_rows_affected: u64,
    pub ranking_statements: usize,
    pub ranking_rows_affected: u64,
}

/// Commits a snapshot as two transactions: base entities first, then
/// ranking history. A failed base transaction leaves no trace; a failed
/// ranking transaction leaves the committed base data in place.
#[derive(Clone)]
pub struct SnapshotWriter {
    store: Arc<dyn SnapshotStore>,
}

impl SnapshotWriter {
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        Self { store }
    }

    /// Base-data statements in foreign-key order, empty row sets skipped.
    pub fn plan_base(data: &SnapshotData) -> Vec<WriteStatement> {
        [
            WriteStatement::from_rows(&data.albums),
            WriteStatement::from_rows(&data.artists),
            WriteStatement::from_rows(&data.tracks),
            WriteStatement::from_rows(&data.track_features),
            WriteStatement::from_rows(&data.track_artists),
            WriteStatement::from_rows(&data.album_artists),
            WriteStatement::from_rows(&data.track_genres),
            WriteStatement::from_rows(&data.artist_genres),
        ]
        .into_iter()
        .filter(|statement| !statement.is_empty())
        .collect()
    }

    pub fn plan_rankings(data: &SnapshotData) -> Vec<WriteStatement> {
        [
            WriteStatement::from_rows(&data.track_rankings),
            WriteStatement::from_rows(&data.artist_rankings),
        ]
        .into_iter()
        .filter(|statement| !statement.is_empty())
        .collect()
    }

    pub async fn commit(&self, data: &SnapshotData) -> Result<CommitReport, StoreError> {
        let base = Self::plan_base(data);
        let base_rows_affected = self.run_transaction("base", &base).await?;

        let rankings = Self::plan_rankings(data);
        let ranking_rows_affected = self.run_transaction("rankings", &rankings).await?;

        let report = CommitReport {
            base_statements: base.len(),
            base_rows_affected,
            ranking_statements: rankings.len(),
            ranking_rows_affected,
        };
        info!(?report, "snapshot committed");
        Ok(report)
    }

    async fn run_transaction(
        &self,
        label: &'static str,
        statements: &[WriteStatement],
    ) -> Result<u64, StoreError> {
        if statements.is_empty() {
            debug!(transaction = label, "nothing to write");
            return Ok(0);
        }

        let mut tx = self.store.begin().await?;
        let mut affected = 0;
        for statement in statements {
            match tx.execute(statement).await {
                Ok(rows) => affected += rows,
                Err(err) => {
                    error!(
                        transaction = label,
                        table = statement.kind.table(),
                        error = %err,
                        "statement failed; rolling back"
                    );
                    if let Err(rollback_err) = tx.rollback().await {
                        warn!(transaction = label, error = %rollback_err, "rollback failed");
                    }
                    return Err(err);
                }
            }
        }

        if let Err(err) = tx.commit().await {
            error!(transaction = label, error = %err, "commit failed");
            return Err(err);
        }
        debug!(transaction = label, affected, "transaction committed");
        Ok(affected)
    }
}
