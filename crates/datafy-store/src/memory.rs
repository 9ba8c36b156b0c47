//! In-process backends. Used by `--dry-run` and by tests that need to
//! observe transaction boundaries.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use datafy_core::{ColumnValue, ConflictPolicy, EntityKind};

use crate::accounts::{AccountStore, StoredAccount, TokenUpdate};
use crate::{SnapshotStore, StoreError, StoreTransaction, WriteStatement};

type KeyedRows = BTreeMap<Vec<String>, Vec<ColumnValue>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Committed table contents, keyed by each table's key columns.
#[derive(Debug, Clone, Default)]
pub struct MemoryTables {
    tables: BTreeMap<EntityKind, KeyedRows>,
}

impl MemoryTables {
    /// Applies one statement with the table's conflict policy and returns the
    /// number of rows inserted or updated.
    pub fn apply(&mut self, statement: &WriteStatement) -> u64 {
        let key_len = statement.kind.key_columns().len();
        let policy = statement.kind.conflict_policy();
        let table = self.tables.entry(statement.kind).or_default();

        let mut affected = 0;
        for row in &statement.rows {
            let key: Vec<String> = row
                .iter()
                .take(key_len)
                .map(ColumnValue::key_fragment)
                .collect();
            match policy {
                ConflictPolicy::Overwrite => {
                    table.insert(key, row.clone());
                    affected += 1;
                }
                ConflictPolicy::Ignore => {
                    if !table.contains_key(&key) {
                        table.insert(key, row.clone());
                        affected += 1;
                    }
                }
            }
        }
        affected
    }

    pub fn row_count(&self, kind: EntityKind) -> usize {
        self.tables.get(&kind).map_or(0, BTreeMap::len)
    }

    pub fn rows(&self, kind: EntityKind) -> Vec<Vec<ColumnValue>> {
        self.tables
            .get(&kind)
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn find(&self, kind: EntityKind, key: &[&str]) -> Option<Vec<ColumnValue>> {
        let key: Vec<String> = key.iter().map(|part| part.to_string()).collect();
        self.tables.get(&kind)?.get(&key).cloned()
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    committed: Mutex<MemoryTables>,
    fail_at: Mutex<Option<(usize, usize)>>,
    transactions_begun: AtomicUsize,
    rollbacks: AtomicUsize,
}

/// A [`SnapshotStore`] that keeps tables in memory. Statements are staged per
/// transaction and only merged into the committed tables on `commit`.
#[derive(Debug, Clone, Default)]
pub struct MemorySnapshotStore {
    state: Arc<MemoryState>,
}

impl MemorySnapshotStore {
    /// Makes the `statement`-th statement (0-based) of the
    /// `transaction`-th transaction (0-based) fail.
    pub fn fail_on_statement(&self, transaction: usize, statement: usize) {
        *lock(&self.state.fail_at) = Some((transaction, statement));
    }

    pub fn committed(&self) -> MemoryTables {
        lock(&self.state.committed).clone()
    }

    pub fn transactions_begun(&self) -> usize {
        self.state.transactions_begun.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.state.rollbacks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let index = self.state.transactions_begun.fetch_add(1, Ordering::SeqCst);
        let fail_at = (*lock(&self.state.fail_at))
            .and_then(|(transaction, statement)| (transaction == index).then_some(statement));

        Ok(Box::new(MemoryTransaction {
            state: Arc::clone(&self.state),
            staged: self.committed(),
            journal: Vec::new(),
            fail_at,
            finished: false,
        }))
    }
}

struct MemoryTransaction {
    state: Arc<MemoryState>,
    staged: MemoryTables,
    journal: Vec<WriteStatement>,
    fail_at: Option<usize>,
    finished: bool,
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn execute(&mut self, statement: &WriteStatement) -> Result<u64, StoreError> {
        if self.finished {
            return Err(StoreError::Finished);
        }
        if self.fail_at == Some(self.journal.len()) {
            return Err(StoreError::Backend(format!(
                "injected failure writing {}",
                statement.kind.table()
            )));
        }
        let affected = self.staged.apply(statement);
        self.journal.push(statement.clone());
        Ok(affected)
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        if self.finished {
            return Err(StoreError::Finished);
        }
        self.finished = true;
        let mut committed = lock(&self.state.committed);
        for statement in &self.journal {
            committed.apply(statement);
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        if self.finished {
            return Err(StoreError::Finished);
        }
        self.finished = true;
        self.journal.clear();
        self.state.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Account rows held in memory, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct MemoryAccountStore {
    accounts: Arc<Mutex<Vec<StoredAccount>>>,
}

impl MemoryAccountStore {
    pub fn new(accounts: Vec<StoredAccount>) -> Self {
        Self {
            accounts: Arc::new(Mutex::new(accounts)),
        }
    }

    pub fn accounts(&self) -> Vec<StoredAccount> {
        lock(&self.accounts).clone()
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn find_accounts(
        &self,
        provider: &str,
        user_ids: &[String],
    ) -> Result<Vec<StoredAccount>, StoreError> {
        Ok(lock(&self.accounts)
            .iter()
            .filter(|account| account.provider == provider && user_ids.contains(&account.user_id))
            .cloned()
            .collect())
    }

    async fn update_tokens(
        &self,
        provider: &str,
        provider_account_id: &str,
        update: &TokenUpdate,
    ) -> Result<(), StoreError> {
        let mut accounts = lock(&self.accounts);
        for account in accounts.iter_mut().filter(|account| {
            account.provider == provider && account.provider_account_id == provider_account_id
        }) {
            account.access_token = Some(update.access_token.clone());
            if let Some(refresh_token) = &update.refresh_token {
                account.refresh_token = Some(refresh_token.clone());
            }
            account.expires_at = Some(update.expires_at);
        }
        Ok(())
    }
}
