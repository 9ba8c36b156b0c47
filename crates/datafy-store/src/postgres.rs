use std::time::Duration;

use async_trait::async_trait;
use datafy_core::{ColumnValue, ConflictPolicy, EntityKind};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder, Row, Transaction};
use tracing::debug;

use crate::accounts::{AccountStore, StoredAccount, TokenUpdate};
use crate::{SnapshotStore, StoreError, StoreTransaction, WriteStatement};

/// Postgres caps a statement at 65535 bind parameters.
const MAX_BIND_PARAMS: usize = 65_535;
const MAX_ROWS_PER_INSERT: usize = 1_000;

pub async fn connect(database_url: &str) -> Result<PgPool, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;
    Ok(pool)
}

pub async fn migrate(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    Ok(())
}

fn quote(column: &str) -> String {
    format!("\"{column}\"")
}

fn rows_per_insert(kind: EntityKind) -> usize {
    (MAX_BIND_PARAMS / kind.columns().len()).clamp(1, MAX_ROWS_PER_INSERT)
}

/// Builds a multi-row `INSERT .. ON CONFLICT` for `rows` of `kind`.
pub fn build_insert(kind: EntityKind, rows: &[Vec<ColumnValue>]) -> QueryBuilder<'static, Postgres> {
    let columns = kind
        .columns()
        .into_iter()
        .map(quote)
        .collect::<Vec<_>>()
        .join(", ");
    let mut builder = QueryBuilder::new(format!("INSERT INTO {} ({columns}) ", kind.table()));

    builder.push_values(rows, |mut values, row| {
        for value in row {
            match value.clone() {
                ColumnValue::Text(v) => {
                    values.push_bind(v);
                }
                ColumnValue::NullableText(v) => {
                    values.push_bind(v);
                }
                ColumnValue::Bool(v) => {
                    values.push_bind(v);
                }
                ColumnValue::Int(v) => {
                    values.push_bind(v);
                }
                ColumnValue::BigInt(v) => {
                    values.push_bind(v);
                }
                ColumnValue::Real(v) => {
                    values.push_bind(v);
                }
                ColumnValue::Timestamp(v) => {
                    values.push_bind(v);
                }
            }
        }
    });

    match kind.conflict_policy() {
        ConflictPolicy::Overwrite => {
            let keys = kind
                .key_columns()
                .iter()
                .map(|c| quote(c))
                .collect::<Vec<_>>()
                .join(", ");
            let updates = kind
                .mutable_columns()
                .iter()
                .map(|c| format!("{col} = EXCLUDED.{col}", col = quote(c)))
                .collect::<Vec<_>>()
                .join(", ");
            builder.push(format!(" ON CONFLICT ({keys}) DO UPDATE SET {updates}"));
        }
        ConflictPolicy::Ignore => {
            builder.push(" ON CONFLICT DO NOTHING");
        }
    }
    builder
}

#[derive(Debug, Clone)]
pub struct PgSnapshotStore {
    pool: PgPool,
}

impl PgSnapshotStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SnapshotStore for PgSnapshotStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgStoreTransaction { tx: Some(tx) }))
    }
}

struct PgStoreTransaction {
    tx: Option<Transaction<'static, Postgres>>,
}

#[async_trait]
impl StoreTransaction for PgStoreTransaction {
    async fn execute(&mut self, statement: &WriteStatement) -> Result<u64, StoreError> {
        let tx = self.tx.as_mut().ok_or(StoreError::Finished)?;
        let table = statement.kind.table();

        let mut affected = 0;
        for chunk in statement.rows.chunks(rows_per_insert(statement.kind)) {
            let mut builder = build_insert(statement.kind, chunk);
            let result = builder
                .build()
                .execute(&mut **tx)
                .await
                .map_err(|source| StoreError::Write { table, source })?;
            affected += result.rows_affected();
        }
        debug!(table, rows = statement.rows.len(), affected, "statement executed");
        Ok(affected)
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        let tx = self.tx.take().ok_or(StoreError::Finished)?;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        let tx = self.tx.take().ok_or(StoreError::Finished)?;
        tx.rollback().await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PgAccountStore {
    pool: PgPool,
}

impl PgAccountStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn find_accounts(
        &self,
        provider: &str,
        user_ids: &[String],
    ) -> Result<Vec<StoredAccount>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, provider, provider_account_id, access_token,
                   refresh_token, expires_at, scope
            FROM datafy_account
            WHERE provider = $1 AND user_id = ANY($2)
            ORDER BY user_id, provider_account_id
            "#,
        )
        .bind(provider)
        .bind(user_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut accounts = Vec::with_capacity(rows.len());
        for row in rows {
            accounts.push(StoredAccount {
                user_id: row.try_get("user_id")?,
                provider: row.try_get("provider")?,
                provider_account_id: row.try_get("provider_account_id")?,
                access_token: row.try_get("access_token")?,
                refresh_token: row.try_get("refresh_token")?,
                expires_at: row.try_get("expires_at")?,
                scope: row.try_get("scope")?,
            });
        }
        Ok(accounts)
    }

    async fn update_tokens(
        &self,
        provider: &str,
        provider_account_id: &str,
        update: &TokenUpdate,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE datafy_account
            SET access_token = $1,
                refresh_token = COALESCE($2, refresh_token),
                expires_at = $3
            WHERE provider = $4 AND provider_account_id = $5
            "#,
        )
        .bind(&update.access_token)
        .bind(update.refresh_token.as_deref())
        .bind(update.expires_at)
        .bind(provider)
        .bind(provider_account_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
