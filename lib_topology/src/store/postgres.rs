//! # PostgreSQL State Store
//!
//! Persists both record tables in PostgreSQL through a `deadpool-postgres`
//! connection pool:
//!
//! ```sql
//! interfaces(device, name, ipv4, observed_at)            PRIMARY KEY (device, name)
//! neighbors(device, local_interface, neighbor_ipv4, observed_at)
//!                                                        PRIMARY KEY (device, local_interface)
//! ```
//!
//! Each applied message runs in one transaction that first locks the
//! device's existing rows with `SELECT ... FOR UPDATE`, diffs in Rust with
//! [`ChangeSet`], then upserts and deletes. Dropping the transaction before
//! commit (cancellation, error) rolls everything back.

use deadpool_postgres::{Config as DeadpoolConfig, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use tokio_postgres::{NoTls, Row};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::model::{Ipv4Address, Record, RecordKey, ResourceKind};
use crate::store::{scoped, ApplyOutcome, ChangeSet, StateStore};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS interfaces (
    device      TEXT   NOT NULL,
    name        TEXT   NOT NULL,
    ipv4        TEXT   NOT NULL,
    observed_at BIGINT NOT NULL,
    PRIMARY KEY (device, name)
);
CREATE TABLE IF NOT EXISTS neighbors (
    device          TEXT   NOT NULL,
    local_interface TEXT   NOT NULL,
    neighbor_ipv4   TEXT   NOT NULL,
    observed_at     BIGINT NOT NULL,
    PRIMARY KEY (device, local_interface)
);
";

/// Table and column names for one kind.
struct Layout {
    table: &'static str,
    key: &'static str,
    value: &'static str,
}

impl Layout {
    fn of(kind: ResourceKind) -> Self {
        match kind {
            ResourceKind::Interface => Layout { table: "interfaces", key: "name", value: "ipv4" },
            ResourceKind::Neighbor => Layout {
                table: "neighbors",
                key: "local_interface",
                value: "neighbor_ipv4",
            },
        }
    }

    fn select(&self) -> String {
        format!("SELECT device, {}, {}, observed_at FROM {}", self.key, self.value, self.table)
    }

    fn upsert(&self) -> String {
        format!(
            "INSERT INTO {t} (device, {k}, {v}, observed_at) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (device, {k}) DO UPDATE SET {v} = EXCLUDED.{v}, observed_at = EXCLUDED.observed_at",
            t = self.table,
            k = self.key,
            v = self.value
        )
    }
}

fn query_error(e: tokio_postgres::Error) -> StoreError {
    StoreError::Query(e.to_string())
}

fn to_db_ts(observed_at: u64) -> i64 {
    i64::try_from(observed_at).unwrap_or(i64::MAX)
}

fn row_to_record(kind: ResourceKind, row: &Row) -> Result<Record, StoreError> {
    let device: String = row.try_get(0).map_err(query_error)?;
    let name: String = row.try_get(1).map_err(query_error)?;
    let value: String = row.try_get(2).map_err(query_error)?;
    let observed_at: i64 = row.try_get(3).map_err(query_error)?;

    let value: Ipv4Address = value
        .parse()
        .map_err(|e| StoreError::Corrupt(format!("{kind} {device}/{name}: {e}")))?;
    let observed_at = u64::try_from(observed_at)
        .map_err(|_| StoreError::Corrupt(format!("{kind} {device}/{name}: negative timestamp")))?;

    Ok(Record::new(kind, device, name, value, observed_at))
}

/// [`StateStore`] backed by PostgreSQL.
#[derive(Clone)]
pub struct PostgresStore {
    pool: Pool,
}

impl PostgresStore {
    /// Creates a pool for `database_url` and makes sure both tables exist.
    pub async fn connect(database_url: &str, max_connections: usize) -> Result<Self, StoreError> {
        let mut pg_pool_config = DeadpoolConfig::new();
        pg_pool_config.url = Some(database_url.to_string());
        pg_pool_config.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        pg_pool_config.pool = Some(PoolConfig::new(max_connections));

        let pool = pg_pool_config
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let store = Self::from_pool(pool);
        store.ensure_schema().await?;
        info!(max_connections, "PostgreSQL state store ready");
        Ok(store)
    }

    /// Wraps an existing pool without touching the schema.
    pub fn from_pool(pool: Pool) -> Self {
        Self { pool }
    }

    /// Creates the record tables if they are missing.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        let client = self.client().await?;
        client.batch_execute(SCHEMA).await.map_err(query_error)
    }

    async fn client(&self) -> Result<deadpool_postgres::Object, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))
    }
}

impl StateStore for PostgresStore {
    async fn apply(
        &self,
        device: &str,
        kind: ResourceKind,
        records: Vec<Record>,
    ) -> Result<ApplyOutcome, StoreError> {
        let records = scoped(device, kind, records);
        let layout = Layout::of(kind);

        let mut client = self.client().await?;
        let tx = client.transaction().await.map_err(query_error)?;

        let locked = format!("{} WHERE device = $1 FOR UPDATE", layout.select());
        let previous = tx
            .query(locked.as_str(), &[&device])
            .await
            .map_err(query_error)?
            .iter()
            .map(|row| row_to_record(kind, row))
            .collect::<Result<Vec<_>, _>>()?;

        let set = ChangeSet::compute(&previous, records);

        let upsert = layout.upsert();
        for record in &set.upserts {
            let key = record.key();
            tx.execute(
                upsert.as_str(),
                &[&device, &key.name, &record.value().to_string(), &to_db_ts(record.observed_at())],
            )
            .await
            .map_err(query_error)?;
        }

        if !set.removed.is_empty() {
            let names: Vec<String> = set.removed.iter().map(|key| key.name.clone()).collect();
            let delete = format!("DELETE FROM {} WHERE device = $1 AND {} = ANY($2)", layout.table, layout.key);
            tx.execute(delete.as_str(), &[&device, &names])
                .await
                .map_err(query_error)?;
        }

        tx.commit().await.map_err(query_error)?;

        debug!(
            device,
            %kind,
            inserted = set.inserted.len(),
            modified = set.modified.len(),
            removed = set.removed.len(),
            "applied message"
        );
        Ok(set.into_outcome())
    }

    async fn records(&self, kind: ResourceKind) -> Result<Vec<Record>, StoreError> {
        let layout = Layout::of(kind);
        let client = self.client().await?;
        let sql = format!("{} ORDER BY device, {}", layout.select(), layout.key);
        client
            .query(sql.as_str(), &[])
            .await
            .map_err(query_error)?
            .iter()
            .map(|row| row_to_record(kind, row))
            .collect()
    }

    async fn device_records(&self, device: &str, kind: ResourceKind) -> Result<Vec<Record>, StoreError> {
        let layout = Layout::of(kind);
        let client = self.client().await?;
        let sql = format!("{} WHERE device = $1 ORDER BY {}", layout.select(), layout.key);
        client
            .query(sql.as_str(), &[&device])
            .await
            .map_err(query_error)?
            .iter()
            .map(|row| row_to_record(kind, row))
            .collect()
    }

    async fn remove_if_observed_at(
        &self,
        kind: ResourceKind,
        key: &RecordKey,
        observed_at: u64,
    ) -> Result<bool, StoreError> {
        let layout = Layout::of(kind);
        let client = self.client().await?;
        let sql = format!(
            "DELETE FROM {} WHERE device = $1 AND {} = $2 AND observed_at = $3",
            layout.table, layout.key
        );
        let deleted = client
            .execute(sql.as_str(), &[&key.device, &key.name, &to_db_ts(observed_at)])
            .await
            .map_err(query_error)?;
        Ok(deleted > 0)
    }

    async fn clear_device(&self, device: &str) -> Result<usize, StoreError> {
        let mut client = self.client().await?;
        let tx = client.transaction().await.map_err(query_error)?;
        let mut removed = 0u64;
        for kind in ResourceKind::ALL {
            let sql = format!("DELETE FROM {} WHERE device = $1", Layout::of(kind).table);
            removed += tx.execute(sql.as_str(), &[&device]).await.map_err(query_error)?;
        }
        tx.commit().await.map_err(query_error)?;
        Ok(usize::try_from(removed).unwrap_or(usize::MAX))
    }
}
