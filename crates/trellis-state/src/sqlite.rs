use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use trellis_graph::Address;

use crate::error::StateError;
use crate::types::{StateMap, StateRecord};
use crate::StateStore;

/// SQLite-based state store.
///
/// Records live in a `resources` table keyed by address; the run lock is the
/// single row of `run_lock`.
pub struct SqliteStateStore {
  pool: SqlitePool,
}

impl SqliteStateStore {
  /// Create a new SQLite store with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Open (creating if missing) a database file and create the schema.
  pub async fn open(path: &Path) -> Result<Self, StateError> {
    let options = SqliteConnectOptions::new()
      .filename(path)
      .create_if_missing(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    let store = Self::new(pool);
    store.migrate().await?;
    Ok(store)
  }

  /// Create the schema if it does not exist.
  pub async fn migrate(&self) -> Result<(), StateError> {
    sqlx::query(
      r#"
            CREATE TABLE IF NOT EXISTS resources (
                address TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                id TEXT NOT NULL,
                attrs TEXT NOT NULL,
                computed_attrs TEXT NOT NULL,
                dependencies TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
    )
    .execute(&self.pool)
    .await?;

    sqlx::query(
      r#"
            CREATE TABLE IF NOT EXISTS run_lock (
                lock_id INTEGER PRIMARY KEY CHECK (lock_id = 1),
                run_id TEXT NOT NULL,
                acquired_at TEXT NOT NULL
            )
            "#,
    )
    .execute(&self.pool)
    .await?;

    Ok(())
  }
}

fn decode<T: serde::de::DeserializeOwned>(address: &str, raw: &str) -> Result<T, StateError> {
  serde_json::from_str(raw).map_err(|e| StateError::InvalidRecord {
    address: address.to_string(),
    message: e.to_string(),
  })
}

#[async_trait]
impl StateStore for SqliteStateStore {
  async fn load(&self) -> Result<StateMap, StateError> {
    let rows = sqlx::query(
      r#"
            SELECT address, kind, id, attrs, computed_attrs, dependencies, updated_at
            FROM resources
            ORDER BY address ASC
            "#,
    )
    .fetch_all(&self.pool)
    .await?;

    let mut state = StateMap::new();
    for row in rows {
      let address: String = row.try_get("address")?;
      let attrs: String = row.try_get("attrs")?;
      let computed_attrs: String = row.try_get("computed_attrs")?;
      let dependencies: String = row.try_get("dependencies")?;
      let updated_at: DateTime<Utc> = row.try_get("updated_at")?;

      let record = StateRecord {
        kind: row.try_get("kind")?,
        id: row.try_get("id")?,
        attrs: decode(&address, &attrs)?,
        computed_attrs: decode(&address, &computed_attrs)?,
        dependencies: decode(&address, &dependencies)?,
        updated_at,
      };
      let parsed = address
        .parse::<Address>()
        .map_err(|e| StateError::InvalidRecord {
          address: address.clone(),
          message: e.to_string(),
        })?;
      state.insert(parsed, record);
    }

    Ok(state)
  }

  async fn save(&self, state: &StateMap) -> Result<(), StateError> {
    let mut tx = self.pool.begin().await?;

    sqlx::query("DELETE FROM resources")
      .execute(&mut *tx)
      .await?;

    for (address, record) in state {
      sqlx::query(
        r#"
            INSERT INTO resources (address, kind, id, attrs, computed_attrs, dependencies, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
      )
      .bind(address.to_string())
      .bind(&record.kind)
      .bind(&record.id)
      .bind(serde_json::to_string(&record.attrs)?)
      .bind(serde_json::to_string(&record.computed_attrs)?)
      .bind(serde_json::to_string(&record.dependencies)?)
      .bind(record.updated_at)
      .execute(&mut *tx)
      .await?;
    }

    tx.commit().await?;
    Ok(())
  }

  async fn lock(&self, run_id: &str) -> Result<(), StateError> {
    let inserted = sqlx::query(
      r#"
            INSERT OR IGNORE INTO run_lock (lock_id, run_id, acquired_at)
            VALUES (1, ?, ?)
            "#,
    )
    .bind(run_id)
    .bind(Utc::now())
    .execute(&self.pool)
    .await?;

    if inserted.rows_affected() == 1 {
      return Ok(());
    }

    let holder: String = sqlx::query("SELECT run_id FROM run_lock WHERE lock_id = 1")
      .fetch_one(&self.pool)
      .await?
      .try_get("run_id")?;
    if holder == run_id {
      return Ok(());
    }
    Err(StateError::ConcurrentRun { holder })
  }

  async fn unlock(&self, run_id: &str) -> Result<(), StateError> {
    sqlx::query("DELETE FROM run_lock WHERE run_id = ?")
      .bind(run_id)
      .execute(&self.pool)
      .await?;
    Ok(())
  }
}
