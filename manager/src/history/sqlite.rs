use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Row, Sqlite, SqlitePool};
use std::path::Path;
use tracing::{debug, error, info};

use super::RepairHistory;
use crate::repair::{ReplicaSet, TableReference, TokenRange, VnodeRepairState};

/// Repair history in a SQLite database, one row per table, range and
/// replica set.
pub struct SqliteRepairHistory {
    pool: Pool<Sqlite>,
}

impl SqliteRepairHistory {
    pub async fn new(database_path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(database_path).parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                error!("Failed to create directory {:?}: {}", parent, e);
                return Err(e.into());
            }
        }

        let database_url = format!("sqlite:{}?mode=rwc", database_path);
        let pool = SqlitePool::connect(&database_url)
            .await
            .with_context(|| format!("Failed to open repair history at {}", database_path))?;

        let history = Self { pool };
        history.initialize_tables().await?;

        info!("Repair history opened at {}", database_path);
        Ok(history)
    }

    /// A history that lives as long as the value does.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let history = Self { pool };
        history.initialize_tables().await?;
        Ok(history)
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    async fn initialize_tables(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS repair_history (
                table_id TEXT NOT NULL,
                keyspace_name TEXT NOT NULL,
                table_name TEXT NOT NULL,
                range_start INTEGER NOT NULL,
                range_end INTEGER NOT NULL,
                replicas TEXT NOT NULL,
                repaired_at INTEGER NOT NULL,
                updated_at DATETIME NOT NULL,
                PRIMARY KEY (table_id, range_start, range_end, replicas)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_repair_history_table ON repair_history(table_id, range_start)",
        )
        .execute(&self.pool)
        .await?;

        debug!("Repair history tables initialized");
        Ok(())
    }
}

#[async_trait]
impl RepairHistory for SqliteRepairHistory {
    async fn load(&self, table: &TableReference) -> Result<Vec<VnodeRepairState>> {
        let rows = sqlx::query(
            r#"
            SELECT range_start, range_end, replicas, repaired_at
            FROM repair_history
            WHERE table_id = ?
            ORDER BY range_start, range_end
            "#,
        )
        .bind(table.id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut states = Vec::with_capacity(rows.len());
        for row in rows {
            let replicas: String = row.try_get("replicas")?;
            let replicas: ReplicaSet = serde_json::from_str(&replicas)
                .with_context(|| format!("Corrupt replica set stored for {}", table))?;
            states.push(VnodeRepairState::new(
                TokenRange::new(row.try_get("range_start")?, row.try_get("range_end")?),
                replicas,
                row.try_get("repaired_at")?,
            ));
        }

        debug!("Loaded {} history entries for {}", states.len(), table);
        Ok(states)
    }

    async fn record(&self, table: &TableReference, states: &[VnodeRepairState]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        for state in states {
            sqlx::query(
                r#"
                INSERT INTO repair_history (
                    table_id, keyspace_name, table_name, range_start, range_end,
                    replicas, repaired_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(table_id, range_start, range_end, replicas) DO UPDATE SET
                    repaired_at = MAX(repaired_at, excluded.repaired_at),
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(table.id.to_string())
            .bind(&table.keyspace)
            .bind(&table.table)
            .bind(state.range().start)
            .bind(state.range().end)
            .bind(serde_json::to_string(state.replicas())?)
            .bind(state.last_repaired_at())
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!("Recorded {} history entries for {}", states.len(), table);
        Ok(())
    }
}
