//! Persisted repair history.
//!
//! The scheduler reads the latest known timestamp per vnode when it rebuilds a
//! table's state and writes back the vnodes a successful repair covered.
//! Entries are keyed by `(range, replica set)`, so history recorded before a
//! topology change never credits the new replica set.
//!
//! - [`InMemoryRepairHistory`]: process-local, for tests and embedders
//!   without persistence.
//! - [`SqliteRepairHistory`]: SQLite-backed store.

mod sqlite;

pub use sqlite::SqliteRepairHistory;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::repair::{ReplicaSet, TableReference, TokenRange, VnodeRepairState};

#[async_trait]
pub trait RepairHistory: Send + Sync {
    /// Latest known state of every vnode recorded for `table`.
    async fn load(&self, table: &TableReference) -> Result<Vec<VnodeRepairState>>;

    /// Store `states`. A stored timestamp never moves backwards.
    async fn record(&self, table: &TableReference, states: &[VnodeRepairState]) -> Result<()>;
}

type VnodeKey = (TokenRange, ReplicaSet);

pub struct InMemoryRepairHistory {
    tables: Arc<RwLock<HashMap<TableReference, HashMap<VnodeKey, i64>>>>,
}

impl InMemoryRepairHistory {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryRepairHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for InMemoryRepairHistory {
    fn clone(&self) -> Self {
        Self {
            tables: self.tables.clone(),
        }
    }
}

#[async_trait]
impl RepairHistory for InMemoryRepairHistory {
    async fn load(&self, table: &TableReference) -> Result<Vec<VnodeRepairState>> {
        let tables = self.tables.read().await;
        let mut states: Vec<VnodeRepairState> = tables
            .get(table)
            .map(|vnodes| {
                vnodes
                    .iter()
                    .map(|((range, replicas), at)| {
                        VnodeRepairState::new(*range, replicas.clone(), *at)
                    })
                    .collect()
            })
            .unwrap_or_default();
        states.sort_by(|a, b| a.range().cmp(b.range()));
        Ok(states)
    }

    async fn record(&self, table: &TableReference, states: &[VnodeRepairState]) -> Result<()> {
        let mut tables = self.tables.write().await;
        let vnodes = tables.entry(table.clone()).or_default();
        for state in states {
            let at = vnodes
                .entry((*state.range(), state.replicas().clone()))
                .or_insert(state.last_repaired_at());
            *at = (*at).max(state.last_repaired_at());
        }
        Ok(())
    }
}
