//! Static topology for testing

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use repair_manager::repair::{ReplicaSet, ReplicationState, TableReference, TokenRange};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Every table is owned with the same ranges and replicas. Clones share state.
#[derive(Clone, Default)]
pub struct StaticReplicationState {
    ranges: Arc<Mutex<BTreeMap<TokenRange, ReplicaSet>>>,
    unavailable: Arc<Mutex<bool>>,
}

impl StaticReplicationState {
    pub fn new(ranges: impl IntoIterator<Item = (TokenRange, ReplicaSet)>) -> Self {
        Self {
            ranges: Arc::new(Mutex::new(ranges.into_iter().collect())),
            unavailable: Arc::new(Mutex::new(false)),
        }
    }

    pub fn set_ranges(&self, ranges: impl IntoIterator<Item = (TokenRange, ReplicaSet)>) {
        *self.ranges.lock().unwrap() = ranges.into_iter().collect();
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock().unwrap() = unavailable;
    }
}

#[async_trait]
impl ReplicationState for StaticReplicationState {
    async fn token_ranges(&self, _table: &TableReference) -> Result<BTreeMap<TokenRange, ReplicaSet>> {
        if *self.unavailable.lock().unwrap() {
            return Err(anyhow!("topology unavailable"));
        }
        Ok(self.ranges.lock().unwrap().clone())
    }
}
