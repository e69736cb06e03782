//! Replica locks held while a group is under repair.
//!
//! Every running repair holds a [`ReplicaLease`] for its replica group. The
//! lease is released when dropped, so a task that fails, times out or is
//! cancelled never leaves its replicas locked.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::repair::{DriverNode, RepairParallelism, ReplicaRepairGroup, TableReference};

#[derive(Debug, Clone, Serialize)]
pub struct ActiveLock {
    pub job_id: Uuid,
    pub table: String,
    pub replicas: Vec<String>,
    pub datacenters: BTreeSet<String>,
    pub parallelism: RepairParallelism,
    pub acquired_at: DateTime<Utc>,
    #[serde(skip)]
    nodes: BTreeSet<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchRejection {
    #[error("replica {0} is already under repair")]
    ReplicaBusy(String),

    #[error("a sequential repair is running")]
    SequentialRunning,

    #[error("sequential repair requires an idle cluster, {0} repair(s) running")]
    NotIdle(usize),

    #[error("datacenter {0} already has a repair running")]
    DatacenterBusy(String),
}

/// How a parallelism mode limits concurrent groups.
///
/// Replica overlap is always checked before the mode's own constraint.
pub trait DispatchConstraint {
    fn admits(&self, group: &ReplicaRepairGroup, active: &[&ActiveLock]) -> Result<(), DispatchRejection>;
}

impl DispatchConstraint for RepairParallelism {
    fn admits(&self, group: &ReplicaRepairGroup, active: &[&ActiveLock]) -> Result<(), DispatchRejection> {
        match self {
            RepairParallelism::Parallel => Ok(()),
            RepairParallelism::Sequential => {
                if active.is_empty() {
                    Ok(())
                } else {
                    Err(DispatchRejection::NotIdle(active.len()))
                }
            }
            RepairParallelism::DatacenterAware => {
                let wanted = group.datacenters();
                match active
                    .iter()
                    .flat_map(|lock| lock.datacenters.iter())
                    .find(|dc| wanted.contains(*dc))
                {
                    Some(dc) => Err(DispatchRejection::DatacenterBusy(dc.clone())),
                    None => Ok(()),
                }
            }
        }
    }
}

/// Tracks which replicas are currently being repaired.
pub struct ReplicaLocks {
    active: Arc<Mutex<HashMap<Uuid, ActiveLock>>>,
}

impl ReplicaLocks {
    pub fn new() -> Self {
        Self {
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, ActiveLock>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Lock the group's replicas for one repair, or say why it has to wait.
    #[instrument(skip(self, group), fields(table = %table, job = %job_id))]
    pub fn try_acquire(
        &self,
        job_id: Uuid,
        table: &TableReference,
        group: &ReplicaRepairGroup,
        parallelism: RepairParallelism,
    ) -> Result<ReplicaLease, DispatchRejection> {
        let mut active = self.lock();
        let nodes: BTreeSet<Uuid> = group.replicas().iter().map(|node| node.id).collect();

        let running: Vec<&ActiveLock> = active.values().collect();
        for lock in &running {
            if let Some(busy) = group
                .replicas()
                .iter()
                .find(|node| lock.nodes.contains(&node.id))
            {
                return Err(DispatchRejection::ReplicaBusy(busy.to_string()));
            }
        }
        if running
            .iter()
            .any(|lock| lock.parallelism == RepairParallelism::Sequential)
        {
            return Err(DispatchRejection::SequentialRunning);
        }
        parallelism.admits(group, &running)?;

        let lease_id = Uuid::new_v4();
        active.insert(
            lease_id,
            ActiveLock {
                job_id,
                table: table.to_string(),
                replicas: group.replicas().iter().map(DriverNode::to_string).collect(),
                datacenters: group.datacenters(),
                parallelism,
                acquired_at: Utc::now(),
                nodes,
            },
        );
        debug!("Locked {} replica(s), {} lock(s) held", group.replicas().len(), active.len());

        Ok(ReplicaLease {
            id: lease_id,
            active: self.active.clone(),
        })
    }

    pub fn active(&self) -> Vec<ActiveLock> {
        let mut locks: Vec<ActiveLock> = self.lock().values().cloned().collect();
        locks.sort_by_key(|lock| lock.acquired_at);
        locks
    }

    pub fn is_busy(&self, node: &DriverNode) -> bool {
        self.lock().values().any(|lock| lock.nodes.contains(&node.id))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl Default for ReplicaLocks {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for ReplicaLocks {
    fn clone(&self) -> Self {
        Self {
            active: self.active.clone(),
        }
    }
}

/// Releases its replicas when dropped.
#[derive(Debug)]
pub struct ReplicaLease {
    id: Uuid,
    active: Arc<Mutex<HashMap<Uuid, ActiveLock>>>,
}

impl Drop for ReplicaLease {
    fn drop(&mut self) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(lock) = active.remove(&self.id) {
            let held = Utc::now().signed_duration_since(lock.acquired_at);
            debug!(
                "Released {} replica(s) of {} after {}s",
                lock.replicas.len(),
                lock.table,
                held.num_seconds()
            );
        }
    }
}
