//! Scheduled and on-demand repair jobs.
//!
//! A scheduled job owns the latest published snapshot of its table. Only the
//! scheduler cycle replaces it; readers clone the `Arc` and keep a consistent
//! view for as long as they hold it.

use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::duration_millis;
use crate::history::RepairHistory;
use crate::repair::{
    RepairConfiguration, RepairStateSnapshot, RepairTask, ReplicaRepairGroup, ReplicaSet,
    ReplicationState, TableReference, TokenRange, VnodeRepairState, VnodeRepairStates,
};
use crate::scheduler::policy::{self, RepairPlan, ScheduleStatus};
use crate::views::{OnDemandRepairJobView, OnDemandStatus, ScheduledRepairJobView, NEVER_COMPLETED};

pub struct ScheduledRepairJob {
    id: Uuid,
    table: TableReference,
    configuration: RepairConfiguration,
    snapshot: RwLock<Arc<RepairStateSnapshot>>,
    errors: Mutex<JobErrors>,
}

/// Failures shown in the job's view until they are resolved.
#[derive(Default)]
struct JobErrors {
    refresh: Option<String>,
    /// Last failure per replica group, cleared when that group succeeds.
    groups: BTreeMap<ReplicaSet, String>,
}

impl JobErrors {
    fn describe(&self) -> Option<String> {
        let messages: Vec<&str> = self
            .refresh
            .iter()
            .chain(self.groups.values())
            .map(String::as_str)
            .collect();
        if messages.is_empty() {
            None
        } else {
            Some(messages.join("; "))
        }
    }
}

impl ScheduledRepairJob {
    pub fn new(table: TableReference, configuration: RepairConfiguration, now: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            table,
            configuration,
            snapshot: RwLock::new(Arc::new(RepairStateSnapshot::from_states(
                VnodeRepairStates::default(),
                now,
            ))),
            errors: Mutex::new(JobErrors::default()),
        }
    }

    fn errors(&self) -> MutexGuard<'_, JobErrors> {
        self.errors.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn table(&self) -> &TableReference {
        &self.table
    }

    pub fn configuration(&self) -> &RepairConfiguration {
        &self.configuration
    }

    /// The latest published snapshot.
    pub fn snapshot(&self) -> Arc<RepairStateSnapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn publish(&self, snapshot: RepairStateSnapshot) -> Arc<RepairStateSnapshot> {
        let snapshot = Arc::new(snapshot);
        *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) = snapshot.clone();
        snapshot
    }

    /// Rebuild the table's state from current ownership, the previous
    /// snapshot and stored history, and publish it.
    pub async fn refresh(
        &self,
        topology: &dyn ReplicationState,
        history: &dyn RepairHistory,
        now: i64,
    ) -> Result<Arc<RepairStateSnapshot>> {
        let current = topology.token_ranges(&self.table).await?;
        let stored = history.load(&self.table).await?;
        let previous = self.snapshot();

        let states = VnodeRepairStates::builder(current)
            .with_previous(previous.vnode_repair_states())
            .with_history(stored)
            .build();
        debug!("Refreshed {} with {} vnode(s)", self.table, states.len());

        {
            let mut errors = self.errors();
            errors.refresh = None;
            // groups that no longer exist cannot be retried
            let current: BTreeSet<&ReplicaSet> = states.iter().map(|s| s.replicas()).collect();
            errors.groups.retain(|replicas, _| current.contains(replicas));
        }
        Ok(self.publish(RepairStateSnapshot::from_states(states, now)))
    }

    /// Publish a snapshot with `repaired` applied to the vnodes of `replicas`.
    /// Returns the vnode states that changed, for persisting.
    pub fn record_success(
        &self,
        replicas: &ReplicaSet,
        repaired: &BTreeMap<TokenRange, i64>,
        now: i64,
    ) -> Vec<VnodeRepairState> {
        let previous = self.snapshot();
        let states = previous.vnode_repair_states().with_repaired(replicas, repaired);
        let changed: Vec<VnodeRepairState> = states
            .iter()
            .filter(|state| repaired.contains_key(state.range()) && state.replicas() == replicas)
            .cloned()
            .collect();

        self.publish(RepairStateSnapshot::from_states(states, now));
        self.errors().groups.remove(replicas);
        changed
    }

    /// Keep a group's failure visible until that group repairs successfully.
    pub fn record_failure(&self, replicas: &ReplicaSet, error: String) {
        self.errors().groups.insert(replicas.clone(), error);
    }

    pub fn record_refresh_failure(&self, error: String) {
        self.errors().refresh = Some(error);
    }

    pub fn plan(&self, now: i64) -> RepairPlan {
        policy::evaluate(&self.snapshot(), &self.configuration, now)
    }

    pub fn view(&self, now: i64) -> ScheduledRepairJobView {
        let snapshot = self.snapshot();
        let status = policy::status_for(snapshot.last_completed_at(), &self.configuration, now);
        let next_repair_at = policy::next_repair_at(&snapshot, &self.configuration);
        let progress = self.progress_of(&snapshot, now);

        ScheduledRepairJobView {
            id: self.id,
            table: self.table.clone(),
            configuration: self.configuration.clone(),
            state_snapshot: snapshot,
            status,
            progress,
            next_repair_at,
            repair_type: self.configuration.repair_type,
            last_error: self.errors().describe(),
        }
    }

    pub fn status(&self, now: i64) -> ScheduleStatus {
        policy::status_for(self.snapshot().last_completed_at(), &self.configuration, now)
    }

    /// Fraction of vnodes repaired within the interval.
    fn progress_of(&self, snapshot: &RepairStateSnapshot, now: i64) -> f64 {
        let states = snapshot.vnode_repair_states();
        if states.is_empty() {
            return 1.0;
        }
        let repaired_since = now.saturating_sub(duration_millis(self.configuration.interval));
        let repaired = states
            .iter()
            .filter(|state| state.last_repaired_at() >= repaired_since)
            .count();
        repaired as f64 / states.len() as f64
    }
}

/// An operator-requested repair of every range the node owns for a table.
pub struct OnDemandRepairJob {
    id: Uuid,
    host_id: Uuid,
    table: TableReference,
    configuration: RepairConfiguration,
    total_ranges: usize,
    inner: Mutex<OnDemandState>,
}

struct OnDemandState {
    status: OnDemandStatus,
    remaining: Vec<ReplicaRepairGroup>,
    repaired: BTreeSet<TokenRange>,
    active: HashMap<Uuid, Arc<RepairTask>>,
    last_error: Option<String>,
    completed_at: i64,
}

impl OnDemandRepairJob {
    /// A job over `groups`. With nothing to repair it is complete at `now`.
    pub fn new(
        host_id: Uuid,
        table: TableReference,
        configuration: RepairConfiguration,
        groups: Vec<ReplicaRepairGroup>,
        now: i64,
    ) -> Self {
        let total_ranges = groups.iter().map(|group| group.ranges().len()).sum();
        let (status, completed_at) = if total_ranges == 0 {
            (OnDemandStatus::Completed, now)
        } else {
            (OnDemandStatus::InQueue, NEVER_COMPLETED)
        };

        Self {
            id: Uuid::new_v4(),
            host_id,
            table,
            configuration,
            total_ranges,
            inner: Mutex::new(OnDemandState {
                status,
                remaining: groups,
                repaired: BTreeSet::new(),
                active: HashMap::new(),
                last_error: None,
                completed_at,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, OnDemandState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn table(&self) -> &TableReference {
        &self.table
    }

    pub fn configuration(&self) -> &RepairConfiguration {
        &self.configuration
    }

    pub fn status(&self) -> OnDemandStatus {
        self.lock().status
    }

    /// Epoch millis of completion, or [`NEVER_COMPLETED`].
    pub fn completed_at(&self) -> i64 {
        self.lock().completed_at
    }

    /// Groups still to repair, if the job is waiting for a cycle. Marks the
    /// job RUNNING.
    pub fn take_queued(&self) -> Vec<ReplicaRepairGroup> {
        let mut inner = self.lock();
        if inner.status != OnDemandStatus::InQueue {
            return Vec::new();
        }
        inner.status = OnDemandStatus::Running;
        inner.last_error = None;
        inner.remaining.clone()
    }

    pub fn task_started(&self, task: Arc<RepairTask>) {
        self.lock().active.insert(task.id(), task);
    }

    pub fn task_finished(&self, task_id: Uuid) {
        self.lock().active.remove(&task_id);
    }

    /// Credit repaired ranges. A group leaves the job once all of its ranges
    /// are repaired.
    pub fn record_success(&self, ranges: impl IntoIterator<Item = TokenRange>) {
        let mut inner = self.lock();
        inner.repaired.extend(ranges);
        let OnDemandState {
            remaining, repaired, ..
        } = &mut *inner;
        remaining.retain(|group| !group.ranges().iter().all(|r| repaired.contains(r)));
    }

    pub fn record_failure(&self, error: String) {
        self.lock().last_error = Some(error);
    }

    /// Close out a cycle: COMPLETED when nothing remains, otherwise back to
    /// IN_QUEUE for the next cycle.
    pub fn finish_cycle(&self, now: i64) -> OnDemandStatus {
        let mut inner = self.lock();
        if inner.status != OnDemandStatus::Running {
            return inner.status;
        }
        if inner.remaining.is_empty() {
            inner.status = OnDemandStatus::Completed;
            inner.completed_at = now;
            info!("On-demand repair {} of {} completed", self.id, self.table);
        } else {
            inner.status = OnDemandStatus::InQueue;
            debug!(
                "On-demand repair {} of {} has {} group(s) left",
                self.id,
                self.table,
                inner.remaining.len()
            );
        }
        inner.status
    }

    /// (repaired ranges + active progress × active ranges) / total ranges.
    pub fn progress(&self) -> f64 {
        let inner = self.lock();
        if self.total_ranges == 0 || inner.status == OnDemandStatus::Completed {
            return 1.0;
        }
        let in_flight: f64 = inner
            .active
            .values()
            .map(|task| task.progress() * task.ranges().len() as f64)
            .sum();
        ((inner.repaired.len() as f64 + in_flight) / self.total_ranges as f64).min(1.0)
    }

    pub fn view(&self) -> OnDemandRepairJobView {
        let progress = self.progress();
        let inner = self.lock();
        OnDemandRepairJobView {
            id: self.id,
            host_id: self.host_id,
            table: self.table.clone(),
            status: inner.status,
            progress,
            completed_at: inner.completed_at,
            repair_type: self.configuration.repair_type,
            last_error: inner.last_error.clone(),
        }
    }
}
