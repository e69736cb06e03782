use anyhow::{anyhow, Result};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::clock::{duration_millis, Clock, SystemClock};
use crate::constants::{repair, scheduler};
use crate::errors::{RepairFailureCause, RepairTaskError};
use crate::history::RepairHistory;
use crate::repair::{
    RepairConfiguration, RepairProxy, RepairTask, RepairType, ReplicaRepairGroup,
    ReplicationState, TableReference, TokenRange, VnodeRepairState, VnodeRepairStates,
};
use crate::scheduler::dispatch::{ActiveLock, ReplicaLease, ReplicaLocks};
use crate::scheduler::jobs::{OnDemandRepairJob, ScheduledRepairJob};
use crate::scheduler::policy::ScheduleStatus;
use crate::views::{
    NodeLiveness, OnDemandRepairJobView, OnDemandStatus, ScheduledRepairJobView, TableRepairMetrics,
};

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub host_id: Uuid,
    pub run_interval: Duration,
    pub repair_timeout: Duration,
    /// Completed on-demand jobs older than this are dropped.
    pub on_demand_retention: Duration,
    /// Used for on-demand repairs of tables without a schedule.
    pub default_configuration: RepairConfiguration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            host_id: Uuid::nil(),
            run_interval: Duration::from_secs(scheduler::DEFAULT_RUN_INTERVAL_SECONDS),
            repair_timeout: Duration::from_secs(repair::DEFAULT_REPAIR_TIMEOUT_SECONDS),
            on_demand_retention: Duration::from_secs(scheduler::DEFAULT_ON_DEMAND_RETENTION_SECONDS),
            default_configuration: RepairConfiguration::default(),
        }
    }
}

/// What one scheduling cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    pub skipped: bool,
    pub due_groups: usize,
    pub repaired_groups: usize,
    pub failed_groups: usize,
    pub deferred_groups: usize,
}

/// Owns the repair jobs of one node and drives them through periodic cycles.
pub struct RepairScheduler {
    settings: SchedulerSettings,
    proxy: Arc<dyn RepairProxy>,
    topology: Arc<dyn ReplicationState>,
    history: Arc<dyn RepairHistory>,
    clock: Arc<dyn Clock>,
    locks: ReplicaLocks,
    jobs: Arc<RwLock<Vec<Arc<ScheduledRepairJob>>>>,
    on_demand: Arc<RwLock<Vec<Arc<OnDemandRepairJob>>>>,
    running: RunningTasks,
    cycle: Arc<tokio::sync::Mutex<()>>,
    shutdown: Arc<watch::Sender<bool>>,
    job_scheduler: Arc<tokio::sync::Mutex<Option<JobScheduler>>>,
}

impl RepairScheduler {
    pub fn new(
        settings: SchedulerSettings,
        proxy: Arc<dyn RepairProxy>,
        topology: Arc<dyn ReplicationState>,
        history: Arc<dyn RepairHistory>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            settings,
            proxy,
            topology,
            history,
            clock: Arc::new(SystemClock),
            locks: ReplicaLocks::new(),
            jobs: Arc::new(RwLock::new(Vec::new())),
            on_demand: Arc::new(RwLock::new(Vec::new())),
            running: RunningTasks::default(),
            cycle: Arc::new(tokio::sync::Mutex::new(())),
            shutdown: Arc::new(shutdown),
            job_scheduler: Arc::new(tokio::sync::Mutex::new(None)),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Share replica locks with another scheduler of the same node.
    pub fn with_replica_locks(mut self, locks: ReplicaLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Schedule recurring repairs of `table`.
    #[instrument(skip(self, configuration), fields(table = %table))]
    pub async fn add_table(
        &self,
        table: TableReference,
        configuration: RepairConfiguration,
    ) -> Result<Uuid> {
        let mut jobs = self.jobs.write().await;
        if jobs.iter().any(|job| job.table() == &table) {
            return Err(anyhow!("Table {} already has a repair schedule", table));
        }
        for warning in configuration.validation_warnings() {
            warn!("Repair schedule of {}: {}", table, warning);
        }

        let job = Arc::new(ScheduledRepairJob::new(
            table,
            configuration,
            self.clock.now_millis(),
        ));
        info!(
            "Scheduled {} every {}s",
            job.table(),
            job.configuration().interval.as_secs()
        );
        let id = job.id();
        jobs.push(job);
        Ok(id)
    }

    /// Queue a one-off repair of every range the node owns for `table`.
    #[instrument(skip(self), fields(table = %table))]
    pub async fn schedule_on_demand(&self, table: TableReference) -> Result<OnDemandRepairJobView> {
        if *self.shutdown.borrow() {
            return Err(anyhow!("Repair scheduler is shutting down"));
        }

        let owned = self.topology.token_ranges(&table).await?;
        let groups = VnodeRepairStates::merge(owned, None).group_by_replicas();
        let configuration = self
            .jobs
            .read()
            .await
            .iter()
            .find(|job| job.table() == &table)
            .map(|job| job.configuration().clone())
            .unwrap_or_else(|| self.settings.default_configuration.clone());

        let job = Arc::new(OnDemandRepairJob::new(
            self.settings.host_id,
            table,
            configuration,
            groups,
            self.clock.now_millis(),
        ));
        info!("Queued on-demand repair {} of {}", job.id(), job.table());

        let view = job.view();
        self.on_demand.write().await.push(job);
        Ok(view)
    }

    /// A scheduled table by name.
    pub async fn find_table(&self, keyspace: &str, table: &str) -> Option<TableReference> {
        self.jobs
            .read()
            .await
            .iter()
            .map(|job| job.table())
            .find(|t| t.keyspace == keyspace && t.table == table)
            .cloned()
    }

    pub async fn scheduled_views(&self) -> Vec<ScheduledRepairJobView> {
        let now = self.clock.now_millis();
        self.jobs.read().await.iter().map(|job| job.view(now)).collect()
    }

    pub async fn scheduled_view(&self, id: Uuid) -> Option<ScheduledRepairJobView> {
        let now = self.clock.now_millis();
        self.jobs
            .read()
            .await
            .iter()
            .find(|job| job.id() == id)
            .map(|job| job.view(now))
    }

    pub async fn on_demand_views(&self) -> Vec<OnDemandRepairJobView> {
        self.on_demand.read().await.iter().map(|job| job.view()).collect()
    }

    /// Node-reported repair figures of a scheduled table, `None` if no
    /// schedule has `id`.
    pub async fn table_metrics(&self, id: Uuid) -> Result<Option<TableRepairMetrics>> {
        let job = match self.jobs.read().await.iter().find(|job| job.id() == id) {
            Some(job) => job.clone(),
            None => return Ok(None),
        };
        let table = job.table();

        Ok(Some(TableRepairMetrics {
            table: table.clone(),
            live_disk_space_used: self.proxy.live_disk_space_used(table).await?,
            max_repaired_at: self.proxy.max_repaired_at(table).await?,
            percent_repaired: self.proxy.percent_repaired(table).await?,
            last_completed_at: job.snapshot().last_completed_at(),
        }))
    }

    pub async fn node_liveness(&self) -> Result<NodeLiveness> {
        let mut live = self.proxy.live_nodes().await?;
        let mut unreachable = self.proxy.unreachable_nodes().await?;
        live.sort();
        unreachable.sort();
        Ok(NodeLiveness { live, unreachable })
    }

    pub fn active_locks(&self) -> Vec<ActiveLock> {
        self.locks.active()
    }

    pub fn running_tasks(&self) -> usize {
        self.running.len()
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// One scheduling pass: rebuild every table's state, evaluate what is
    /// due, run it under the replica locks and publish the results.
    ///
    /// Returns immediately with `skipped` set if a previous cycle is still
    /// running.
    #[instrument(skip(self))]
    pub async fn run_cycle(&self) -> CycleSummary {
        let _cycle = match self.cycle.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("Previous repair cycle still running, skipping tick");
                return CycleSummary {
                    skipped: true,
                    ..CycleSummary::default()
                };
            }
        };
        let mut summary = CycleSummary::default();
        if self.is_shutting_down() {
            return summary;
        }
        self.prune_completed_on_demand(self.clock.now_millis()).await;

        let pending = self.collect_due_work().await;
        summary.due_groups = pending.len();
        if pending.is_empty() {
            debug!("Nothing due for repair");
            return summary;
        }
        info!("Repair cycle found {} due group(s)", pending.len());

        let on_demand: Vec<Arc<OnDemandRepairJob>> = pending
            .iter()
            .filter_map(|item| match &item.job {
                JobRef::OnDemand(job) => Some(job.clone()),
                JobRef::Scheduled(_) => None,
            })
            .collect();

        let unreachable = self.unreachable_addresses().await;
        let (mut pending, unavailable): (VecDeque<WorkItem>, VecDeque<WorkItem>) =
            pending.into_iter().partition(|item| {
                match item
                    .group
                    .replicas()
                    .iter()
                    .find(|node| unreachable.contains(&node.address))
                {
                    Some(node) => {
                        warn!("Deferring group of {}: replica {} is unreachable", item.table(), node);
                        false
                    }
                    None => true,
                }
            });

        let mut workers = JoinSet::new();
        loop {
            let mut deferred = VecDeque::new();
            while let Some(item) = pending.pop_front() {
                if self.is_shutting_down() {
                    deferred.push_back(item);
                    continue;
                }
                match self.locks.try_acquire(
                    item.job_id(),
                    item.table(),
                    &item.group,
                    item.configuration().parallelism,
                ) {
                    Ok(lease) => {
                        workers.spawn(repair_group(self.worker_context(), item, lease));
                    }
                    Err(rejection) => {
                        debug!("Deferring group of {}: {}", item.table(), rejection);
                        deferred.push_back(item);
                    }
                }
            }
            pending = deferred;

            match workers.join_next().await {
                Some(Ok(outcome)) => {
                    if outcome.error.is_some() {
                        summary.failed_groups += 1;
                    } else {
                        summary.repaired_groups += 1;
                    }
                    self.apply(outcome).await;
                }
                Some(Err(e)) => {
                    summary.failed_groups += 1;
                    error!("Repair worker stopped abnormally: {}", e);
                }
                None => break,
            }
        }

        summary.deferred_groups = pending.len() + unavailable.len();
        if summary.deferred_groups > 0 {
            warn!(
                "{} group(s) could not be dispatched and wait for the next cycle",
                summary.deferred_groups
            );
        }

        let now = self.clock.now_millis();
        for job in on_demand {
            job.finish_cycle(now);
        }

        info!(
            "Repair cycle done: {} repaired, {} failed, {} deferred",
            summary.repaired_groups, summary.failed_groups, summary.deferred_groups
        );
        summary
    }

    /// Addresses the node currently reports as unreachable. A failed lookup
    /// defers nothing.
    async fn unreachable_addresses(&self) -> HashSet<String> {
        match self.proxy.unreachable_nodes().await {
            Ok(nodes) => nodes.into_iter().collect(),
            Err(e) => {
                warn!("Could not list unreachable nodes: {}", e);
                HashSet::new()
            }
        }
    }

    /// Drop completed on-demand jobs older than the retention period.
    pub async fn prune_completed_on_demand(&self, now: i64) -> usize {
        let cutoff = now.saturating_sub(duration_millis(self.settings.on_demand_retention));
        let mut jobs = self.on_demand.write().await;
        let initial_count = jobs.len();

        jobs.retain(|job| {
            let keep = job.status() != OnDemandStatus::Completed || job.completed_at() > cutoff;
            if !keep {
                debug!("Dropping completed on-demand repair {} of {}", job.id(), job.table());
            }
            keep
        });

        let pruned = initial_count - jobs.len();
        if pruned > 0 {
            info!(
                "Removed {} completed on-demand repair(s) older than {}s",
                pruned,
                self.settings.on_demand_retention.as_secs()
            );
        }
        pruned
    }

    async fn collect_due_work(&self) -> VecDeque<WorkItem> {
        let now = self.clock.now_millis();
        let mut work = VecDeque::new();

        let jobs: Vec<Arc<ScheduledRepairJob>> = self.jobs.read().await.clone();
        for job in jobs {
            if let Err(e) = job
                .refresh(self.topology.as_ref(), self.history.as_ref(), now)
                .await
            {
                warn!("Failed to refresh repair state of {}: {}", job.table(), e);
                job.record_refresh_failure(format!("state refresh failed: {}", e));
                continue;
            }

            let plan = job.plan(now);
            match plan.status {
                ScheduleStatus::OnTime => {}
                ScheduleStatus::Late => warn!("Repair of {} is late", job.table()),
                ScheduleStatus::Overdue => error!("Repair of {} is overdue", job.table()),
            }
            for group in plan.due_groups {
                work.push_back(WorkItem {
                    job: JobRef::Scheduled(job.clone()),
                    group,
                });
            }
        }

        let queued: Vec<Arc<OnDemandRepairJob>> = self.on_demand.read().await.clone();
        for job in queued {
            for group in job.take_queued() {
                work.push_back(WorkItem {
                    job: JobRef::OnDemand(job.clone()),
                    group,
                });
            }
        }

        work
    }

    /// Publish a finished group's result. Failed ranges stay unadvanced and
    /// are picked up again by a later cycle.
    async fn apply(&self, outcome: GroupOutcome) {
        let GroupOutcome {
            item,
            repaired,
            error,
        } = outcome;
        let now = self.clock.now_millis();

        let changed = match &item.job {
            JobRef::Scheduled(job) if !repaired.is_empty() => {
                job.record_success(item.group.replicas(), &repaired, now)
            }
            JobRef::Scheduled(_) => Vec::new(),
            JobRef::OnDemand(_) => repaired
                .iter()
                .map(|(range, at)| VnodeRepairState::new(*range, item.group.replicas().clone(), *at))
                .collect(),
        };
        if !changed.is_empty() {
            if let Err(e) = self.history.record(item.table(), &changed).await {
                error!("Failed to persist repair history of {}: {}", item.table(), e);
            }
        }

        if let Some(error) = error {
            warn!("Repair of {} failed: {}", item.table(), error);
            match &item.job {
                JobRef::Scheduled(job) => job.record_failure(item.group.replicas(), error.to_string()),
                JobRef::OnDemand(job) => job.record_failure(error.to_string()),
            }
        }
    }

    fn worker_context(&self) -> WorkerContext {
        WorkerContext {
            proxy: self.proxy.clone(),
            clock: self.clock.clone(),
            running: self.running.clone(),
            timeout: self.settings.repair_timeout,
            shutdown: self.shutdown.subscribe(),
        }
    }

    /// Run [`run_cycle`](Self::run_cycle) every `run_interval`.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<()> {
        let mut slot = self.job_scheduler.lock().await;
        if slot.is_some() {
            return Err(anyhow!("Repair scheduler already started"));
        }

        let job_scheduler = JobScheduler::new()
            .await
            .map_err(|e| anyhow!("Failed to create JobScheduler: {}", e))?;

        let this = self.clone();
        let job = Job::new_repeated_async(self.settings.run_interval, move |_uuid, _lock| {
            let scheduler = this.clone();
            Box::pin(async move {
                let summary = scheduler.run_cycle().await;
                if summary.skipped {
                    debug!("Repair tick skipped");
                }
            })
        })
        .map_err(|e| anyhow!("Failed to create repair cycle job: {}", e))?;

        job_scheduler
            .add(job)
            .await
            .map_err(|e| anyhow!("Failed to add repair cycle job: {}", e))?;
        job_scheduler
            .start()
            .await
            .map_err(|e| anyhow!("Failed to start JobScheduler: {}", e))?;

        info!(
            "Repair scheduler started, checking every {}s",
            self.settings.run_interval.as_secs()
        );
        *slot = Some(job_scheduler);
        Ok(())
    }

    /// Stop ticking, cancel running repairs and wait for the current cycle
    /// to wind down.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown.send_replace(true);

        let cancelled = self.running.cancel_all();
        if cancelled > 0 {
            info!("Cancelled {} running repair task(s)", cancelled);
        }

        if let Some(mut job_scheduler) = self.job_scheduler.lock().await.take() {
            job_scheduler
                .shutdown()
                .await
                .map_err(|e| anyhow!("Failed to stop JobScheduler: {}", e))?;
        }

        let _idle = self.cycle.lock().await;
        info!("Repair scheduler stopped");
        Ok(())
    }
}

impl Clone for RepairScheduler {
    fn clone(&self) -> Self {
        Self {
            settings: self.settings.clone(),
            proxy: self.proxy.clone(),
            topology: self.topology.clone(),
            history: self.history.clone(),
            clock: self.clock.clone(),
            locks: self.locks.clone(),
            jobs: self.jobs.clone(),
            on_demand: self.on_demand.clone(),
            running: self.running.clone(),
            cycle: self.cycle.clone(),
            shutdown: self.shutdown.clone(),
            job_scheduler: self.job_scheduler.clone(),
        }
    }
}

#[derive(Clone)]
enum JobRef {
    Scheduled(Arc<ScheduledRepairJob>),
    OnDemand(Arc<OnDemandRepairJob>),
}

struct WorkItem {
    job: JobRef,
    group: ReplicaRepairGroup,
}

impl WorkItem {
    fn job_id(&self) -> Uuid {
        match &self.job {
            JobRef::Scheduled(job) => job.id(),
            JobRef::OnDemand(job) => job.id(),
        }
    }

    fn table(&self) -> &TableReference {
        match &self.job {
            JobRef::Scheduled(job) => job.table(),
            JobRef::OnDemand(job) => job.table(),
        }
    }

    fn configuration(&self) -> &RepairConfiguration {
        match &self.job {
            JobRef::Scheduled(job) => job.configuration(),
            JobRef::OnDemand(job) => job.configuration(),
        }
    }
}

struct GroupOutcome {
    item: WorkItem,
    repaired: BTreeMap<TokenRange, i64>,
    error: Option<RepairTaskError>,
}

struct WorkerContext {
    proxy: Arc<dyn RepairProxy>,
    clock: Arc<dyn Clock>,
    running: RunningTasks,
    timeout: Duration,
    shutdown: watch::Receiver<bool>,
}

/// Repair one group while holding its replica lease.
///
/// VNODE repairs one range per task and pauses for the unwind delay between
/// tasks; the other types cover the whole group with a single task.
async fn repair_group(mut ctx: WorkerContext, item: WorkItem, lease: ReplicaLease) -> GroupOutcome {
    let configuration = item.configuration().clone();
    let units: Vec<Vec<TokenRange>> = match configuration.repair_type {
        RepairType::Vnode => item.group.ranges().iter().map(|range| vec![*range]).collect(),
        RepairType::ParallelVnode | RepairType::Incremental => vec![item.group.ranges().to_vec()],
    };

    let mut repaired = BTreeMap::new();
    let mut error = None;
    let count = units.len();

    for (index, ranges) in units.into_iter().enumerate() {
        if *ctx.shutdown.borrow() {
            error = Some(RepairTaskError {
                cause: RepairFailureCause::Cancelled,
                ranges_attempted: ranges,
            });
            break;
        }

        let task = Arc::new(
            RepairTask::builder(item.table().clone())
                .with_replicas(item.group.replicas().clone())
                .with_ranges(ranges)
                .with_parallelism(configuration.parallelism)
                .with_repair_type(configuration.repair_type)
                .with_timeout(ctx.timeout)
                .with_clock(ctx.clock.clone())
                .build(),
        );
        let tracked = ctx.running.track(task.clone());
        if *ctx.shutdown.borrow() {
            task.cancel();
        }
        if let JobRef::OnDemand(job) = &item.job {
            job.task_started(task.clone());
        }

        let started = Instant::now();
        let result = task.execute(ctx.proxy.as_ref()).await;
        drop(tracked);

        match result {
            Ok(done) => {
                if let JobRef::OnDemand(job) = &item.job {
                    job.record_success(done.ranges().copied());
                    job.task_finished(task.id());
                }
                repaired.extend(done.completed_at);
            }
            Err(e) => {
                if let JobRef::OnDemand(job) = &item.job {
                    job.task_finished(task.id());
                }
                error = Some(e);
                break;
            }
        }

        if index + 1 < count {
            let delay = configuration.unwind_delay(started.elapsed());
            if !delay.is_zero() {
                debug!("Unwinding for {}ms", delay.as_millis());
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = ctx.shutdown.changed() => {}
                }
            }
        }
    }

    drop(lease);
    GroupOutcome {
        item,
        repaired,
        error,
    }
}

/// Tasks currently executing, so shutdown can cancel them.
#[derive(Clone, Default)]
struct RunningTasks {
    tasks: Arc<Mutex<HashMap<Uuid, Arc<RepairTask>>>>,
}

impl RunningTasks {
    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, Arc<RepairTask>>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn track(&self, task: Arc<RepairTask>) -> TrackedTask {
        let id = task.id();
        self.lock().insert(id, task);
        TrackedTask {
            id,
            running: self.clone(),
        }
    }

    fn cancel_all(&self) -> usize {
        let tasks = self.lock();
        for task in tasks.values() {
            task.cancel();
        }
        tasks.len()
    }

    fn len(&self) -> usize {
        self.lock().len()
    }
}

struct TrackedTask {
    id: Uuid,
    running: RunningTasks,
}

impl Drop for TrackedTask {
    fn drop(&mut self) {
        self.running.lock().remove(&self.id);
    }
}
