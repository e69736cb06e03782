//! Execution of one repair invocation.
//!
//! A [`RepairTask`] issues `repair_async` through the proxy and then waits for
//! the node's notifications to tell it how the repair ended. The listener that
//! receives those notifications is released on every exit path, and the task
//! reaches its terminal state at most once: whichever of the terminal
//! notification, the deadline, or a cancellation comes first wins.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::constants::{notification, options, repair};
use crate::errors::{RepairFailureCause, RepairTaskError};
use crate::repair::proxy::{Notification, NotificationListener, ProgressEventType, RepairProxy};
use crate::repair::token_range::format_range_list;
use crate::repair::{
    RepairParallelism, RepairType, ReplicaRepairGroup, ReplicaSet, TableReference, TokenRange,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepairTaskState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl RepairTaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RepairTaskState::Succeeded | RepairTaskState::Failed)
    }
}

/// Result of a successful repair: every issued range, stamped with the time
/// its "finished" notification was received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairedRanges {
    pub replicas: ReplicaSet,
    pub completed_at: BTreeMap<TokenRange, i64>,
}

impl RepairedRanges {
    pub fn ranges(&self) -> impl Iterator<Item = &TokenRange> {
        self.completed_at.keys()
    }
}

pub struct RepairTask {
    id: Uuid,
    table: TableReference,
    replicas: ReplicaSet,
    parallelism: RepairParallelism,
    repair_type: RepairType,
    timeout: Duration,
    session: Arc<RepairSession>,
    cancelled: AtomicBool,
    cancel: Notify,
}

impl RepairTask {
    pub fn builder(table: TableReference) -> RepairTaskBuilder {
        RepairTaskBuilder {
            table,
            replicas: ReplicaSet::new(),
            ranges: Vec::new(),
            parallelism: RepairParallelism::Parallel,
            repair_type: RepairType::Vnode,
            timeout: Duration::from_secs(repair::DEFAULT_REPAIR_TIMEOUT_SECONDS),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn table(&self) -> &TableReference {
        &self.table
    }

    pub fn ranges(&self) -> &[TokenRange] {
        &self.session.ranges
    }

    pub fn replicas(&self) -> &ReplicaSet {
        &self.replicas
    }

    pub fn state(&self) -> RepairTaskState {
        self.session.lock().state
    }

    /// Last progress fraction reported by the node, in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        self.session.lock().progress
    }

    /// Ask a running task to stop. It fails with a cancellation cause and
    /// makes no further proxy calls. No effect once the task is terminal.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.cancel.notify_one();
    }

    /// Options passed to `repair_async`.
    pub fn repair_options(&self) -> HashMap<String, String> {
        let ranges = self
            .session
            .ranges
            .iter()
            .map(|r| format!("{}:{}", r.start, r.end))
            .collect::<Vec<_>>()
            .join(",");
        let hosts = self
            .replicas
            .iter()
            .map(|node| node.address.clone())
            .collect::<Vec<_>>()
            .join(",");

        HashMap::from([
            (
                options::PARALLELISM.to_string(),
                self.parallelism.as_option().to_string(),
            ),
            (options::PRIMARY_RANGE.to_string(), "false".to_string()),
            (
                options::INCREMENTAL.to_string(),
                (self.repair_type == RepairType::Incremental).to_string(),
            ),
            (options::RANGES.to_string(), ranges),
            (options::COLUMN_FAMILIES.to_string(), self.table.table.clone()),
            (options::HOSTS.to_string(), hosts),
        ])
    }

    /// Run the repair and wait for its outcome.
    #[instrument(skip(self, proxy), fields(task = %self.id, table = %self.table))]
    pub async fn execute(&self, proxy: &dyn RepairProxy) -> Result<RepairedRanges, RepairTaskError> {
        let mut finished = match self.session.begin() {
            Some(receiver) => receiver,
            None => return Err(self.error(RepairFailureCause::AlreadyStarted)),
        };
        let deadline = Instant::now() + self.timeout;

        let registration = ListenerRegistration::register(proxy, self.session.clone());

        if self.cancelled.load(Ordering::SeqCst) {
            self.session.finish(Err(RepairFailureCause::Cancelled));
            drop(registration);
            return self.outcome();
        }

        info!(
            "Starting repair of {} range(s) {} on {} replica(s)",
            self.session.ranges.len(),
            format_range_list(&self.session.ranges),
            self.replicas.len()
        );

        // The invocation itself is bounded by the deadline and by cancellation.
        let invoked = tokio::select! {
            result = proxy.repair_async(&self.table.keyspace, self.repair_options()) => Some(result),
            _ = &mut finished => None,
            _ = self.cancel.notified() => {
                self.session.finish(Err(RepairFailureCause::Cancelled));
                None
            }
            _ = tokio::time::sleep_until(deadline) => {
                self.session.finish(Err(RepairFailureCause::Timeout(self.timeout)));
                None
            }
        };
        match invoked {
            Some(Ok(command)) => {
                debug!("Repair command #{} issued", command);
                self.session.command_issued(command);
            }
            Some(Err(e)) => self.session.finish(Err(RepairFailureCause::Proxy(e))),
            None => {}
        }

        if !self.state().is_terminal() {
            tokio::select! {
                _ = &mut finished => {}
                _ = self.cancel.notified() => {
                    self.session.finish(Err(RepairFailureCause::Cancelled));
                }
                _ = tokio::time::sleep_until(deadline) => {
                    self.session.finish(Err(RepairFailureCause::Timeout(self.timeout)));
                }
            }
        }
        drop(registration);

        let outcome = self.outcome();
        match &outcome {
            Ok(_) => info!("Repair of {} finished", format_range_list(&self.session.ranges)),
            Err(e) => warn!("Repair of {} failed: {}", format_range_list(&self.session.ranges), e),
        }
        outcome
    }

    fn outcome(&self) -> Result<RepairedRanges, RepairTaskError> {
        let inner = self.session.lock();
        match (&inner.state, &inner.failure) {
            (RepairTaskState::Succeeded, _) => Ok(RepairedRanges {
                replicas: self.replicas.clone(),
                completed_at: inner.completed_at.clone(),
            }),
            (_, Some(cause)) => Err(self.error(cause.clone())),
            _ => Err(self.error(RepairFailureCause::Cancelled)),
        }
    }

    fn error(&self, cause: RepairFailureCause) -> RepairTaskError {
        RepairTaskError {
            cause,
            ranges_attempted: self.session.ranges.clone(),
        }
    }
}

pub struct RepairTaskBuilder {
    table: TableReference,
    replicas: ReplicaSet,
    ranges: Vec<TokenRange>,
    parallelism: RepairParallelism,
    repair_type: RepairType,
    timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl RepairTaskBuilder {
    pub fn with_group(mut self, group: &ReplicaRepairGroup) -> Self {
        self.replicas = group.replicas().clone();
        self.ranges = group.ranges().to_vec();
        self
    }

    pub fn with_replicas(mut self, replicas: ReplicaSet) -> Self {
        self.replicas = replicas;
        self
    }

    pub fn with_ranges(mut self, ranges: Vec<TokenRange>) -> Self {
        self.ranges = ranges;
        self
    }

    pub fn with_parallelism(mut self, parallelism: RepairParallelism) -> Self {
        self.parallelism = parallelism;
        self
    }

    pub fn with_repair_type(mut self, repair_type: RepairType) -> Self {
        self.repair_type = repair_type;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> RepairTask {
        let mut ranges = self.ranges;
        ranges.sort();
        ranges.dedup();

        RepairTask {
            id: Uuid::new_v4(),
            table: self.table,
            replicas: self.replicas,
            parallelism: self.parallelism,
            repair_type: self.repair_type,
            timeout: self.timeout,
            session: Arc::new(RepairSession::new(ranges, self.clock)),
            cancelled: AtomicBool::new(false),
            cancel: Notify::new(),
        }
    }
}

/// Keeps a listener registered for as long as it lives.
struct ListenerRegistration<'a> {
    proxy: &'a dyn RepairProxy,
    listener: Arc<dyn NotificationListener>,
}

impl<'a> ListenerRegistration<'a> {
    fn register(proxy: &'a dyn RepairProxy, listener: Arc<dyn NotificationListener>) -> Self {
        proxy.add_storage_service_listener(listener.clone());
        Self { proxy, listener }
    }
}

impl Drop for ListenerRegistration<'_> {
    fn drop(&mut self) {
        self.proxy.remove_storage_service_listener(&self.listener);
    }
}

/// The listener side of a task: tracks which issued ranges the node has
/// confirmed and records the terminal transition.
struct RepairSession {
    ranges: Vec<TokenRange>,
    clock: Arc<dyn Clock>,
    inner: Mutex<SessionState>,
}

struct SessionState {
    state: RepairTaskState,
    command: Option<i32>,
    pending: BTreeSet<TokenRange>,
    completed_at: BTreeMap<TokenRange, i64>,
    progress: f64,
    failure: Option<RepairFailureCause>,
    finished: Option<oneshot::Sender<()>>,
}

impl RepairSession {
    fn new(ranges: Vec<TokenRange>, clock: Arc<dyn Clock>) -> Self {
        let pending = ranges.iter().copied().collect();
        Self {
            ranges,
            clock,
            inner: Mutex::new(SessionState {
                state: RepairTaskState::Pending,
                command: None,
                pending,
                completed_at: BTreeMap::new(),
                progress: 0.0,
                failure: None,
                finished: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// PENDING -> RUNNING. `None` if the session was already started.
    fn begin(&self) -> Option<oneshot::Receiver<()>> {
        let mut inner = self.lock();
        if inner.state != RepairTaskState::Pending {
            return None;
        }
        let (sender, receiver) = oneshot::channel();
        inner.state = RepairTaskState::Running;
        inner.finished = Some(sender);
        Some(receiver)
    }

    fn command_issued(&self, command: i32) {
        self.lock().command = Some(command);
    }

    fn finish(&self, result: Result<(), RepairFailureCause>) {
        let mut inner = self.lock();
        Self::finish_locked(&mut inner, result);
    }

    /// Records the terminal transition unless one was already recorded.
    fn finish_locked(inner: &mut SessionState, result: Result<(), RepairFailureCause>) {
        if inner.state != RepairTaskState::Running {
            return;
        }
        match result {
            Ok(()) => {
                inner.state = RepairTaskState::Succeeded;
                inner.progress = 1.0;
            }
            Err(cause) => {
                inner.state = RepairTaskState::Failed;
                inner.failure = Some(cause);
            }
        }
        if let Some(finished) = inner.finished.take() {
            let _ = finished.send(());
        }
    }
}

impl NotificationListener for RepairSession {
    fn handle_notification(&self, n: &Notification) {
        let received_at = self.clock.now_millis();
        let mut inner = self.lock();
        if inner.state != RepairTaskState::Running {
            return;
        }

        let mentioned: Vec<TokenRange> = self
            .ranges
            .iter()
            .filter(|range| n.message.contains(&range.to_string()))
            .copied()
            .collect();
        let for_command = inner
            .command
            .is_some_and(|command| mentions_command(&n.message, command));
        if mentioned.is_empty() && !for_command {
            return;
        }

        debug!("Repair notification: {}", n.message);

        if n.message.contains(notification::FAILED_MARKER) {
            let cause = RepairFailureCause::Remote(error_text(&n.message));
            Self::finish_locked(&mut inner, Err(cause));
            return;
        }

        if !mentioned.is_empty() && n.message.contains(notification::FINISHED_MARKER) {
            for range in mentioned {
                if inner.pending.remove(&range) {
                    inner.completed_at.insert(range, received_at);
                }
            }
            if inner.pending.is_empty() {
                Self::finish_locked(&mut inner, Ok(()));
                return;
            }
        }

        match n.event_type() {
            Some(ProgressEventType::Error | ProgressEventType::Abort) if for_command => {
                let cause = RepairFailureCause::Remote(n.message.clone());
                Self::finish_locked(&mut inner, Err(cause));
                return;
            }
            Some(ProgressEventType::Complete) if for_command => {
                let result = if inner.pending.is_empty() {
                    Ok(())
                } else {
                    Err(RepairFailureCause::Unconfirmed(format_range_list(
                        inner.pending.iter(),
                    )))
                };
                Self::finish_locked(&mut inner, result);
                return;
            }
            _ => {}
        }

        if let Some(fraction) = n.progress_fraction() {
            inner.progress = fraction;
        }
    }
}

/// True if `message` refers to repair command number `command`.
fn mentions_command(message: &str, command: i32) -> bool {
    let needle = format!("#{}", command);
    message.match_indices(&needle).any(|(at, _)| {
        !message[at + needle.len()..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_digit())
    })
}

/// The error text following "failed with error", or the whole message.
fn error_text(message: &str) -> String {
    message
        .find(notification::FAILED_MARKER)
        .map(|at| message[at + notification::FAILED_MARKER.len()..].trim())
        .filter(|text| !text.is_empty())
        .unwrap_or(message)
        .to_string()
}
