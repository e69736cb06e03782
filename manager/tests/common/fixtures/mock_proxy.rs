//! Mocked management proxy for testing
//!
//! Records every repair invocation and listener registration, and can answer
//! repairs with notifications shaped like the storage service's.

use async_trait::async_trait;
use repair_manager::errors::ProxyError;
use repair_manager::repair::{
    Notification, NotificationListener, ProgressEventType, RepairProxy, TableReference, TokenRange,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::test_data::{command_message, failed_repair_message, repair_message};

/// How the proxy answers `repair_async`.
#[derive(Debug, Clone)]
pub enum ProxyMode {
    /// Return a command number and stay silent; tests drive notifications
    Manual,
    /// Confirm the issued ranges before returning
    Immediate,
    /// Confirm the issued ranges after a delay
    After(Duration),
    /// Fail `repair_async` synchronously
    Reject(String),
    /// Never return from `repair_async`
    Hang,
}

#[derive(Debug, Clone)]
pub struct RepairCall {
    pub keyspace: String,
    pub options: HashMap<String, String>,
    pub command: i32,
}

impl RepairCall {
    pub fn ranges(&self) -> Vec<TokenRange> {
        parse_ranges(&self.options["ranges"])
    }

    pub fn hosts(&self) -> BTreeSet<String> {
        self.options["hosts"]
            .split(',')
            .filter(|h| !h.is_empty())
            .map(str::to_string)
            .collect()
    }
}

struct ProxyState {
    mode: Mutex<ProxyMode>,
    listeners: Mutex<Vec<Arc<dyn NotificationListener>>>,
    registered: Mutex<Vec<Arc<dyn NotificationListener>>>,
    unreachable: Mutex<Vec<String>>,
    liveness_down: AtomicBool,
    added: AtomicUsize,
    removed: AtomicUsize,
    calls: Mutex<Vec<RepairCall>>,
    next_command: AtomicI32,
    failing: Mutex<HashMap<TokenRange, String>>,
    in_flight: Mutex<HashMap<i32, BTreeSet<String>>>,
    max_in_flight: AtomicUsize,
    overlapping_calls: AtomicUsize,
}

/// Mock proxy; clones share state.
#[derive(Clone)]
pub struct MockedRepairProxy {
    state: Arc<ProxyState>,
}

impl MockedRepairProxy {
    pub fn new(mode: ProxyMode) -> Self {
        Self {
            state: Arc::new(ProxyState {
                mode: Mutex::new(mode),
                listeners: Mutex::new(Vec::new()),
                registered: Mutex::new(Vec::new()),
                unreachable: Mutex::new(Vec::new()),
                liveness_down: AtomicBool::new(false),
                added: AtomicUsize::new(0),
                removed: AtomicUsize::new(0),
                calls: Mutex::new(Vec::new()),
                next_command: AtomicI32::new(1),
                failing: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                max_in_flight: AtomicUsize::new(0),
                overlapping_calls: AtomicUsize::new(0),
            }),
        }
    }

    pub fn manual() -> Self {
        Self::new(ProxyMode::Manual)
    }

    pub fn immediate() -> Self {
        Self::new(ProxyMode::Immediate)
    }

    pub fn set_mode(&self, mode: ProxyMode) {
        *self.state.mode.lock().unwrap() = mode;
    }

    /// Answer repairs covering `range` with a failure notification.
    pub fn fail_range(&self, range: TokenRange, error: &str) {
        self.state
            .failing
            .lock()
            .unwrap()
            .insert(range, error.to_string());
    }

    pub fn clear_failures(&self) {
        self.state.failing.lock().unwrap().clear();
    }

    /// Deliver `notification` to every registered listener.
    pub fn notify(&self, notification: Notification) {
        let listeners = self.state.listeners.lock().unwrap().clone();
        for listener in listeners {
            listener.handle_notification(&notification);
        }
    }

    /// Deliver `notification` to every listener ever registered, including
    /// released ones, as a delivery racing the removal would.
    pub fn notify_released(&self, notification: Notification) {
        let listeners = self.state.registered.lock().unwrap().clone();
        for listener in listeners {
            listener.handle_notification(&notification);
        }
    }

    /// Report `addresses` as unreachable.
    pub fn set_unreachable(&self, addresses: &[&str]) {
        *self.state.unreachable.lock().unwrap() = addresses.iter().map(|a| a.to_string()).collect();
    }

    /// Make the node listing calls fail.
    pub fn set_liveness_down(&self, down: bool) {
        self.state.liveness_down.store(down, Ordering::SeqCst);
    }

    pub fn listener_count(&self) -> usize {
        self.state.listeners.lock().unwrap().len()
    }

    pub fn added(&self) -> usize {
        self.state.added.load(Ordering::SeqCst)
    }

    pub fn removed(&self) -> usize {
        self.state.removed.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<RepairCall> {
        self.state.calls.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }

    /// Invocations issued while another invocation on a common host was
    /// still running.
    pub fn overlapping_calls(&self) -> usize {
        self.state.overlapping_calls.load(Ordering::SeqCst)
    }

    /// Wait until `count` repairs have been issued.
    pub async fn wait_for_calls(&self, count: usize) {
        for _ in 0..1000 {
            if self.state.calls.lock().unwrap().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("expected {} repair call(s)", count);
    }

    fn answer(&self, call: &RepairCall) -> Vec<Notification> {
        let ranges = call.ranges();
        let failing = self.state.failing.lock().unwrap();
        let failed = ranges.iter().find_map(|r| failing.get(r).cloned());
        drop(failing);

        match failed {
            Some(error) => vec![Notification::progress(
                failed_repair_message(&ranges, &error),
                ProgressEventType::Error,
                0,
                ranges.len() as i32,
            )],
            None => vec![
                Notification::progress(
                    repair_message(&ranges),
                    ProgressEventType::Progress,
                    ranges.len() as i32,
                    ranges.len() as i32,
                ),
                Notification::progress(
                    command_message(call.command, "finished"),
                    ProgressEventType::Complete,
                    ranges.len() as i32,
                    ranges.len() as i32,
                ),
            ],
        }
    }

    fn finish(&self, command: i32) {
        self.state.in_flight.lock().unwrap().remove(&command);
    }
}

#[async_trait]
impl RepairProxy for MockedRepairProxy {
    async fn repair_async(
        &self,
        keyspace: &str,
        options: HashMap<String, String>,
    ) -> Result<i32, ProxyError> {
        let mode = self.state.mode.lock().unwrap().clone();
        if let ProxyMode::Reject(reason) = mode {
            return Err(ProxyError::Invocation(reason));
        }

        let call = RepairCall {
            keyspace: keyspace.to_string(),
            options,
            command: self.state.next_command.fetch_add(1, Ordering::SeqCst),
        };
        {
            let mut in_flight = self.state.in_flight.lock().unwrap();
            let hosts = call.hosts();
            if in_flight.values().any(|busy| !busy.is_disjoint(&hosts)) {
                self.state.overlapping_calls.fetch_add(1, Ordering::SeqCst);
            }
            in_flight.insert(call.command, hosts);
            self.state
                .max_in_flight
                .fetch_max(in_flight.len(), Ordering::SeqCst);
        }
        self.state.calls.lock().unwrap().push(call.clone());

        match mode {
            ProxyMode::Immediate => {
                for notification in self.answer(&call) {
                    self.notify(notification);
                }
                self.finish(call.command);
            }
            ProxyMode::After(delay) => {
                let proxy = self.clone();
                let answer = self.answer(&call);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    proxy.finish(call.command);
                    for notification in answer {
                        proxy.notify(notification);
                    }
                });
            }
            ProxyMode::Hang => std::future::pending::<()>().await,
            ProxyMode::Manual | ProxyMode::Reject(_) => {}
        }
        Ok(call.command)
    }

    fn add_storage_service_listener(&self, listener: Arc<dyn NotificationListener>) {
        self.state.added.fetch_add(1, Ordering::SeqCst);
        self.state.registered.lock().unwrap().push(listener.clone());
        self.state.listeners.lock().unwrap().push(listener);
    }

    fn remove_storage_service_listener(&self, listener: &Arc<dyn NotificationListener>) {
        self.state.removed.fetch_add(1, Ordering::SeqCst);
        self.state
            .listeners
            .lock()
            .unwrap()
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    async fn force_terminate_all_repair_sessions(&self) -> Result<(), ProxyError> {
        self.state.in_flight.lock().unwrap().clear();
        Ok(())
    }

    async fn live_disk_space_used(&self, _table: &TableReference) -> Result<u64, ProxyError> {
        Ok(1024)
    }

    async fn max_repaired_at(&self, _table: &TableReference) -> Result<i64, ProxyError> {
        Ok(1_700_000_000_000)
    }

    async fn percent_repaired(&self, _table: &TableReference) -> Result<f64, ProxyError> {
        Ok(42.5)
    }

    async fn live_nodes(&self) -> Result<Vec<String>, ProxyError> {
        if self.state.liveness_down.load(Ordering::SeqCst) {
            return Err(ProxyError::Unavailable("gossip info unavailable".to_string()));
        }
        Ok(vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()])
    }

    async fn unreachable_nodes(&self) -> Result<Vec<String>, ProxyError> {
        if self.state.liveness_down.load(Ordering::SeqCst) {
            return Err(ProxyError::Unavailable("gossip info unavailable".to_string()));
        }
        Ok(self.state.unreachable.lock().unwrap().clone())
    }
}

fn parse_ranges(value: &str) -> Vec<TokenRange> {
    value
        .split(',')
        .filter(|r| !r.is_empty())
        .filter_map(|r| {
            let (start, end) = r.rsplit_once(':')?;
            Some(TokenRange::new(start.parse().ok()?, end.parse().ok()?))
        })
        .collect()
}
