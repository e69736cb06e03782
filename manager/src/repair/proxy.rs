//! Management-interface seam: issuing repairs and receiving their notifications.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::constants::notification;
use crate::errors::ProxyError;
use crate::repair::TableReference;

/// Repair progress event types, numbered as the storage service numbers them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgressEventType {
    Start = 0,
    Progress = 1,
    Error = 2,
    Abort = 3,
    Success = 4,
    Complete = 5,
    Notification = 6,
}

impl ProgressEventType {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Start),
            1 => Some(Self::Progress),
            2 => Some(Self::Error),
            3 => Some(Self::Abort),
            4 => Some(Self::Success),
            5 => Some(Self::Complete),
            6 => Some(Self::Notification),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        self as i32
    }
}

/// A notification raised by the storage service.
///
/// Only the message and the `type`/`progressCount`/`total` data keys are
/// read. Whether it concerns a task is decided from the message alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub message: String,
    pub data: HashMap<String, i32>,
}

impl Notification {
    /// A repair progress notification with the standard data payload.
    pub fn progress(
        message: impl Into<String>,
        event_type: ProgressEventType,
        progress_count: i32,
        total: i32,
    ) -> Self {
        let data = HashMap::from([
            (notification::DATA_TYPE.to_string(), event_type.code()),
            (notification::DATA_PROGRESS_COUNT.to_string(), progress_count),
            (notification::DATA_TOTAL.to_string(), total),
        ]);
        Self {
            message: message.into(),
            data,
        }
    }

    pub fn event_type(&self) -> Option<ProgressEventType> {
        self.data
            .get(notification::DATA_TYPE)
            .copied()
            .and_then(ProgressEventType::from_code)
    }

    /// `progressCount / total`, if the payload carries a usable pair.
    pub fn progress_fraction(&self) -> Option<f64> {
        let count = *self.data.get(notification::DATA_PROGRESS_COUNT)?;
        let total = *self.data.get(notification::DATA_TOTAL)?;
        if total <= 0 || count < 0 {
            return None;
        }
        Some((f64::from(count) / f64::from(total)).min(1.0))
    }
}

/// Receives storage service notifications once registered with a proxy.
pub trait NotificationListener: Send + Sync {
    fn handle_notification(&self, notification: &Notification);
}

/// The node's management interface.
///
/// Every `add_storage_service_listener` must be matched by exactly one
/// `remove_storage_service_listener` with the same `Arc`.
#[async_trait]
pub trait RepairProxy: Send + Sync {
    /// Start a repair of `keyspace`; returns the command number.
    async fn repair_async(
        &self,
        keyspace: &str,
        options: HashMap<String, String>,
    ) -> Result<i32, ProxyError>;

    fn add_storage_service_listener(&self, listener: Arc<dyn NotificationListener>);

    fn remove_storage_service_listener(&self, listener: &Arc<dyn NotificationListener>);

    async fn force_terminate_all_repair_sessions(&self) -> Result<(), ProxyError>;

    async fn live_disk_space_used(&self, table: &TableReference) -> Result<u64, ProxyError>;

    async fn max_repaired_at(&self, table: &TableReference) -> Result<i64, ProxyError>;

    async fn percent_repaired(&self, table: &TableReference) -> Result<f64, ProxyError>;

    async fn live_nodes(&self) -> Result<Vec<String>, ProxyError>;

    async fn unreachable_nodes(&self) -> Result<Vec<String>, ProxyError>;
}
