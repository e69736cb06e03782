//! Due/overdue evaluation of a table's repair state.
//!
//! Everything here is a pure function of a snapshot, a configuration and the
//! current time.

use serde::Serialize;
use std::fmt;

use crate::clock::duration_millis;
use crate::repair::{RepairConfiguration, RepairStateSnapshot, ReplicaRepairGroup, VnodeRepairState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduleStatus {
    OnTime,
    Late,
    Overdue,
}

impl fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScheduleStatus::OnTime => "ON_TIME",
            ScheduleStatus::Late => "LATE",
            ScheduleStatus::Overdue => "OVERDUE",
        };
        f.write_str(name)
    }
}

/// What a table needs right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairPlan {
    pub status: ScheduleStatus,
    /// Groups holding at least one due range, longest-waiting first. Each group
    /// only carries its due ranges.
    pub due_groups: Vec<ReplicaRepairGroup>,
}

impl RepairPlan {
    pub fn is_due(&self) -> bool {
        !self.due_groups.is_empty()
    }
}

/// Status from the age of the last completed full repair.
///
/// With `warning_time >= error_time` the LATE band is empty and the status
/// moves straight from ON_TIME to OVERDUE.
pub fn status_for(last_completed_at: i64, config: &RepairConfiguration, now: i64) -> ScheduleStatus {
    let age = now.saturating_sub(last_completed_at);
    let interval = duration_millis(config.interval);
    let late_at = interval.saturating_add(duration_millis(config.warning_time));
    let overdue_at = interval.saturating_add(duration_millis(config.error_time));

    if age >= overdue_at {
        ScheduleStatus::Overdue
    } else if age >= late_at {
        ScheduleStatus::Late
    } else {
        ScheduleStatus::OnTime
    }
}

/// When the next full repair falls due.
pub fn next_repair_at(snapshot: &RepairStateSnapshot, config: &RepairConfiguration) -> i64 {
    snapshot
        .last_completed_at()
        .saturating_add(duration_millis(config.interval))
}

pub fn evaluate(snapshot: &RepairStateSnapshot, config: &RepairConfiguration, now: i64) -> RepairPlan {
    let status = status_for(snapshot.last_completed_at(), config, now);
    let repaired_before = now.saturating_sub(duration_millis(config.interval));
    let states = snapshot.vnode_repair_states();

    let mut due: Vec<(i64, ReplicaRepairGroup)> = snapshot
        .replica_repair_groups()
        .iter()
        .filter_map(|group| {
            let mut oldest = i64::MAX;
            let ranges: Vec<_> = group
                .ranges()
                .iter()
                .filter(|range| {
                    let at = states
                        .get(*range)
                        .map_or(VnodeRepairState::UNREPAIRED, |s| s.last_repaired_at());
                    if at < repaired_before {
                        oldest = oldest.min(at);
                        true
                    } else {
                        false
                    }
                })
                .copied()
                .collect();

            if ranges.is_empty() {
                None
            } else {
                Some((oldest, ReplicaRepairGroup::new(group.replicas().clone(), ranges)))
            }
        })
        .collect();

    due.sort_by(|(a_oldest, a), (b_oldest, b)| {
        a_oldest
            .cmp(b_oldest)
            .then_with(|| a.ranges().first().cmp(&b.ranges().first()))
    });

    RepairPlan {
        status,
        due_groups: due.into_iter().map(|(_, group)| group).collect(),
    }
}
