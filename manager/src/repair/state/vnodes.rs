use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};

use super::{ReplicaRepairGroup, VnodeRepairState};
use crate::repair::{ReplicaSet, TokenRange};

/// Repair state of every vnode the local node replicates for one table,
/// ordered by range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VnodeRepairStates {
    states: BTreeMap<TokenRange, VnodeRepairState>,
}

// Serialized as a list ordered by range; JSON map keys must be strings.
impl Serialize for VnodeRepairStates {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.states.values())
    }
}

impl VnodeRepairStates {
    /// Start a merge from the ranges currently owned, with their replicas.
    pub fn builder(
        current: impl IntoIterator<Item = (TokenRange, ReplicaSet)>,
    ) -> VnodeRepairStatesBuilder {
        VnodeRepairStatesBuilder {
            current: current.into_iter().collect(),
            history: HashMap::new(),
        }
    }

    /// Merge current ownership with the previous states. Ranges keep their
    /// timestamp only when range and replica set both match.
    pub fn merge(
        current: impl IntoIterator<Item = (TokenRange, ReplicaSet)>,
        previous: Option<&VnodeRepairStates>,
    ) -> Self {
        let mut builder = Self::builder(current);
        if let Some(previous) = previous {
            builder = builder.with_previous(previous);
        }
        builder.build()
    }

    /// Collect states as they are. On a duplicated range the most recently
    /// repaired entry wins.
    pub fn from_states(states: impl IntoIterator<Item = VnodeRepairState>) -> Self {
        let mut by_range: BTreeMap<TokenRange, VnodeRepairState> = BTreeMap::new();
        for state in states {
            match by_range.get(state.range()) {
                Some(existing) if existing.last_repaired_at() >= state.last_repaired_at() => {}
                _ => {
                    by_range.insert(*state.range(), state);
                }
            }
        }
        Self { states: by_range }
    }

    pub fn iter(&self) -> impl Iterator<Item = &VnodeRepairState> {
        self.states.values()
    }

    pub fn get(&self, range: &TokenRange) -> Option<&VnodeRepairState> {
        self.states.get(range)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Oldest repair across all vnodes; `None` when there are no vnodes.
    pub fn min_repaired_at(&self) -> Option<i64> {
        self.states.values().map(|s| s.last_repaired_at()).min()
    }

    /// Number of vnodes repaired strictly after `since`.
    pub fn repaired_after(&self, since: i64) -> usize {
        self.states
            .values()
            .filter(|s| s.last_repaired_at() > since)
            .count()
    }

    /// Ranges grouped by identical replica set. Groups are ordered by their
    /// first range, ranges inside a group by start.
    pub fn group_by_replicas(&self) -> Vec<ReplicaRepairGroup> {
        let mut groups: BTreeMap<&ReplicaSet, Vec<TokenRange>> = BTreeMap::new();
        for state in self.states.values() {
            groups
                .entry(state.replicas())
                .or_default()
                .push(*state.range());
        }

        let mut groups: Vec<ReplicaRepairGroup> = groups
            .into_iter()
            .map(|(replicas, ranges)| ReplicaRepairGroup::new(replicas.clone(), ranges))
            .collect();
        groups.sort_by(|a, b| a.ranges().first().cmp(&b.ranges().first()));
        groups
    }

    /// New states with `repaired` timestamps applied to the vnodes replicated
    /// by exactly `replicas`. Other vnodes are copied unchanged.
    pub fn with_repaired(
        &self,
        replicas: &ReplicaSet,
        repaired: &BTreeMap<TokenRange, i64>,
    ) -> Self {
        let states = self
            .states
            .iter()
            .map(|(range, state)| {
                let updated = match repaired.get(range) {
                    Some(&at) if state.replicas() == replicas => state.repaired_at(at),
                    _ => state.clone(),
                };
                (*range, updated)
            })
            .collect();
        Self { states }
    }
}

pub struct VnodeRepairStatesBuilder {
    current: BTreeMap<TokenRange, ReplicaSet>,
    history: HashMap<(TokenRange, ReplicaSet), i64>,
}

impl VnodeRepairStatesBuilder {
    pub fn with_previous(self, previous: &VnodeRepairStates) -> Self {
        self.with_history(previous.iter().cloned())
    }

    /// Known repair timestamps, for example loaded from persisted history.
    pub fn with_history(mut self, history: impl IntoIterator<Item = VnodeRepairState>) -> Self {
        for state in history {
            let at = state.last_repaired_at();
            let key = (*state.range(), state.replicas().clone());
            let entry = self.history.entry(key).or_insert(at);
            *entry = (*entry).max(at);
        }
        self
    }

    pub fn build(self) -> VnodeRepairStates {
        let mut history = self.history;
        let states = self
            .current
            .into_iter()
            .map(|(range, replicas)| {
                let last_repaired_at = history
                    .remove(&(range, replicas.clone()))
                    .unwrap_or(VnodeRepairState::UNREPAIRED);
                (range, VnodeRepairState::new(range, replicas, last_repaired_at))
            })
            .collect();
        VnodeRepairStates { states }
    }
}
