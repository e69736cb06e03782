//! Tables, replicas and the topology collaborator.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

use super::TokenRange;

/// A node that holds replicas.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DriverNode {
    pub id: Uuid,
    pub datacenter: String,
    pub address: String,
}

impl DriverNode {
    pub fn new(id: Uuid, datacenter: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id,
            datacenter: datacenter.into(),
            address: address.into(),
        }
    }
}

impl fmt::Display for DriverNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.address, self.datacenter)
    }
}

/// Replica sets are ordered so grouping and persistence are deterministic.
pub type ReplicaSet = BTreeSet<DriverNode>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableReference {
    pub id: Uuid,
    pub keyspace: String,
    pub table: String,
}

impl TableReference {
    pub fn new(id: Uuid, keyspace: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            id,
            keyspace: keyspace.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for TableReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.keyspace, self.table)
    }
}

/// Token ownership as seen from the local node.
#[async_trait]
pub trait ReplicationState: Send + Sync {
    /// Ranges the local node replicates for `table`, with their full replica sets.
    async fn token_ranges(&self, table: &TableReference) -> Result<BTreeMap<TokenRange, ReplicaSet>>;
}

/// Distinct datacenters spanned by a replica set.
pub fn datacenters(replicas: &ReplicaSet) -> BTreeSet<String> {
    replicas.iter().map(|node| node.datacenter.clone()).collect()
}
