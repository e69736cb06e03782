//! This module provides reusable test utilities:
//! - A mocked management proxy that records calls and raises notifications
//! - Static topology
//! - Test configuration directories
//! - Common test data and notification helpers

// Allow unused code in test fixtures - not every test binary uses every helper
#![allow(dead_code)]
#![allow(unused_imports)]

pub mod mock_proxy;
pub mod test_config;
pub mod test_data;
pub mod topology;

// Re-export commonly used items
pub use mock_proxy::{MockedRepairProxy, ProxyMode};
pub use test_config::{TestConfigBuilder, TEST_HOST_ID};
pub use test_data::*;
pub use topology::StaticReplicationState;
