//! CIX Core Components
//!
//! Shared pieces of the CIX driver: the priority request queue that
//! schedules scan and query work, driver configuration, and request metrics.

mod config;
mod error;
mod metrics;
mod queue;

pub use config::{validate_address, DriverConfig, TransportConfig};
pub use error::CoreError;
pub use metrics::Metrics;
pub use queue::PriorityQueue;
