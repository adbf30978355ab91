//! # Fleet Engine
//!
//! Connection resilience and failover orchestration for a fleet of
//! long-lived, independently authenticated messaging connections ("nodes").
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                              fleet-engine                                 │
//! │                                                                           │
//! │  ┌────────────────┐   ┌─────────────────┐   ┌─────────────────────────┐   │
//! │  │ NodeConnection │──►│ FailureDetector │──►│ FailoverCoordinator     │   │
//! │  │ (per node)     │   │ (probe loop)    │   │ (elect, 5-step pipeline)│   │
//! │  └────────────────┘   └─────────────────┘   └─────────────────────────┘   │
//! │          │                     │                         │                │
//! │          ▼                     ▼                         ▼                │
//! │  ┌────────────────┐   ┌─────────────────┐   ┌─────────────────────────┐   │
//! │  │ EventSink      │──►│ HealthAggregator│◄──│ LoadBalancer            │   │
//! │  │ (broadcast)    │   │ (score, alerts) │   │ (routing, queues)       │   │
//! │  └────────────────┘   └─────────────────┘   └─────────────────────────┘   │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The messaging client itself, the node configuration store and the
//! liveness source are collaborators supplied by the embedding application
//! through [`ConnectionHandle`], [`NodeDirectory`] and [`ProbeSource`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use fleet_engine::{FleetConfig, FleetEngine};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = FleetConfig::default();
//!     let engine = FleetEngine::from_config(config);
//!     engine.start().await.expect("Failed to start");
//!
//!     let node = engine.select_node_for_work();
//!     println!("{node:?}");
//!
//!     engine.shutdown().await;
//! }
//! ```

pub mod alerts;
pub mod balancer;
pub mod config;
pub mod connection;
pub mod detector;
pub mod directory;
pub mod engine;
pub mod error;
pub mod events;
pub mod failover;
pub mod handle;
pub mod health;
pub mod metrics;
pub mod node;
pub mod scheduler;

// Re-exports for convenience
pub use alerts::{Alert, Severity};
pub use balancer::{BalanceStrategy, LoadBalancer, LoadDistribution};
pub use config::{
    AlertConfig, BalancerConfig, ConnectionConfig, DetectorConfig, FailoverConfig, FleetConfig,
    FleetSettings,
};
pub use connection::{ConnectionSnapshot, ConnectionState, NodeConnection};
pub use detector::FailureDetector;
pub use directory::{InMemoryDirectory, NodeConfigPatch, NodeDescriptor, NodeDirectory, NodeRole};
pub use engine::{EngineState, FleetEngine};
pub use error::{FleetError, Result};
pub use events::{EventSink, FleetEvent};
pub use failover::{FailoverCoordinator, FailoverOutcome, FailoverRecord, FailoverStatus, FailoverStep};
pub use handle::{ConnectionHandle, HandleError, HandleSignal, Liveness, ProbeSource};
pub use health::{DashboardSnapshot, FleetHealthReport, HealthAggregator, HealthLabel};
pub use node::{HealthState, HealthStatus, Node, NodeRegistry};

/// Get current epoch milliseconds.
pub(crate) fn epoch_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
