// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Fleet engine.
//!
//! Wires the components together around one shared [`EventSink`]:
//!
//! ```text
//!  NodeConnection (per node) ──► FailureDetector ──NodeFailed──► FailoverCoordinator
//!                                      │                                │
//!                                      │                  routing / queue transfer
//!                                      ▼                                ▼
//!                               HealthAggregator ◄──────────────── LoadBalancer
//! ```
//!
//! # Background Tasks
//!
//! - **detector**: probes every node on `probe_interval`
//! - **dispatcher**: routes events to the aggregator, starts failovers on
//!   `NodeFailed`, re-admits recovered primaries to routing
//! - **load evaluation**: checks queue and balance thresholds on
//!   `evaluation_interval`
//!
//! All three stop on the shutdown watch channel and are drained with a
//! timeout in [`FleetEngine::shutdown`].

mod types;

pub use types::EngineState;

use crate::balancer::{LoadBalancer, LoadDistribution};
use crate::config::FleetConfig;
use crate::connection::NodeConnection;
use crate::detector::FailureDetector;
use crate::directory::{InMemoryDirectory, NodeDirectory, NodeRole};
use crate::error::{FleetError, Result};
use crate::events::{EventSink, FleetEvent};
use crate::failover::{FailoverCoordinator, FailoverOutcome, FailoverRecord};
use crate::handle::{ConnectionHandle, ConnectionProbe, ProbeSource};
use crate::health::{DashboardSnapshot, FleetHealthReport, HealthAggregator, NodeHealthReport};
use crate::metrics;
use crate::node::{Node, NodeRegistry};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, info_span, warn, Instrument};

/// How long shutdown waits for each background task.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// The fleet resilience engine.
pub struct FleetEngine {
    config: FleetConfig,

    /// Engine state (broadcast to watchers)
    state_tx: watch::Sender<EngineState>,
    state_rx: watch::Receiver<EngineState>,

    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,

    events: EventSink,
    registry: NodeRegistry,
    directory: Arc<dyn NodeDirectory>,
    detector: Arc<FailureDetector>,
    balancer: Arc<LoadBalancer>,
    coordinator: Arc<FailoverCoordinator>,
    aggregator: Arc<HealthAggregator>,

    task_handles: RwLock<Vec<JoinHandle<()>>>,
}

impl FleetEngine {
    /// Engine backed by an in-memory directory seeded from `config.nodes`,
    /// probing connection state.
    ///
    /// Only nodes registered with a handle (see [`register_node`](Self::register_node))
    /// are probed. Directory nodes that `start()` registers without one stay
    /// `Unknown`: never routed to, never failed over.
    pub fn from_config(config: FleetConfig) -> Self {
        let directory = Arc::new(InMemoryDirectory::new(config.nodes.clone()));
        Self::new(config, directory, None)
    }

    /// Engine with an external node directory.
    ///
    /// Without a probe source, liveness is read from each node's connection
    /// state machine.
    pub fn new(
        config: FleetConfig,
        directory: Arc<dyn NodeDirectory>,
        probe: Option<Arc<dyn ProbeSource>>,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(EngineState::Created);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let settings = &config.settings;
        let events = EventSink::new(settings.event_capacity);
        let registry = NodeRegistry::new();
        let probe = probe.unwrap_or_else(|| Arc::new(ConnectionProbe::new(registry.clone())));

        let detector = FailureDetector::new(
            settings.detector.clone(),
            registry.clone(),
            probe,
            events.clone(),
        );
        let balancer = Arc::new(LoadBalancer::new(&settings.balancer, registry.clone()));
        let coordinator = FailoverCoordinator::new(
            settings.failover.clone(),
            registry.clone(),
            Arc::clone(&directory),
            Arc::clone(&balancer),
            events.clone(),
        );
        let aggregator = Arc::new(HealthAggregator::new(
            settings.alerts.clone(),
            registry.clone(),
            Arc::clone(&coordinator),
            Arc::clone(&balancer),
            events.clone(),
        ));

        Self {
            config,
            state_tx,
            state_rx,
            shutdown_tx,
            shutdown_rx,
            events,
            registry,
            directory,
            detector,
            balancer,
            coordinator,
            aggregator,
            task_handles: RwLock::new(Vec::new()),
        }
    }

    /// Fleet identifier from the configuration.
    pub fn fleet_id(&self) -> &str {
        &self.config.fleet_id
    }

    /// Get current engine state.
    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    /// Whether the engine is in `Running`.
    pub fn is_running(&self) -> bool {
        matches!(self.state(), EngineState::Running)
    }

    fn set_state(&self, state: EngineState) {
        let _ = self.state_tx.send(state);
        metrics::set_engine_state(&state.to_string());
    }

    /// Subscribe to the fleet event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<FleetEvent> {
        self.events.subscribe()
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn detector(&self) -> &Arc<FailureDetector> {
        &self.detector
    }

    pub fn balancer(&self) -> &Arc<LoadBalancer> {
        &self.balancer
    }

    pub fn coordinator(&self) -> &Arc<FailoverCoordinator> {
        &self.coordinator
    }

    pub fn aggregator(&self) -> &Arc<HealthAggregator> {
        &self.aggregator
    }

    // =========================================================================
    // Node lifecycle
    // =========================================================================

    /// Register a node listed in the directory.
    ///
    /// With a handle the node gets a connection state machine, started
    /// right away if the engine is already running. Primaries carry work,
    /// backups stand by.
    pub async fn register_node(
        &self,
        node_id: &str,
        handle: Option<Arc<dyn ConnectionHandle>>,
    ) -> Result<Arc<Node>> {
        let descriptor = self.directory.get_node_config(node_id).await.map_err(|e| {
            warn!(node_id = %node_id, error = %e, "Cannot register node missing from directory");
            FleetError::from(e)
        })?;

        let connection = handle.map(|handle| {
            NodeConnection::new(
                node_id,
                self.config.settings.connection.clone(),
                handle,
                self.events.clone(),
            )
        });
        let node = Arc::new(Node::new(node_id, connection.clone()));

        if let Some(previous) = self.registry.insert(Arc::clone(&node)) {
            if let Some(old) = previous.connection() {
                old.destroy().await;
            }
        }
        self.balancer
            .register_node(node_id, descriptor.role == NodeRole::Primary);

        info!(
            node_id = %node_id,
            role = ?descriptor.role,
            priority = descriptor.priority,
            has_connection = connection.is_some(),
            "Node registered"
        );

        if let Some(connection) = connection {
            if self.is_running() {
                connection.initialize().await;
            }
        }
        Ok(node)
    }

    /// Remove a node from the fleet.
    ///
    /// Pending timers are cancelled before anything awaits; the node then
    /// drops out of every tracking structure and its session is torn down.
    pub async fn deprovision_node(&self, node_id: &str) -> Result<()> {
        let node = self
            .registry
            .remove(node_id)
            .ok_or_else(|| FleetError::NodeNotFound(node_id.to_string()))?;

        self.detector.forget(node_id);
        self.coordinator.forget(node_id);
        self.balancer.remove_node(node_id);

        if let Some(connection) = node.connection() {
            connection.destroy().await;
        }
        info!(node_id = %node_id, "Node deprovisioned");
        Ok(())
    }

    /// Operator reset: clears connection suspension and the recovery budget,
    /// then reconnects if the engine is running.
    pub async fn reset_node(&self, node_id: &str) -> Result<()> {
        let node = self
            .registry
            .get(node_id)
            .ok_or_else(|| FleetError::NodeNotFound(node_id.to_string()))?;

        if let Some(connection) = node.connection() {
            connection.reset().await;
            if self.is_running() {
                connection.initialize().await;
            }
        }
        self.detector.reset_recovery(node_id)
    }

    /// Operator action: clear one node's failure metrics.
    pub fn reset_metrics(&self, node_id: &str) -> Result<()> {
        self.detector.reset_metrics(node_id)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start the engine.
    ///
    /// 1. Validates the configuration
    /// 2. Registers every enabled directory node not registered yet
    /// 3. Initializes all node connections
    /// 4. Spawns the detector, dispatcher and load evaluation tasks
    pub async fn start(&self) -> Result<()> {
        if self.state() != EngineState::Created {
            return Err(FleetError::InvalidState {
                expected: "Created".to_string(),
                actual: format!("{:?}", self.state()),
            });
        }

        info!(fleet_id = %self.config.fleet_id, "Starting fleet engine");
        self.set_state(EngineState::Starting);

        if let Err(e) = self.config.validate() {
            error!(error = %e, "Invalid fleet configuration");
            self.set_state(EngineState::Failed);
            return Err(e);
        }

        let descriptors = match self.directory.list_nodes().await {
            Ok(descriptors) => descriptors,
            Err(e) => {
                error!(error = %e, "Failed to load node directory");
                self.set_state(EngineState::Failed);
                return Err(e.into());
            }
        };

        for descriptor in descriptors.iter().filter(|d| d.enabled) {
            if !self.registry.contains(&descriptor.id) {
                if let Err(e) = self.register_node(&descriptor.id, None).await {
                    self.set_state(EngineState::Failed);
                    return Err(e);
                }
            }
        }

        // Subscribe before anything can emit a failure. Lossless, since a
        // skipped NodeFailed would never be failed over.
        let events_rx = self.events.subscribe_lossless();

        let mut connected = 0;
        for node in self.registry.all() {
            if let Some(connection) = node.connection() {
                if connection.initialize().await {
                    connected += 1;
                }
            }
        }

        self.spawn_dispatcher(events_rx).await;
        if self.config.settings.detector.enabled {
            self.spawn_detector().await;
        }
        self.spawn_load_evaluation().await;

        self.set_state(EngineState::Running);
        info!(
            nodes = self.registry.len(),
            initializing = connected,
            "Fleet engine running"
        );
        Ok(())
    }

    async fn spawn_detector(&self) {
        let detector = Arc::clone(&self.detector);
        let shutdown_rx = self.shutdown_rx.clone();
        let handle = tokio::spawn(
            detector
                .run(shutdown_rx)
                .instrument(info_span!("failure_detector")),
        );
        info!("Spawned failure detector");
        self.task_handles.write().await.push(handle);
    }

    async fn spawn_dispatcher(&self, events_rx: mpsc::UnboundedReceiver<FleetEvent>) {
        let dispatcher = Dispatcher {
            aggregator: Arc::clone(&self.aggregator),
            coordinator: Arc::clone(&self.coordinator),
            balancer: Arc::clone(&self.balancer),
            directory: Arc::clone(&self.directory),
        };
        let shutdown_rx = self.shutdown_rx.clone();
        let handle = tokio::spawn(
            dispatcher
                .run(events_rx, shutdown_rx)
                .instrument(info_span!("event_dispatcher")),
        );
        debug!("Spawned event dispatcher");
        self.task_handles.write().await.push(handle);
    }

    async fn spawn_load_evaluation(&self) {
        let aggregator = Arc::clone(&self.aggregator);
        let mut shutdown_rx = self.shutdown_rx.clone();
        let interval = self.config.settings.balancer.evaluation_interval();

        let handle = tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        let raised = aggregator.evaluate_load();
                        if !raised.is_empty() {
                            debug!(count = raised.len(), "Load alerts raised");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            debug!("Load evaluation task stopping");
                            break;
                        }
                    }
                }
            }
        });
        debug!("Spawned load evaluation task");
        self.task_handles.write().await.push(handle);
    }

    /// Shut the engine down.
    ///
    /// 1. Signals every background task to stop and waits for each (with timeout)
    /// 2. Cancels detector re-probes and failover retention timers
    /// 3. Destroys every node connection
    pub async fn shutdown(&self) {
        info!("Shutting down fleet engine");
        self.set_state(EngineState::ShuttingDown);

        let _ = self.shutdown_tx.send(true);

        let handles: Vec<_> = {
            let mut guard = self.task_handles.write().await;
            std::mem::take(&mut *guard)
        };

        let task_count = handles.len();
        if task_count > 0 {
            info!(task_count, "Waiting for tasks to complete");
        }

        for (i, handle) in handles.into_iter().enumerate() {
            match tokio::time::timeout(DRAIN_TIMEOUT, handle).await {
                Ok(Ok(())) => {
                    debug!(task = i + 1, "Task completed gracefully");
                }
                Ok(Err(e)) => {
                    warn!(task = i + 1, error = %e, "Task panicked during shutdown");
                }
                Err(_) => {
                    warn!(task = i + 1, "Task timed out during shutdown");
                }
            }
        }

        self.detector.stop();
        self.coordinator.stop();

        for node in self.registry.all() {
            if let Some(connection) = node.connection() {
                connection.destroy().await;
            }
        }

        self.set_state(EngineState::Stopped);
        info!("Fleet engine stopped");
    }

    // =========================================================================
    // Operations and queries
    // =========================================================================

    /// Fail over `failed_node` now, optionally to a chosen backup.
    pub async fn failover(
        &self,
        failed_node: &str,
        preferred_backup: Option<&str>,
    ) -> Result<FailoverOutcome> {
        if !self.registry.contains(failed_node) {
            return Err(FleetError::NodeNotFound(failed_node.to_string()));
        }
        self.coordinator
            .trigger_failover(failed_node, preferred_backup)
            .await
    }

    /// Pick a healthy routable node for one unit of work.
    pub fn select_node_for_work(&self) -> Result<String> {
        self.balancer.select_node_for_work()
    }

    /// The node that serves work addressed to `node_id`.
    ///
    /// Follows failover redirects, so work pinned to a failed node lands on
    /// its backup. Unknown nodes are an error.
    pub fn route_for(&self, node_id: &str) -> Result<String> {
        if !self.registry.contains(node_id) {
            return Err(FleetError::NodeNotFound(node_id.to_string()));
        }
        Ok(self.balancer.resolve(node_id))
    }

    /// Work routed to `node_id` finished.
    pub fn record_completed(&self, node_id: &str) {
        self.balancer.record_completed(node_id);
    }

    /// Work routed to `node_id` failed.
    pub fn record_failed(&self, node_id: &str) {
        self.balancer.record_failed(node_id);
    }

    /// Health report for one node.
    pub async fn node_health(&self, node_id: &str) -> Result<NodeHealthReport> {
        self.aggregator
            .node_health(node_id)
            .await
            .ok_or_else(|| FleetError::NodeNotFound(node_id.to_string()))
    }

    pub async fn fleet_health_report(&self) -> FleetHealthReport {
        self.aggregator.fleet_health_report().await
    }

    /// Retained failover records, oldest first.
    pub fn failover_history(&self) -> Vec<FailoverRecord> {
        self.coordinator.history()
    }

    pub fn load_distribution(&self) -> LoadDistribution {
        self.balancer.get_load_distribution()
    }

    /// Everything a dashboard needs in one serializable value.
    pub async fn dashboard_snapshot(&self) -> DashboardSnapshot {
        self.aggregator.dashboard_snapshot().await
    }

    pub fn acknowledge_alert(&self, alert_id: &str) -> bool {
        self.aggregator.acknowledge(alert_id)
    }
}

/// Event fan-in for the engine's own reactions.
struct Dispatcher {
    aggregator: Arc<HealthAggregator>,
    coordinator: Arc<FailoverCoordinator>,
    balancer: Arc<LoadBalancer>,
    directory: Arc<dyn NodeDirectory>,
}

impl Dispatcher {
    async fn run(
        self,
        mut events_rx: mpsc::UnboundedReceiver<FleetEvent>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        // Mark initial shutdown value as seen so changed() only fires on actual changes
        let _ = shutdown_rx.borrow_and_update();
        let mut failovers = JoinSet::new();

        loop {
            let event = tokio::select! {
                biased;

                result = shutdown_rx.changed() => {
                    if result.is_err() || *shutdown_rx.borrow() {
                        debug!("Event dispatcher stopping");
                        break;
                    }
                    continue;
                }

                Some(_) = failovers.join_next(), if !failovers.is_empty() => continue,

                event = events_rx.recv() => event,
            };

            match event {
                Some(event) => self.dispatch(event, &mut failovers).await,
                None => break,
            }
        }

        if !failovers.is_empty() {
            info!(count = failovers.len(), "Waiting for in-flight failovers");
            let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
                while failovers.join_next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                warn!("In-flight failovers timed out during shutdown");
                failovers.abort_all();
            }
        }
    }

    async fn dispatch(&self, event: FleetEvent, failovers: &mut JoinSet<()>) {
        self.aggregator.observe(&event);

        match event {
            FleetEvent::NodeFailed { node_id, .. } if self.coordinator.config().auto_failover => {
                let coordinator = Arc::clone(&self.coordinator);
                // Failovers for different nodes run side by side
                failovers.spawn(async move {
                    if let Err(e) = coordinator.trigger_failover(&node_id, None).await {
                        debug!(node_id = %node_id, error = %e, "Automatic failover did not complete");
                    }
                });
            }
            FleetEvent::NodeRecovered { node_id, .. } => {
                let primary = match self.directory.get_node_config(&node_id).await {
                    Ok(descriptor) => descriptor.role == NodeRole::Primary,
                    Err(e) => {
                        warn!(node_id = %node_id, error = %e, "Recovered node missing from directory");
                        false
                    }
                };
                self.balancer.rejoin(&node_id, primary);
            }
            _ => {}
        }
    }
}
