// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-node connection state machine.
//!
//! Drives one node's [`ConnectionHandle`] through its lifecycle: connect,
//! classify failures, back off, trip the circuit breaker, debounce pairing
//! challenges, and tear down stale sessions.
//!
//! # Connection Lifecycle
//!
//! ```text
//!  Idle ──initialize──► Connecting ──ready──► Connected
//!                         │    ▲                 │
//!            connect error│    │reconnect timer  │disconnected / stale
//!                         ▼    │                 ▼
//!                       Error ─┴──────────── Disconnected
//!                         │
//!     breaker threshold / │ reconnects exhausted
//!                         ▼
//!                     Suspended ──cooldown──► Disconnected
//! ```
//!
//! # Error Handling
//!
//! | Class | Counted | Action |
//! |-------|---------|--------|
//! | transient | no | reconnect with backoff |
//! | critical | yes | reconnect with backoff, trip breaker at threshold |
//! | resource locked | no | clean locks, kill process, settle, retry; escalate to breaker after repeats |
//!
//! Reconnect delay is `min(base * 2^(n-1), max) + jitter`. After
//! `max_reconnect_attempts` scheduled reconnects the node is suspended until
//! [`NodeConnection::reset()`].
//!
//! # Concurrency
//!
//! All state lives behind one async mutex per node, so signal handling,
//! timer callbacks and operator calls for the same node never interleave
//! mid-mutation. The lock is never held across a call into the handle.
//! Timer callbacks hold only a weak reference to the connection.

mod classify;
mod pairing;
mod types;

pub use classify::{classify, ErrorClass};
pub use pairing::PairingDecision;
pub use types::{ConnectionSnapshot, ConnectionState, StateTransition, Suspension, TimerKind};

use crate::config::ConnectionConfig;
use crate::epoch_millis;
use crate::events::{EventSink, FleetEvent};
use crate::handle::{ConnectionHandle, HandleSignal};
use crate::metrics;
use crate::scheduler::Scheduler;
use pairing::PairingState;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

struct ConnectionInner {
    state: ConnectionState,
    error_count: u32,
    reconnect_attempts: u32,
    circuit_trips: u32,
    lock_recoveries: u32,
    suspension: Option<Suspension>,
    last_error: Option<String>,
    last_activity: Option<Instant>,
    last_activity_ms: Option<u64>,
    connected_since_ms: Option<u64>,
    pairing: PairingState,
    history: VecDeque<StateTransition>,
    /// Bumped by every `initialize()`; signals carry the session they came from.
    session: u64,
    destroyed: bool,
}

impl ConnectionInner {
    fn new() -> Self {
        Self {
            state: ConnectionState::Idle,
            error_count: 0,
            reconnect_attempts: 0,
            circuit_trips: 0,
            lock_recoveries: 0,
            suspension: None,
            last_error: None,
            last_activity: None,
            last_activity_ms: None,
            connected_since_ms: None,
            pairing: PairingState::default(),
            history: VecDeque::new(),
            session: 0,
            destroyed: false,
        }
    }

    fn touch(&mut self) {
        self.last_activity = Some(Instant::now());
        self.last_activity_ms = Some(epoch_millis());
    }
}

/// A node's connection and the state machine around it.
pub struct NodeConnection {
    node_id: String,
    config: ConnectionConfig,
    handle: Arc<dyn ConnectionHandle>,
    inner: Mutex<ConnectionInner>,
    timers: Scheduler<TimerKind>,
    events: EventSink,
}

impl NodeConnection {
    /// Create an idle connection for `node_id`. Nothing happens until
    /// [`initialize()`](Self::initialize).
    pub fn new(
        node_id: impl Into<String>,
        config: ConnectionConfig,
        handle: Arc<dyn ConnectionHandle>,
        events: EventSink,
    ) -> Arc<Self> {
        let node_id = node_id.into();
        Arc::new(Self {
            timers: Scheduler::new(format!("connection:{}", node_id)),
            node_id,
            config,
            handle,
            inner: Mutex::new(ConnectionInner::new()),
            events,
        })
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Current state.
    pub async fn state(&self) -> ConnectionState {
        self.inner.lock().await.state
    }

    /// Point-in-time copy of state, counters and transition history.
    pub async fn snapshot(&self) -> ConnectionSnapshot {
        let inner = self.inner.lock().await;
        ConnectionSnapshot {
            node_id: self.node_id.clone(),
            state: inner.state,
            error_count: inner.error_count,
            reconnect_attempts: inner.reconnect_attempts,
            circuit_trips: inner.circuit_trips,
            lock_recoveries: inner.lock_recoveries,
            pairing_attempts: inner.pairing.attempts(),
            suspension: inner.suspension,
            last_error: inner.last_error.clone(),
            last_activity_ms: inner.last_activity_ms,
            connected_since_ms: inner.connected_since_ms,
            history: inner.history.iter().cloned().collect(),
        }
    }

    /// Whether a timer of `kind` is pending.
    pub fn has_pending(&self, kind: TimerKind) -> bool {
        self.timers.is_scheduled(&kind)
    }

    fn transition(&self, inner: &mut ConnectionInner, to: ConnectionState, reason: Option<String>) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;

        let at_ms = epoch_millis();
        inner.history.push_back(StateTransition {
            from,
            to,
            reason: reason.clone(),
            at_ms,
        });
        while inner.history.len() > self.config.history_limit {
            inner.history.pop_front();
        }

        info!(
            node_id = %self.node_id,
            %from,
            %to,
            reason = reason.as_deref().unwrap_or(""),
            "Connection state changed"
        );
        metrics::set_connection_state(&self.node_id, to.as_str());
        self.events.emit(FleetEvent::NodeStateChanged {
            node_id: self.node_id.clone(),
            from,
            to,
            reason,
            at_ms,
        });
    }

    // =========================================================================
    // Connect
    // =========================================================================

    /// Start connecting.
    ///
    /// Returns `false` without effect if the node is already connecting or
    /// connected, suspended, or destroyed, or if the handle's launch call
    /// failed (the failure is handled like any connect error).
    pub async fn initialize(self: &Arc<Self>) -> bool {
        let session = {
            let mut inner = self.inner.lock().await;
            if inner.destroyed {
                debug!(node_id = %self.node_id, "Initialize ignored, connection destroyed");
                return false;
            }
            match inner.state {
                ConnectionState::Connecting | ConnectionState::Connected => {
                    debug!(node_id = %self.node_id, state = %inner.state, "Initialize ignored, already active");
                    return false;
                }
                ConnectionState::Suspended => {
                    debug!(node_id = %self.node_id, suspension = ?inner.suspension, "Initialize ignored, suspended");
                    return false;
                }
                _ => {}
            }
            inner.session += 1;
            self.transition(&mut inner, ConnectionState::Connecting, None);
            inner.session
        };

        let (tx, rx) = mpsc::unbounded_channel();
        self.timers.spawn(
            TimerKind::SignalPump,
            Self::signal_pump_task(Arc::downgrade(self), session, rx),
        );

        match self.handle.initialize(tx).await {
            Ok(()) => true,
            Err(e) => {
                self.handle_connect_error(e.0).await;
                false
            }
        }
    }


    /// Apply a signal from `session`, dropping it if a newer session has
    /// started since. A torn-down session's last words never reach its
    /// replacement.
    async fn on_session_signal(self: &Arc<Self>, session: u64, signal: HandleSignal) {
        let current = self.inner.lock().await.session;
        if current != session {
            debug!(
                node_id = %self.node_id,
                session,
                current,
                ?signal,
                "Signal from previous session dropped"
            );
            return;
        }
        self.on_signal(signal).await;
    }

    /// Apply one lifecycle signal from the handle.
    pub async fn on_signal(self: &Arc<Self>, signal: HandleSignal) {
        match signal {
            HandleSignal::Connecting => {
                let mut inner = self.inner.lock().await;
                if matches!(
                    inner.state,
                    ConnectionState::Disconnected | ConnectionState::Error | ConnectionState::Idle
                ) && !inner.destroyed
                {
                    self.transition(&mut inner, ConnectionState::Connecting, Some("handle reconnecting".into()));
                }
            }
            HandleSignal::Authenticated => {
                debug!(node_id = %self.node_id, "Authenticated");
                self.record_activity().await;
            }
            HandleSignal::Ready => self.handle_ready().await,
            HandleSignal::Disconnected(reason) => self.handle_disconnected(reason).await,
            HandleSignal::Error(message) => self.handle_connect_error(message).await,
            HandleSignal::PairingChallenge(code) => {
                self.handle_pairing_challenge(&code).await;
            }
            HandleSignal::Activity => self.record_activity().await,
        }
    }

    async fn handle_ready(self: &Arc<Self>) {
        let mut inner = self.inner.lock().await;
        if inner.destroyed {
            return;
        }

        for kind in [
            TimerKind::Reconnect,
            TimerKind::CircuitCooldown,
            TimerKind::PairingTimeout,
            TimerKind::LockRecovery,
        ] {
            self.timers.cancel(&kind);
        }

        let recovered_from = inner.error_count;
        inner.error_count = 0;
        inner.reconnect_attempts = 0;
        inner.circuit_trips = 0;
        inner.lock_recoveries = 0;
        inner.suspension = None;
        inner.pairing.reset();
        inner.touch();
        inner.connected_since_ms = Some(epoch_millis());
        self.transition(&mut inner, ConnectionState::Connected, None);
        drop(inner);

        metrics::record_connection(&self.node_id, true);
        if recovered_from > 0 {
            info!(node_id = %self.node_id, errors = recovered_from, "Connected after errors, counters reset");
        }

        let weak = Arc::downgrade(self);
        self.timers.schedule_every(
            TimerKind::Keepalive,
            self.config.keepalive_interval(),
            move || Self::keepalive_task(weak.clone()),
        );
    }

    async fn handle_disconnected(self: &Arc<Self>, reason: String) {
        let mut inner = self.inner.lock().await;
        if inner.destroyed
            || !matches!(inner.state, ConnectionState::Connected | ConnectionState::Connecting)
        {
            debug!(node_id = %self.node_id, state = %inner.state, %reason, "Disconnect ignored");
            return;
        }
        warn!(node_id = %self.node_id, %reason, "Connection dropped");
        self.timers.cancel(&TimerKind::Keepalive);
        inner.connected_since_ms = None;
        self.transition(&mut inner, ConnectionState::Disconnected, Some(reason));
        self.schedule_reconnect(&mut inner);
    }

    async fn handle_connect_error(self: &Arc<Self>, message: String) {
        let class = classify(&message);
        metrics::record_connection_error(&self.node_id, class.as_str());

        let mut inner = self.inner.lock().await;
        if inner.destroyed {
            return;
        }
        inner.last_error = Some(message.clone());

        // Transient noise on a live session is not a connect failure
        if inner.state == ConnectionState::Connected && class == ErrorClass::Transient {
            debug!(node_id = %self.node_id, error = %message, "Transient error on live session");
            return;
        }

        metrics::record_connection(&self.node_id, false);
        self.timers.cancel(&TimerKind::Keepalive);
        inner.connected_since_ms = None;

        match class {
            ErrorClass::Transient => {
                warn!(node_id = %self.node_id, error = %message, "Transient connect error");
                self.transition(&mut inner, ConnectionState::Error, Some(message));
                self.schedule_reconnect(&mut inner);
            }
            ErrorClass::Critical => {
                inner.error_count += 1;
                warn!(
                    node_id = %self.node_id,
                    error = %message,
                    error_count = inner.error_count,
                    threshold = self.config.circuit_breaker_threshold,
                    "Critical connect error"
                );
                self.transition(&mut inner, ConnectionState::Error, Some(message));
                if inner.error_count >= self.config.circuit_breaker_threshold {
                    self.trip(&mut inner);
                } else {
                    self.schedule_reconnect(&mut inner);
                }
            }
            ErrorClass::ResourceLocked => {
                if inner.lock_recoveries >= self.config.max_lock_recoveries {
                    error!(
                        node_id = %self.node_id,
                        recoveries = inner.lock_recoveries,
                        "Lock recovery keeps failing, escalating to circuit breaker"
                    );
                    metrics::record_lock_recovery(&self.node_id, true);
                    inner.lock_recoveries = 0;
                    self.transition(&mut inner, ConnectionState::Error, Some(message));
                    self.trip(&mut inner);
                    return;
                }
                inner.lock_recoveries += 1;
                warn!(
                    node_id = %self.node_id,
                    error = %message,
                    recovery = inner.lock_recoveries,
                    "Resource locked, starting lock recovery"
                );
                metrics::record_lock_recovery(&self.node_id, false);
                self.transition(&mut inner, ConnectionState::Error, Some(message));
                self.timers.cancel(&TimerKind::Reconnect);

                let weak = Arc::downgrade(self);
                self.timers
                    .schedule_after(TimerKind::LockRecovery, Duration::ZERO, move || {
                        Self::lock_recovery_task(weak)
                    });
            }
        }
    }

    async fn run_lock_recovery(self: &Arc<Self>) {
        if let Err(e) = self.handle.clean_locks().await {
            warn!(node_id = %self.node_id, error = %e, "Lock cleanup failed");
        }
        match self.handle.terminate_process().await {
            Ok(true) => info!(node_id = %self.node_id, "Terminated stale process"),
            Ok(false) => debug!(node_id = %self.node_id, "No tracked process to terminate"),
            Err(e) => warn!(node_id = %self.node_id, error = %e, "Process termination failed"),
        }
        tokio::time::sleep(self.config.lock_recovery_settle()).await;
        self.initialize().await;
    }

    // =========================================================================
    // Backoff and circuit breaker
    // =========================================================================

    fn schedule_reconnect(self: &Arc<Self>, inner: &mut ConnectionInner) {
        if inner.reconnect_attempts >= self.config.max_reconnect_attempts {
            let attempts = inner.reconnect_attempts;
            self.timers.cancel(&TimerKind::Reconnect);
            inner.suspension = Some(Suspension::ReconnectsExhausted { attempts });
            error!(node_id = %self.node_id, attempts, "Reconnect attempts exhausted, suspending");
            self.transition(
                inner,
                ConnectionState::Suspended,
                Some(format!("reconnect attempts exhausted ({})", attempts)),
            );
            return;
        }

        inner.reconnect_attempts += 1;
        let attempt = inner.reconnect_attempts;
        let delay = self.config.reconnect_delay(attempt);
        metrics::record_reconnect_scheduled(&self.node_id, delay);
        info!(
            node_id = %self.node_id,
            attempt,
            max = self.config.max_reconnect_attempts,
            delay_ms = delay.as_millis() as u64,
            "Reconnect scheduled"
        );

        let weak = Arc::downgrade(self);
        self.timers
            .schedule_after(TimerKind::Reconnect, delay, move || Self::reconnect_task(weak));
    }

    async fn reconnect(self: &Arc<Self>) {
        {
            let inner = self.inner.lock().await;
            if inner.destroyed
                || !matches!(
                    inner.state,
                    ConnectionState::Disconnected | ConnectionState::Error | ConnectionState::Idle
                )
            {
                return;
            }
        }
        // Fresh session for each attempt
        if let Err(e) = self.handle.destroy().await {
            debug!(node_id = %self.node_id, error = %e, "Destroy before reconnect failed");
        }
        self.initialize().await;
    }

    fn trip(self: &Arc<Self>, inner: &mut ConnectionInner) {
        inner.circuit_trips += 1;
        let trip = inner.circuit_trips;
        let cooldown = self.config.cooldown_for_trip(trip);

        self.timers.cancel(&TimerKind::Reconnect);
        self.timers.cancel(&TimerKind::LockRecovery);
        inner.suspension = Some(Suspension::CircuitOpen {
            trip,
            cooldown_ms: cooldown.as_millis() as u64,
        });
        metrics::record_circuit_trip(&self.node_id, trip, cooldown);
        warn!(
            node_id = %self.node_id,
            trip,
            error_count = inner.error_count,
            cooldown_sec = cooldown.as_secs(),
            "Circuit breaker opened"
        );
        self.transition(
            inner,
            ConnectionState::Suspended,
            Some(format!("circuit open, trip {}", trip)),
        );

        let weak = Arc::downgrade(self);
        self.timers
            .schedule_after(TimerKind::CircuitCooldown, cooldown, move || Self::cooldown_task(weak));
    }

    async fn on_cooldown_elapsed(self: &Arc<Self>) {
        let mut inner = self.inner.lock().await;
        if inner.destroyed
            || inner.state != ConnectionState::Suspended
            || !matches!(inner.suspension, Some(Suspension::CircuitOpen { .. }))
        {
            return;
        }
        // error_count survives until a successful connect, so a critical
        // failure right away re-trips with the next cooldown
        inner.suspension = None;
        inner.reconnect_attempts = 0;
        info!(node_id = %self.node_id, error_count = inner.error_count, "Circuit cooldown elapsed, probing");
        self.transition(
            &mut inner,
            ConnectionState::Disconnected,
            Some("circuit cooldown elapsed".into()),
        );
        self.schedule_reconnect(&mut inner);
    }

    // =========================================================================
    // Pairing
    // =========================================================================

    /// Offer a pairing challenge. Returns whether it was accepted.
    pub async fn handle_pairing_challenge(self: &Arc<Self>, code: &str) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.destroyed {
            return false;
        }
        match inner
            .pairing
            .offer(Instant::now(), self.config.pairing_debounce())
        {
            PairingDecision::Debounced => {
                debug!(node_id = %self.node_id, "Pairing challenge debounced");
                metrics::record_pairing_challenge(&self.node_id, false);
                false
            }
            PairingDecision::Accepted { attempt, first } => {
                info!(node_id = %self.node_id, attempt, "Pairing challenge accepted");
                metrics::record_pairing_challenge(&self.node_id, true);
                inner.touch();
                self.events.emit(FleetEvent::PairingChallenge {
                    node_id: self.node_id.clone(),
                    code: code.to_string(),
                    attempt,
                });
                if first {
                    let weak = Arc::downgrade(self);
                    self.timers.schedule_after(
                        TimerKind::PairingTimeout,
                        self.config.pairing_timeout(),
                        move || Self::pairing_timeout_task(weak),
                    );
                }
                true
            }
        }
    }

    async fn on_pairing_expired(self: &Arc<Self>) {
        {
            let mut inner = self.inner.lock().await;
            if inner.destroyed || inner.state == ConnectionState::Connected {
                return;
            }
            let attempts = inner.pairing.attempts();
            inner.pairing.reset();
            warn!(node_id = %self.node_id, attempts, "Pairing not completed in time, abandoning");
            self.events.emit(FleetEvent::PairingExpired {
                node_id: self.node_id.clone(),
            });
            if inner.state == ConnectionState::Suspended {
                return;
            }
            self.transition(
                &mut inner,
                ConnectionState::Disconnected,
                Some("pairing timed out".into()),
            );
            self.schedule_reconnect(&mut inner);
        }
        if let Err(e) = self.handle.destroy().await {
            warn!(node_id = %self.node_id, error = %e, "Destroy after pairing timeout failed");
        }
    }

    // =========================================================================
    // Keep-alive
    // =========================================================================

    /// Note traffic on the session.
    pub async fn record_activity(&self) {
        self.inner.lock().await.touch();
    }

    async fn check_keepalive(self: &Arc<Self>) {
        let stale = {
            let inner = self.inner.lock().await;
            if inner.state != ConnectionState::Connected {
                return;
            }
            inner
                .last_activity
                .map(|t| t.elapsed() > self.config.inactivity_timeout())
                .unwrap_or(false)
        };
        if !stale {
            return;
        }

        metrics::record_stale_session(&self.node_id);
        warn!(
            node_id = %self.node_id,
            timeout_sec = self.config.inactivity_timeout_sec,
            "No activity within timeout, recycling session"
        );
        let weak = Arc::downgrade(self);
        self.timers
            .schedule_after(TimerKind::Reconnect, Duration::ZERO, move || Self::stale_session_task(weak));
    }

    async fn recover_stale_session(self: &Arc<Self>) {
        {
            let mut inner = self.inner.lock().await;
            if inner.destroyed || inner.state != ConnectionState::Connected {
                return;
            }
            self.timers.cancel(&TimerKind::Keepalive);
            inner.connected_since_ms = None;
            self.transition(
                &mut inner,
                ConnectionState::Disconnected,
                Some("stale session".into()),
            );
        }
        if let Err(e) = self.handle.destroy().await {
            warn!(node_id = %self.node_id, error = %e, "Destroy of stale session failed");
        }
        self.initialize().await;
    }

    // =========================================================================
    // Timer bodies
    // =========================================================================
    //
    // Concrete boxed futures: the state machine re-enters itself through
    // timers, and naming the task type here keeps that cycle out of the
    // async fns' inferred types.

    fn signal_pump_task(
        weak: Weak<Self>,
        session: u64,
        mut rx: mpsc::UnboundedReceiver<HandleSignal>,
    ) -> Task {
        Box::pin(async move {
            while let Some(signal) = rx.recv().await {
                let Some(this) = weak.upgrade() else {
                    break;
                };
                this.on_session_signal(session, signal).await;
            }
        })
    }

    fn reconnect_task(weak: Weak<Self>) -> Task {
        Box::pin(async move {
            if let Some(this) = weak.upgrade() {
                this.reconnect().await;
            }
        })
    }

    fn cooldown_task(weak: Weak<Self>) -> Task {
        Box::pin(async move {
            if let Some(this) = weak.upgrade() {
                this.on_cooldown_elapsed().await;
            }
        })
    }

    fn lock_recovery_task(weak: Weak<Self>) -> Task {
        Box::pin(async move {
            if let Some(this) = weak.upgrade() {
                this.run_lock_recovery().await;
            }
        })
    }

    fn pairing_timeout_task(weak: Weak<Self>) -> Task {
        Box::pin(async move {
            if let Some(this) = weak.upgrade() {
                this.on_pairing_expired().await;
            }
        })
    }

    fn keepalive_task(weak: Weak<Self>) -> Task {
        Box::pin(async move {
            if let Some(this) = weak.upgrade() {
                this.check_keepalive().await;
            }
        })
    }

    fn stale_session_task(weak: Weak<Self>) -> Task {
        Box::pin(async move {
            if let Some(this) = weak.upgrade() {
                this.recover_stale_session().await;
            }
        })
    }

    // =========================================================================
    // Operator actions
    // =========================================================================

    /// Clear suspension and every counter, returning to `Idle`.
    ///
    /// The only way out of `Suspended(ReconnectsExhausted)`. Call
    /// [`initialize()`](Self::initialize) afterwards to connect.
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        if inner.destroyed {
            return;
        }
        for kind in [
            TimerKind::Reconnect,
            TimerKind::CircuitCooldown,
            TimerKind::PairingTimeout,
            TimerKind::LockRecovery,
            TimerKind::Keepalive,
        ] {
            self.timers.cancel(&kind);
        }
        inner.error_count = 0;
        inner.reconnect_attempts = 0;
        inner.circuit_trips = 0;
        inner.lock_recoveries = 0;
        inner.suspension = None;
        inner.last_error = None;
        inner.connected_since_ms = None;
        inner.pairing.reset();
        info!(node_id = %self.node_id, "Connection reset by operator");
        self.transition(&mut inner, ConnectionState::Idle, Some("manual reset".into()));
    }

    /// Cancel every timer and tear the session down.
    ///
    /// Timers are cancelled before this first awaits. A handle that fails
    /// to tear down is logged, not retried.
    pub async fn destroy(&self) {
        self.timers.cancel_all();
        {
            let mut inner = self.inner.lock().await;
            if inner.destroyed {
                return;
            }
            inner.destroyed = true;
            inner.connected_since_ms = None;
            self.transition(&mut inner, ConnectionState::Disconnected, Some("destroyed".into()));
        }
        if let Err(e) = self.handle.destroy().await {
            error!(node_id = %self.node_id, error = %e, "Handle destroy failed");
        }
    }

    /// Number of timers and tasks still registered. Zero after `destroy()`.
    pub fn pending_timers(&self) -> usize {
        self.timers.pending()
    }
}
