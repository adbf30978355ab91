//! Mock ConnectionHandle for testing.
//!
//! Records initialize/destroy/clean_locks calls. Launch results are scripted
//! per call, with a sticky fallback once the script runs dry. By default a
//! successful launch reports `Ready` straight away.

use fleet_engine::handle::{BoxFuture, ConnectionHandle, HandleError, HandleSignal, SignalSender};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

/// Scripted connection handle.
///
/// # Example
/// ```rust,ignore
/// let handle = MockHandle::failing("auth failure: logged out");
/// engine.register_node("a", Some(handle.clone())).await?;
///
/// // Later, let the client come back
/// handle.succeed_from_now();
///
/// assert_eq!(handle.initialized(), 3);
/// ```
#[derive(Default)]
pub struct MockHandle {
    script: Mutex<VecDeque<Result<(), String>>>,
    fallback: Mutex<Option<String>>,
    signals: Mutex<Option<SignalSender>>,
    /// Leave the session in `Connecting` after launch.
    manual: AtomicBool,
    initialized: AtomicU32,
    destroyed: AtomicU32,
    locks_cleaned: AtomicU32,
}

#[allow(dead_code)]
impl MockHandle {
    /// Launch succeeds and reports `Ready`.
    pub fn ready() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Launch succeeds; readiness must be sent by the test.
    pub fn manual() -> Arc<Self> {
        let handle = Self::default();
        handle.manual.store(true, Ordering::SeqCst);
        Arc::new(handle)
    }

    /// Every launch fails with `message` until [`succeed_from_now`](Self::succeed_from_now).
    pub fn failing(message: &str) -> Arc<Self> {
        let handle = Self::default();
        *handle.fallback.lock() = Some(message.to_string());
        Arc::new(handle)
    }

    /// Queue the result of the next launch.
    pub fn push_result(&self, result: Result<(), &str>) {
        self.script
            .lock()
            .push_back(result.map_err(str::to_string));
    }

    pub fn succeed_from_now(&self) {
        *self.fallback.lock() = None;
    }

    pub fn fail_from_now(&self, message: &str) {
        *self.fallback.lock() = Some(message.to_string());
    }

    /// Deliver a signal on the most recent session's channel.
    pub fn send(&self, signal: HandleSignal) {
        if let Some(tx) = self.signals.lock().as_ref() {
            let _ = tx.send(signal);
        }
    }

    pub fn initialized(&self) -> u32 {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> u32 {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn locks_cleaned(&self) -> u32 {
        self.locks_cleaned.load(Ordering::SeqCst)
    }
}

impl ConnectionHandle for MockHandle {
    fn initialize(&self, signals: SignalSender) -> BoxFuture<'_, ()> {
        self.initialized.fetch_add(1, Ordering::SeqCst);
        let result = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| match self.fallback.lock().clone() {
                Some(msg) => Err(msg),
                None => Ok(()),
            });

        if result.is_ok() && !self.manual.load(Ordering::SeqCst) {
            let _ = signals.send(HandleSignal::Authenticated);
            let _ = signals.send(HandleSignal::Ready);
        }
        *self.signals.lock() = Some(signals);

        Box::pin(async move { result.map_err(HandleError) })
    }

    fn destroy(&self) -> BoxFuture<'_, ()> {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }

    fn clean_locks(&self) -> BoxFuture<'_, ()> {
        self.locks_cleaned.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }
}
