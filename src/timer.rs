//! Cancelable scheduling shared by room phases, reconnect backoff and background sweeps.
//!
//! Every timeout or interval is registered under an auto-incrementing [`TimerHandle`] and a
//! [`TimerScope`]. Timeouts leave the registry when they fire; intervals stay until cancelled.
//! When a scope ends (a room closes, a client connection goes away) its owner calls
//! [`TimerService::cancel_all`], usually through a [`ScopeGuard`], so nothing fires against
//! stale state. The registry can be inspected with [`TimerService::stats`] to spot leaks.

use std::{
    collections::HashMap,
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use thiserror::Error;
use tokio::{
    task::AbortHandle,
    time::{Instant, MissedTickBehavior, interval_at, sleep},
};
use tracing::{debug, error};
use uuid::Uuid;

/// Identifier returned for every scheduled timeout or interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

impl fmt::Display for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// Logical owner of a group of timers, cancelled together when the owner goes away.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TimerScope {
    /// Timers driving a single game room, keyed by its room code.
    Room(String),
    /// Timers owned by one client connection (reconnect backoff).
    Connection(Uuid),
    /// Process-wide housekeeping such as the idle room sweep.
    Service,
}

impl fmt::Display for TimerScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerScope::Room(code) => write!(f, "room:{code}"),
            TimerScope::Connection(id) => write!(f, "connection:{id}"),
            TimerScope::Service => f.write_str("service"),
        }
    }
}

/// Whether a registration fires once or recurs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Fires once and is removed from the registry.
    Timeout,
    /// Fires every period until cancelled.
    Interval,
}

/// Errors raised when scheduling work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TimerError {
    /// [`TimerService::shutdown`] was called; no further work is accepted.
    #[error("timer service has been shut down")]
    ShutDown,
}

/// Aggregate counters over the live registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimerStats {
    /// Pending one-shot timeouts.
    pub timeouts: usize,
    /// Active intervals.
    pub intervals: usize,
    /// Age of the oldest live registration, if any.
    pub oldest_age: Option<Duration>,
}

impl TimerStats {
    /// Total number of live registrations.
    pub fn total(&self) -> usize {
        self.timeouts + self.intervals
    }
}

struct TimerEntry {
    label: &'static str,
    scope: TimerScope,
    kind: TimerKind,
    created_at: Instant,
    abort: AbortHandle,
}

#[derive(Default)]
struct Registry {
    entries: HashMap<TimerHandle, TimerEntry>,
    closed: bool,
}

/// Registry-backed scheduler. Construct one per process and share it behind an [`Arc`].
pub struct TimerService {
    registry: Arc<Mutex<Registry>>,
    next_handle: AtomicU64,
}

impl Default for TimerService {
    fn default() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            next_handle: AtomicU64::new(1),
        }
    }
}

impl TimerService {
    /// Create an empty service ready to accept work.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Run `callback` once after `delay`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn schedule<F>(
        &self,
        callback: F,
        delay: Duration,
        label: &'static str,
        scope: TimerScope,
    ) -> Result<TimerHandle, TimerError>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = self.allocate_handle();
        let mut registry = lock(&self.registry);
        if registry.closed {
            return Err(TimerError::ShutDown);
        }

        let shared = Arc::clone(&self.registry);
        // The registry lock is held until the entry is inserted, so the task cannot observe a
        // missing entry unless the timer was cancelled.
        let task = tokio::spawn(async move {
            sleep(delay).await;
            if lock(&shared).entries.remove(&handle).is_none() {
                return;
            }
            run_guarded(label, handle, callback);
        });

        registry.entries.insert(
            handle,
            TimerEntry {
                label,
                scope,
                kind: TimerKind::Timeout,
                created_at: Instant::now(),
                abort: task.abort_handle(),
            },
        );
        debug!(%handle, label, delay_ms = delay.as_millis() as u64, "timeout scheduled");
        Ok(handle)
    }

    /// Run `callback` every `period`, starting one period from now.
    pub fn schedule_interval<F>(
        &self,
        mut callback: F,
        period: Duration,
        label: &'static str,
        scope: TimerScope,
    ) -> Result<TimerHandle, TimerError>
    where
        F: FnMut() + Send + 'static,
    {
        let handle = self.allocate_handle();
        let mut registry = lock(&self.registry);
        if registry.closed {
            return Err(TimerError::ShutDown);
        }

        let shared = Arc::clone(&self.registry);
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !lock(&shared).entries.contains_key(&handle) {
                    break;
                }
                run_guarded(label, handle, &mut callback);
            }
        });

        registry.entries.insert(
            handle,
            TimerEntry {
                label,
                scope,
                kind: TimerKind::Interval,
                created_at: Instant::now(),
                abort: task.abort_handle(),
            },
        );
        debug!(%handle, label, period_ms = period.as_millis() as u64, "interval scheduled");
        Ok(handle)
    }

    /// Cancel a single registration. Returns `false` when it already fired or was cancelled.
    pub fn cancel(&self, handle: TimerHandle) -> bool {
        let removed = lock(&self.registry).entries.remove(&handle);
        match removed {
            Some(entry) => {
                entry.abort.abort();
                debug!(%handle, label = entry.label, "timer cancelled");
                true
            }
            None => false,
        }
    }

    /// Cancel every registration in `scope`, returning how many were live.
    ///
    /// Calling it again for the same scope is harmless and returns 0.
    pub fn cancel_all(&self, scope: &TimerScope) -> usize {
        let removed: Vec<TimerEntry> = {
            let mut registry = lock(&self.registry);
            let handles: Vec<TimerHandle> = registry
                .entries
                .iter()
                .filter(|(_, entry)| &entry.scope == scope)
                .map(|(handle, _)| *handle)
                .collect();
            handles
                .into_iter()
                .filter_map(|handle| registry.entries.remove(&handle))
                .collect()
        };

        for entry in &removed {
            entry.abort.abort();
        }
        if !removed.is_empty() {
            debug!(%scope, count = removed.len(), "scope timers cancelled");
        }
        removed.len()
    }

    /// Stop accepting work and cancel everything still registered.
    pub fn shutdown(&self) {
        let drained: Vec<TimerEntry> = {
            let mut registry = lock(&self.registry);
            registry.closed = true;
            registry.entries.drain().map(|(_, entry)| entry).collect()
        };
        for entry in &drained {
            entry.abort.abort();
        }
        debug!(cancelled = drained.len(), "timer service shut down");
    }

    /// Counters over the live registry.
    pub fn stats(&self) -> TimerStats {
        let registry = lock(&self.registry);
        let now = Instant::now();
        registry
            .entries
            .values()
            .fold(TimerStats::default(), |mut stats, entry| {
                match entry.kind {
                    TimerKind::Timeout => stats.timeouts += 1,
                    TimerKind::Interval => stats.intervals += 1,
                }
                let age = now.saturating_duration_since(entry.created_at);
                stats.oldest_age = Some(stats.oldest_age.map_or(age, |oldest| oldest.max(age)));
                stats
            })
    }

    /// Number of live registrations in `scope`.
    pub fn count_in(&self, scope: &TimerScope) -> usize {
        lock(&self.registry)
            .entries
            .values()
            .filter(|entry| &entry.scope == scope)
            .count()
    }

    fn allocate_handle(&self) -> TimerHandle {
        TimerHandle(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }
}

/// Cancels every timer of a scope when dropped, whichever way the owner exits.
pub struct ScopeGuard {
    timers: Arc<TimerService>,
    scope: TimerScope,
}

impl ScopeGuard {
    /// Guard `scope` on `timers`.
    pub fn new(timers: Arc<TimerService>, scope: TimerScope) -> Self {
        Self { timers, scope }
    }

    /// Scope released on drop.
    pub fn scope(&self) -> &TimerScope {
        &self.scope
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        self.timers.cancel_all(&self.scope);
    }
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Invoke a callback, containing any panic so the scheduler keeps running.
fn run_guarded<F: FnOnce()>(label: &'static str, handle: TimerHandle, callback: F) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(callback)) {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".into());
        error!(%handle, label, panic = %message, "scheduled callback panicked");
    }
}
