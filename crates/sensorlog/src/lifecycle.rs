// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Run state and cooperative stop signalling shared by the worker units.
//!
//! Both the acquirer and the sampler follow the same one-way state machine:
//!
//! ```text
//! Idle --start()--> Running --(stop / source closed / fatal error)--> Stopped
//! ```
//!
//! Cancellation is not preemptive. A stop request only sets a flag (and wakes
//! a sleeping sampler); each unit observes it at its own checkpoint.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Lifecycle state of a worker unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RunState {
    /// Created, not started yet.
    Idle = 0,
    /// Worker thread is running.
    Running = 1,
    /// Worker thread has exited (or was never able to start).
    Stopped = 2,
}

impl RunState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Running,
            _ => Self::Stopped,
        }
    }

    /// Get state name as string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Atomic holder for a [`RunState`], shareable between threads.
#[derive(Debug, Clone)]
pub struct StateCell {
    state: Arc<AtomicU8>,
}

impl StateCell {
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(RunState::Idle as u8)),
        }
    }

    pub fn get(&self) -> RunState {
        RunState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move `Idle -> Running`. Returns false if the unit was already started.
    pub fn begin(&self) -> bool {
        self.state
            .compare_exchange(
                RunState::Idle as u8,
                RunState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Move to `Stopped` from any state. Stopped is terminal.
    pub fn finish(&self) {
        self.state.store(RunState::Stopped as u8, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.get() == RunState::Running
    }

    /// Read-only view for other threads.
    pub fn status(&self) -> RunStatus {
        RunStatus { cell: self.clone() }
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer of another unit's [`RunState`]. Cannot change it.
#[derive(Debug, Clone)]
pub struct RunStatus {
    cell: StateCell,
}

impl RunStatus {
    pub fn get(&self) -> RunState {
        self.cell.get()
    }

    pub fn is_running(&self) -> bool {
        self.cell.is_running()
    }
}

/// Hook run on a worker thread after its loop has exited.
pub(crate) type ExitHook = Box<dyn FnOnce() + Send>;

/// Fires a unit's exit hook and marks it stopped, also when unwinding.
///
/// The hook runs first, so an observer notified by it is told before any
/// peer can see the `Stopped` state.
pub(crate) struct ExitGuard {
    state: StateCell,
    hook: Option<ExitHook>,
}

impl ExitGuard {
    pub(crate) fn new(state: StateCell, hook: Option<ExitHook>) -> Self {
        Self { state, hook }
    }
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        if let Some(hook) = self.hook.take() {
            hook();
        }
        self.state.finish();
    }
}

/// Cooperative stop flag with an interruptible sleep.
///
/// Cloning yields another handle to the same signal.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    inner: Arc<StopInner>,
}

#[derive(Debug, Default)]
struct StopInner {
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop and wake any thread parked in [`StopSignal::wait_timeout`].
    pub fn stop(&self) {
        let mut stopped = self.inner.stopped.lock();
        *stopped = true;
        self.inner.wake.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        *self.inner.stopped.lock()
    }

    /// Sleep for `timeout` unless a stop is requested first.
    ///
    /// Returns `true` if the signal is stopped on wake-up.
    /// A timeout too large to express as a deadline waits for the stop only.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut stopped = self.inner.stopped.lock();
        while !*stopped {
            match deadline {
                Some(deadline) => {
                    if self.inner.wake.wait_until(&mut stopped, deadline).timed_out() {
                        break;
                    }
                }
                None => self.inner.wake.wait(&mut stopped),
            }
        }
        *stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions_are_one_way() {
        let cell = StateCell::new();
        assert_eq!(cell.get(), RunState::Idle);

        assert!(cell.begin());
        assert!(cell.is_running());
        assert!(!cell.begin());

        cell.finish();
        assert_eq!(cell.get(), RunState::Stopped);
        assert!(!cell.begin());
    }

    #[test]
    fn test_status_follows_cell() {
        let cell = StateCell::new();
        let status = cell.status();
        assert_eq!(status.get(), RunState::Idle);

        cell.begin();
        assert!(status.is_running());
        cell.finish();
        assert_eq!(status.get(), RunState::Stopped);
    }

    #[test]
    fn test_wait_timeout_elapses() {
        let signal = StopSignal::new();
        let start = Instant::now();
        assert!(!signal.wait_timeout(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_stop_wakes_waiter() {
        let signal = StopSignal::new();
        let remote = signal.clone();

        let waiter = std::thread::spawn(move || {
            let start = Instant::now();
            let stopped = remote.wait_timeout(Duration::from_secs(30));
            (stopped, start.elapsed())
        });

        std::thread::sleep(Duration::from_millis(20));
        signal.stop();

        let (stopped, elapsed) = waiter.join().unwrap();
        assert!(stopped);
        assert!(elapsed < Duration::from_secs(30));
        assert!(signal.is_stopped());
    }

    #[test]
    fn test_unbounded_wait_ends_on_stop() {
        let signal = StopSignal::new();
        let remote = signal.clone();

        let waiter = std::thread::spawn(move || remote.wait_timeout(Duration::from_secs(u64::MAX)));

        std::thread::sleep(Duration::from_millis(20));
        signal.stop();
        assert!(waiter.join().unwrap());
    }
}
