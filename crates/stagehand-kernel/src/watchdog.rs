//! Deadline supervision for blocking work.
//!
//! [`run_with_deadline`] runs a closure on its own thread and races it against
//! a timer.  The closure does not need to cooperate: if it blocks past its
//! deadline the caller gets [`Supervised::TimedOut`] and the thread is left
//! running detached.  Panics inside the closure are caught and reported.
//!
//! [`Deadline`] is the companion budget tracker used by polling loops that
//! must never sleep past their remaining time.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::warn;

// ────────────────────────────────────────────────────────────────────────────
// Public types
// ────────────────────────────────────────────────────────────────────────────

/// How a supervised closure ended.
#[derive(Debug, PartialEq, Eq)]
pub enum Supervised<T> {
    /// Returned before the deadline.
    Finished(T),
    /// Still running at the deadline; its thread was detached.
    TimedOut,
    /// Panicked (or could not be started); carries the panic message.
    Panicked(String),
}

// ────────────────────────────────────────────────────────────────────────────
// Supervisor
// ────────────────────────────────────────────────────────────────────────────

/// Run `f` on a dedicated thread named after `label`, waiting at most
/// `timeout` for it.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use stagehand_kernel::watchdog::{run_with_deadline, Supervised};
///
/// let fast = run_with_deadline("fast", Duration::from_secs(1), || 2 + 2);
/// assert_eq!(fast, Supervised::Finished(4));
///
/// let slow = run_with_deadline("slow", Duration::from_millis(20), || {
///     std::thread::sleep(Duration::from_millis(500));
/// });
/// assert_eq!(slow, Supervised::TimedOut);
/// ```
pub fn run_with_deadline<T, F>(label: &str, timeout: Duration, f: F) -> Supervised<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    // Capacity 1 so the worker's send never blocks once the receiver is gone.
    let (tx, rx) = mpsc::sync_channel(1);
    let spawned = thread::Builder::new()
        .name(format!("task-{label}"))
        .spawn(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(f));
            let _ = tx.send(outcome);
        });
    if let Err(e) = spawned {
        return Supervised::Panicked(format!("could not spawn supervised thread: {e}"));
    }

    match rx.recv_timeout(timeout) {
        Ok(Ok(value)) => Supervised::Finished(value),
        Ok(Err(payload)) => Supervised::Panicked(panic_message(payload.as_ref())),
        Err(RecvTimeoutError::Timeout) => {
            warn!(label, timeout_ms = timeout.as_millis() as u64, "deadline exceeded; detaching");
            Supervised::TimedOut
        }
        Err(RecvTimeoutError::Disconnected) => {
            Supervised::Panicked("supervised thread exited without a result".to_string())
        }
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Deadline
// ────────────────────────────────────────────────────────────────────────────

/// A fixed time budget started at construction.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.started.elapsed())
    }

    pub fn expired(&self) -> bool {
        self.started.elapsed() >= self.budget
    }

    /// Sleep for `step`, or only for what is left of the budget if shorter.
    pub fn sleep(&self, step: Duration) {
        let nap = step.min(self.remaining());
        if !nap.is_zero() {
            thread::sleep(nap);
        }
    }
}
