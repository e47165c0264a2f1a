//! `stagehand-kernel` – Task Execution
//!
//! Runs scripted procedures one at a time and makes sure none of them can
//! hold the system hostage.
//!
//! # Modules
//!
//! - [`task_queue`] – [`TaskQueue`][task_queue::TaskQueue]: the task
//!   registry plus single-flight, strictly serial execution of every enabled
//!   task, with per-task status and timestamps.
//! - [`watchdog`] – [`run_with_deadline`][watchdog::run_with_deadline]:
//!   runs a blocking closure against a deadline and catches its panics;
//!   [`Deadline`][watchdog::Deadline] is the budget tracker used by polling
//!   waits.

pub mod task_queue;
pub mod watchdog;

pub use task_queue::{Procedure, StatusObserver, TaskOutcome, TaskQueue};
pub use watchdog::{run_with_deadline, Deadline, Supervised};
