//! [`TaskQueue`] – single-flight, strictly serial task execution.
//!
//! Tasks are registered once at startup and never removed.  [`TaskQueue::exec`]
//! admits one run at a time: it queues every enabled task in registration
//! order and hands the queue to a fresh worker thread, which runs each
//! procedure under [`run_with_deadline`].
//!
//! Outcome policy per task:
//!
//! | Procedure result               | Status     | Rest of the run |
//! |--------------------------------|------------|-----------------|
//! | `Ok(TaskOutcome::Completed)`   | `SUCCESS`  | continues       |
//! | `Ok(TaskOutcome::Incomplete)`  | `FAILED`   | continues       |
//! | `Err(_)` or panic              | `FAILED`   | aborted         |
//! | deadline exceeded              | `CANCELED` | continues       |

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;
use stagehand_types::{StageError, TaskInfo, TaskStatus};
use tracing::{debug, error, info, warn};

use crate::watchdog::{run_with_deadline, Supervised};

/// Extra time granted to a retiring worker beyond its task deadline.
const HANDOVER_GRACE: Duration = Duration::from_millis(500);

/// What a procedure reports when it returns normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    /// The procedure gave up without an error (e.g. nothing to do on this
    /// screen).
    Incomplete,
}

/// A task body.  Receives the shared context the queue was started with.
pub type Procedure<C> = Arc<dyn Fn(&C) -> Result<TaskOutcome, StageError> + Send + Sync>;

/// Callback invoked on every task status change.
pub type StatusObserver = Arc<dyn Fn(&str, TaskStatus) + Send + Sync>;

struct TaskEntry<C> {
    info: TaskInfo,
    timeout: Duration,
    procedure: Procedure<C>,
}

#[derive(Default)]
struct RunState {
    active: bool,
    /// Bumped by every admission and every stop; a worker whose generation
    /// is stale stops draining.
    generation: u64,
    pending: VecDeque<String>,
    worker: Option<JoinHandle<()>>,
    /// Deadline of the task the current worker is executing.  Set in the same
    /// critical section that dequeues the task.
    current_deadline: Option<Instant>,
}

/// Registry of tasks plus the single-flight run state.
///
/// Lock order: `run` before `tasks`.
pub struct TaskQueue<C> {
    tasks: Mutex<Vec<TaskEntry<C>>>,
    run: Mutex<RunState>,
    idle: Condvar,
    observer: Mutex<Option<StatusObserver>>,
}

impl<C: Send + Sync + 'static> Default for TaskQueue<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Send + Sync + 'static> TaskQueue<C> {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(Vec::new()),
            run: Mutex::new(RunState::default()),
            idle: Condvar::new(),
            observer: Mutex::new(None),
        }
    }

    fn tasks(&self) -> MutexGuard<'_, Vec<TaskEntry<C>>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn run_state(&self) -> MutexGuard<'_, RunState> {
        self.run.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ── Registration ─────────────────────────────────────────────────────────

    /// Register a task, enabled and `PENDING`.
    ///
    /// # Errors
    ///
    /// [`StageError::DuplicateTask`] when `name` is already registered.
    pub fn register<F>(
        &self,
        name: &str,
        description: &str,
        timeout: Duration,
        procedure: F,
    ) -> Result<(), StageError>
    where
        F: Fn(&C) -> Result<TaskOutcome, StageError> + Send + Sync + 'static,
    {
        let mut tasks = self.tasks();
        if tasks.iter().any(|t| t.info.name == name) {
            return Err(StageError::DuplicateTask(name.to_string()));
        }
        tasks.push(TaskEntry {
            info: TaskInfo {
                name: name.to_string(),
                description: description.to_string(),
                enabled: true,
                status: TaskStatus::Pending,
                timeout_ms: timeout.as_millis() as u64,
                start_time: None,
                end_time: None,
                last_run_time: None,
            },
            timeout,
            procedure: Arc::new(procedure),
        });
        debug!(task = %name, "registered task");
        Ok(())
    }

    pub fn set_observer(&self, observer: StatusObserver) {
        *self.observer.lock().unwrap_or_else(|e| e.into_inner()) = Some(observer);
    }

    fn notify(&self, name: &str, status: TaskStatus) {
        let observer = self
            .observer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(observer) = observer {
            observer(name, status);
        }
    }

    // ── Enable / disable ─────────────────────────────────────────────────────

    /// Toggle a task's `enabled` flag.  Returns `false` for unknown names.
    /// Status history is left untouched.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        match self.tasks().iter_mut().find(|t| t.info.name == name) {
            Some(task) => {
                task.info.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn enable_task(&self, name: &str) -> bool {
        self.set_enabled(name, true)
    }

    pub fn disable_task(&self, name: &str) -> bool {
        self.set_enabled(name, false)
    }

    /// Read-only view of every task, in registration order.
    pub fn task_list(&self) -> Vec<TaskInfo> {
        self.tasks().iter().map(|t| t.info.clone()).collect()
    }

    // ── Run control ──────────────────────────────────────────────────────────

    pub fn is_running(&self) -> bool {
        self.run_state().active
    }

    /// Admit a run over every enabled task.
    ///
    /// Returns `false`, changing nothing, when a run is already active.
    pub fn exec(self: &Arc<Self>, ctx: Arc<C>) -> bool {
        let enabled: Vec<String> = self
            .tasks()
            .iter()
            .filter(|t| t.info.enabled)
            .map(|t| t.info.name.clone())
            .collect();

        let mut run = self.run_state();
        if run.active {
            debug!("task run already active; admission refused");
            return false;
        }
        run.active = true;
        run.generation += 1;
        let generation = run.generation;
        run.pending.clear();
        run.pending.extend(enabled);
        let previous = run.worker.take();
        let previous_deadline = run.current_deadline;
        info!(generation, queued = run.pending.len(), "task run admitted");

        let queue = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name("task-queue".to_string())
            .spawn(move || {
                if let Some(previous) = previous {
                    retire(previous, previous_deadline);
                }
                queue.drain(generation, &ctx);
            });
        match spawned {
            Ok(handle) => {
                run.worker = Some(handle);
                true
            }
            Err(e) => {
                error!(error = %e, "could not spawn task worker");
                run.active = false;
                run.pending.clear();
                self.idle.notify_all();
                false
            }
        }
    }

    /// Cancel the active run: pending tasks are dropped and the single-flight
    /// lock is released.  A task already executing is not interrupted.
    ///
    /// Returns whether a run was active.
    pub fn stop(&self) -> bool {
        let mut run = self.run_state();
        let was_active = run.active;
        run.pending.clear();
        if was_active {
            run.active = false;
            run.generation += 1;
            info!("task run stopped");
        }
        self.idle.notify_all();
        was_active
    }

    /// Block until no run is active or `timeout` elapses.  Returns `true`
    /// when idle.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        let run = self.run_state();
        let (run, _) = self
            .idle
            .wait_timeout_while(run, timeout, |r| r.active)
            .unwrap_or_else(|e| e.into_inner());
        !run.active
    }

    // ── Worker ───────────────────────────────────────────────────────────────

    fn drain(&self, generation: u64, ctx: &Arc<C>) {
        loop {
            let next = {
                let mut run = self.run_state();
                if run.generation != generation {
                    debug!(generation, "stale worker retiring");
                    return;
                }
                match run.pending.pop_front() {
                    Some(name) => {
                        run.current_deadline =
                            self.timeout_of(&name).map(|t| Instant::now() + t);
                        name
                    }
                    None => {
                        run.active = false;
                        run.current_deadline = None;
                        self.idle.notify_all();
                        info!(generation, "task run finished");
                        return;
                    }
                }
            };

            if self.run_one(&next, ctx) {
                let mut run = self.run_state();
                if run.generation == generation {
                    run.pending.clear();
                }
            }
        }
    }

    fn timeout_of(&self, name: &str) -> Option<Duration> {
        self.tasks()
            .iter()
            .find(|t| t.info.name == name)
            .map(|t| t.timeout)
    }

    /// Execute one task.  Returns `true` when the rest of the run must be
    /// aborted.
    fn run_one(&self, name: &str, ctx: &Arc<C>) -> bool {
        let (procedure, timeout) = {
            let mut tasks = self.tasks();
            let Some(task) = tasks.iter_mut().find(|t| t.info.name == name) else {
                return false;
            };
            let now = Utc::now();
            task.info.status = TaskStatus::Running;
            task.info.start_time = Some(now);
            task.info.last_run_time = Some(now);
            task.info.end_time = None;
            (Arc::clone(&task.procedure), task.timeout)
        };
        self.notify(name, TaskStatus::Running);
        info!(task = %name, timeout_ms = timeout.as_millis() as u64, "running task");

        let ctx = Arc::clone(ctx);
        let result = run_with_deadline(name, timeout, move || procedure(&ctx));
        let (status, abort) = match result {
            Supervised::Finished(Ok(TaskOutcome::Completed)) => {
                info!(task = %name, "task succeeded");
                (TaskStatus::Success, false)
            }
            Supervised::Finished(Ok(TaskOutcome::Incomplete)) => {
                warn!(task = %name, "task reported incomplete");
                (TaskStatus::Failed, false)
            }
            Supervised::Finished(Err(e)) => {
                error!(task = %name, error = %e, "task failed; aborting run");
                (TaskStatus::Failed, true)
            }
            Supervised::Panicked(msg) => {
                error!(task = %name, panic = %msg, "task panicked; aborting run");
                (TaskStatus::Failed, true)
            }
            Supervised::TimedOut => {
                warn!(task = %name, "task exceeded its timeout; canceled");
                (TaskStatus::Canceled, false)
            }
        };

        if let Some(task) = self.tasks().iter_mut().find(|t| t.info.name == name) {
            task.info.status = status;
            task.info.end_time = Some(Utc::now());
        }
        self.notify(name, status);
        abort
    }
}

/// Wait for a previous worker to finish its in-flight task, but never past
/// that task's deadline plus a grace period.  A worker still busy after that
/// is left detached.
fn retire(previous: JoinHandle<()>, deadline: Option<Instant>) {
    let limit = deadline.unwrap_or_else(Instant::now) + HANDOVER_GRACE;
    while !previous.is_finished() && Instant::now() < limit {
        thread::sleep(Duration::from_millis(10));
    }
    if previous.is_finished() {
        let _ = previous.join();
    } else {
        warn!("previous task worker still busy; detaching");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Ctx {
        calls: Mutex<Vec<String>>,
    }

    impl Ctx {
        fn record(&self, name: &str) {
            self.calls.lock().unwrap().push(name.to_string());
        }
    }

    fn queue() -> Arc<TaskQueue<Ctx>> {
        Arc::new(TaskQueue::new())
    }

    fn status_of(q: &TaskQueue<Ctx>, name: &str) -> TaskStatus {
        q.task_list().into_iter().find(|t| t.name == name).unwrap().status
    }

    fn statuses(q: &TaskQueue<Ctx>) -> Vec<TaskStatus> {
        q.task_list().into_iter().map(|t| t.status).collect()
    }

    fn sleeper(ms: u64, outcome: TaskOutcome) -> impl Fn(&Ctx) -> Result<TaskOutcome, StageError> {
        move |_| {
            thread::sleep(Duration::from_millis(ms));
            Ok(outcome)
        }
    }

    fn wait_for(q: &TaskQueue<Ctx>, name: &str, status: TaskStatus) {
        let started = Instant::now();
        while status_of(q, name) != status {
            assert!(started.elapsed() < Duration::from_secs(5), "{name} never reached {status:?}");
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let q = queue();
        q.register("a", "", Duration::from_secs(1), sleeper(0, TaskOutcome::Completed))
            .unwrap();
        let err = q
            .register("a", "", Duration::from_secs(1), sleeper(0, TaskOutcome::Completed))
            .unwrap_err();
        assert_eq!(err, StageError::DuplicateTask("a".to_string()));
        assert_eq!(q.task_list().len(), 1);
    }

    #[test]
    fn second_exec_is_refused_while_running() {
        let q = queue();
        q.register("a", "first", Duration::from_secs(5), sleeper(150, TaskOutcome::Completed))
            .unwrap();
        q.register("b", "second", Duration::from_secs(5), sleeper(10, TaskOutcome::Completed))
            .unwrap();
        let ctx = Arc::new(Ctx::default());

        assert!(q.exec(Arc::clone(&ctx)));
        assert!(!q.exec(Arc::clone(&ctx)));
        assert!(q.is_running());

        assert!(q.wait_until_idle(Duration::from_secs(5)));
        assert_eq!(statuses(&q), vec![TaskStatus::Success, TaskStatus::Success]);
    }

    #[test]
    fn tasks_run_in_order_without_overlap() {
        let q = queue();
        for name in ["a", "b", "c"] {
            q.register(name, "", Duration::from_secs(5), move |ctx: &Ctx| {
                ctx.record(name);
                thread::sleep(Duration::from_millis(30));
                Ok(TaskOutcome::Completed)
            })
            .unwrap();
        }
        let ctx = Arc::new(Ctx::default());
        assert!(q.exec(Arc::clone(&ctx)));
        assert!(q.wait_until_idle(Duration::from_secs(5)));

        assert_eq!(*ctx.calls.lock().unwrap(), vec!["a", "b", "c"]);
        let list = q.task_list();
        for pair in list.windows(2) {
            assert!(pair[1].start_time.unwrap() >= pair[0].end_time.unwrap());
        }
    }

    #[test]
    fn error_aborts_remaining_queue() {
        let q = queue();
        q.register("a", "", Duration::from_secs(1), |_: &Ctx| {
            Err(StageError::Precondition("not on the home screen".to_string()))
        })
        .unwrap();
        q.register("b", "", Duration::from_secs(1), sleeper(0, TaskOutcome::Completed))
            .unwrap();
        q.register("c", "", Duration::from_secs(1), sleeper(0, TaskOutcome::Completed))
            .unwrap();

        assert!(q.exec(Arc::new(Ctx::default())));
        assert!(q.wait_until_idle(Duration::from_secs(5)));
        assert_eq!(
            statuses(&q),
            vec![TaskStatus::Failed, TaskStatus::Pending, TaskStatus::Pending]
        );
        let list = q.task_list();
        assert!(list[0].end_time.is_some());
        assert!(list[1].start_time.is_none());
    }

    #[test]
    fn panic_aborts_remaining_queue() {
        let q = queue();
        q.register("a", "", Duration::from_secs(1), |_: &Ctx| -> Result<TaskOutcome, StageError> {
            panic!("scripted failure")
        })
        .unwrap();
        q.register("b", "", Duration::from_secs(1), sleeper(0, TaskOutcome::Completed))
            .unwrap();

        assert!(q.exec(Arc::new(Ctx::default())));
        assert!(q.wait_until_idle(Duration::from_secs(5)));
        assert_eq!(statuses(&q), vec![TaskStatus::Failed, TaskStatus::Pending]);
    }

    #[test]
    fn incomplete_fails_but_run_continues() {
        let q = queue();
        q.register("a", "", Duration::from_secs(1), sleeper(0, TaskOutcome::Incomplete))
            .unwrap();
        q.register("b", "", Duration::from_secs(1), sleeper(0, TaskOutcome::Completed))
            .unwrap();

        assert!(q.exec(Arc::new(Ctx::default())));
        assert!(q.wait_until_idle(Duration::from_secs(5)));
        assert_eq!(statuses(&q), vec![TaskStatus::Failed, TaskStatus::Success]);
    }

    #[test]
    fn timeout_cancels_task_and_frees_worker() {
        let q = queue();
        q.register("slow", "", Duration::from_millis(100), sleeper(3_000, TaskOutcome::Completed))
            .unwrap();
        q.register("next", "", Duration::from_secs(1), sleeper(0, TaskOutcome::Completed))
            .unwrap();

        let started = Instant::now();
        assert!(q.exec(Arc::new(Ctx::default())));
        assert!(q.wait_until_idle(Duration::from_secs(5)));
        assert!(started.elapsed() < Duration::from_millis(1_500));
        assert_eq!(statuses(&q), vec![TaskStatus::Canceled, TaskStatus::Success]);
    }

    #[test]
    fn stop_drops_pending_but_not_current() {
        let q = queue();
        q.register("a", "", Duration::from_secs(5), sleeper(200, TaskOutcome::Completed))
            .unwrap();
        q.register("b", "", Duration::from_secs(5), sleeper(0, TaskOutcome::Completed))
            .unwrap();

        assert!(q.exec(Arc::new(Ctx::default())));
        wait_for(&q, "a", TaskStatus::Running);
        assert!(q.stop());
        assert!(!q.is_running());
        assert!(!q.stop());

        wait_for(&q, "a", TaskStatus::Success);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(status_of(&q, "b"), TaskStatus::Pending);
    }

    #[test]
    fn readmission_waits_for_previous_worker() {
        let q = queue();
        q.register("a", "", Duration::from_secs(5), sleeper(200, TaskOutcome::Completed))
            .unwrap();
        let ctx = Arc::new(Ctx::default());

        assert!(q.exec(Arc::clone(&ctx)));
        wait_for(&q, "a", TaskStatus::Running);
        let first_start = q.task_list()[0].start_time.unwrap();
        assert!(q.stop());
        assert!(q.exec(Arc::clone(&ctx)));
        assert!(q.wait_until_idle(Duration::from_secs(5)));

        let info = &q.task_list()[0];
        assert_eq!(info.status, TaskStatus::Success);
        let second_start = info.start_time.unwrap();
        assert!(second_start >= first_start + chrono::Duration::milliseconds(200));
    }

    #[test]
    fn rapid_restarts_never_run_two_procedures_at_once() {
        let q = queue();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (r, p) = (Arc::clone(&running), Arc::clone(&peak));
        q.register("slow", "", Duration::from_secs(5), move |_: &Ctx| {
            let now = r.fetch_add(1, Ordering::SeqCst) + 1;
            p.fetch_max(now, Ordering::SeqCst);
            // Longer than the handover grace period.
            thread::sleep(Duration::from_millis(600));
            r.fetch_sub(1, Ordering::SeqCst);
            Ok(TaskOutcome::Completed)
        })
        .unwrap();
        let ctx = Arc::new(Ctx::default());

        for _ in 0..4 {
            assert!(q.exec(Arc::clone(&ctx)));
            q.stop();
        }
        assert!(q.exec(Arc::clone(&ctx)));
        assert!(q.wait_until_idle(Duration::from_secs(10)));

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(running.load(Ordering::SeqCst), 0);
        assert_eq!(status_of(&q, "slow"), TaskStatus::Success);
    }

    #[test]
    fn disabled_tasks_are_skipped_and_keep_history() {
        let q = queue();
        q.register("a", "", Duration::from_secs(1), sleeper(0, TaskOutcome::Completed))
            .unwrap();
        q.register("b", "", Duration::from_secs(1), sleeper(0, TaskOutcome::Completed))
            .unwrap();

        assert!(q.exec(Arc::new(Ctx::default())));
        assert!(q.wait_until_idle(Duration::from_secs(5)));
        assert!(q.disable_task("b"));
        assert!(!q.disable_task("missing"));
        assert_eq!(status_of(&q, "b"), TaskStatus::Success);

        let b_end = q.task_list()[1].end_time;
        assert!(q.exec(Arc::new(Ctx::default())));
        assert!(q.wait_until_idle(Duration::from_secs(5)));
        assert_eq!(q.task_list()[1].end_time, b_end);
        assert!(!q.task_list()[1].enabled);
        assert!(q.enable_task("b"));
    }

    #[test]
    fn observer_sees_every_transition() {
        let q = queue();
        q.register("a", "", Duration::from_secs(1), sleeper(0, TaskOutcome::Completed))
            .unwrap();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        q.set_observer(Arc::new(move |name, status| {
            assert_eq!(name, "a");
            assert!(matches!(status, TaskStatus::Running | TaskStatus::Success));
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(q.exec(Arc::new(Ctx::default())));
        assert!(q.wait_until_idle(Duration::from_secs(5)));
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn empty_run_finishes_immediately() {
        let q = queue();
        assert!(q.exec(Arc::new(Ctx::default())));
        assert!(q.wait_until_idle(Duration::from_secs(1)));
        assert!(q.task_list().is_empty());
    }
}
