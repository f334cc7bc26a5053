//! Scheduler loop

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::server::shutdown::Shutdown;

use super::task::{ScheduledTask, SchedulerError, TaskFn, TaskFuture, TaskId};

/// How long the loop sleeps when the table is empty or all tasks disabled
const IDLE_TICK: Duration = Duration::from_millis(500);

/// Bounded periodic-task runner
///
/// Registration can happen from any thread; the loop itself runs in one
/// worker (see [`Scheduler::run`]).
pub struct Scheduler {
    tasks: Mutex<Vec<ScheduledTask>>,
    max_tasks: usize,
    task_slice: Duration,
    next_id: Mutex<usize>,
}

impl Scheduler {
    /// Create a scheduler bounded at `max_tasks`, with `task_slice` as the
    /// longest time the loop waits on one task before detaching it
    pub fn new(max_tasks: usize, task_slice: Duration) -> Self {
        Self {
            tasks: Mutex::new(Vec::new()),
            max_tasks,
            task_slice,
            next_id: Mutex::new(0),
        }
    }

    /// Register a periodic task
    ///
    /// The first run happens one `interval` after registration. Overflow of
    /// the task table is an explicit rejection.
    pub fn add<F>(
        &self,
        name: impl Into<String>,
        interval: Duration,
        callback: F,
    ) -> Result<TaskId, SchedulerError>
    where
        F: Fn() -> TaskFuture + Send + Sync + 'static,
    {
        let mut tasks = lock(&self.tasks);
        if tasks.len() >= self.max_tasks {
            return Err(SchedulerError::LimitReached {
                max_tasks: self.max_tasks,
            });
        }

        let id = {
            let mut next = lock(&self.next_id);
            let id = TaskId(*next);
            *next += 1;
            id
        };
        let name = name.into();
        tracing::debug!(task = %name, interval_ms = interval.as_millis() as u64, "Task registered");
        tasks.push(ScheduledTask::new(
            id,
            name,
            interval,
            Arc::new(callback) as TaskFn,
            Instant::now(),
        ));
        Ok(id)
    }

    /// Enable or disable a task
    pub fn set_enabled(&self, id: TaskId, enabled: bool) -> Result<(), SchedulerError> {
        let mut tasks = lock(&self.tasks);
        match tasks.iter_mut().find(|t| t.id == id) {
            Some(task) => {
                task.enabled = enabled;
                Ok(())
            }
            None => Err(SchedulerError::UnknownTask(id)),
        }
    }

    /// Number of registered tasks
    pub fn len(&self) -> usize {
        lock(&self.tasks).len()
    }

    /// True when the table is empty
    pub fn is_empty(&self) -> bool {
        lock(&self.tasks).is_empty()
    }

    /// Drive the task table until shutdown
    ///
    /// Each cycle: find the earliest due enabled task, sleep until it is due
    /// or shutdown wakes the loop, then run it on a spawned worker awaited
    /// for at most the task slice. An overrun is detached and logged; a task
    /// error is logged; the task is rescheduled in every case.
    pub async fn run(self: Arc<Self>, shutdown: Shutdown) {
        tracing::info!(tasks = self.len(), "Scheduler loop started");

        while !shutdown.is_triggered() {
            let due = self.earliest_due();

            let wake_at = match due {
                Some((_, next_run)) => next_run,
                None => Instant::now() + IDLE_TICK,
            };

            tokio::select! {
                _ = tokio::time::sleep_until(tokio::time::Instant::from_std(wake_at)) => {}
                _ = shutdown.wait() => break,
            }

            if let Some((id, _)) = due {
                self.run_due_task(id).await;
            }
        }

        tracing::info!("Scheduler loop stopped");
    }

    /// Run one due task immediately, outside the normal cadence
    ///
    /// Used by the reload signal to force an ACL refresh.
    pub async fn run_now(&self, id: TaskId) -> Result<(), SchedulerError> {
        let runner = {
            let tasks = lock(&self.tasks);
            match tasks.iter().find(|t| t.id == id) {
                Some(task) => (task.name.clone(), Arc::clone(&task.run)),
                None => return Err(SchedulerError::UnknownTask(id)),
            }
        };
        self.execute(runner.0, runner.1).await;
        Ok(())
    }

    fn earliest_due(&self) -> Option<(TaskId, Instant)> {
        let tasks = lock(&self.tasks);
        tasks
            .iter()
            .filter(|t| t.enabled)
            .min_by_key(|t| t.next_run)
            .map(|t| (t.id, t.next_run))
    }

    async fn run_due_task(&self, id: TaskId) {
        // Reschedule before executing so an overrun cannot pile up runs
        let runner = {
            let mut tasks = lock(&self.tasks);
            match tasks.iter_mut().find(|t| t.id == id) {
                Some(task) if task.enabled && task.next_run <= Instant::now() => {
                    task.next_run = Instant::now() + task.interval;
                    Some((task.name.clone(), Arc::clone(&task.run)))
                }
                _ => None,
            }
        };

        if let Some((name, run)) = runner {
            self.execute(name, run).await;
        }
    }

    async fn execute(&self, name: String, run: TaskFn) {
        let future = run();
        let handle = tokio::spawn(future);

        match tokio::time::timeout(self.task_slice, handle).await {
            Ok(Ok(Ok(()))) => {
                tracing::trace!(task = %name, "Task completed");
            }
            Ok(Ok(Err(e))) => {
                // Isolated: logged, skipped for this cycle, rescheduled
                tracing::warn!(task = %name, error = %e, "Task failed, will retry next interval");
            }
            Ok(Err(join_err)) => {
                tracing::error!(task = %name, error = %join_err, "Task panicked, will retry next interval");
            }
            Err(_) => {
                // Task keeps running detached; completion is asynchronous
                tracing::warn!(
                    task = %name,
                    slice_ms = self.task_slice.as_millis() as u64,
                    "Task exceeded its slice, detached"
                );
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::TaskError;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn counting_task(counter: Arc<AtomicU64>) -> impl Fn() -> TaskFuture + Send + Sync {
        move || {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::Relaxed);
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn capacity_is_enforced() {
        let sched = Scheduler::new(2, Duration::from_secs(1));
        let counter = Arc::new(AtomicU64::new(0));

        sched
            .add("a", Duration::from_secs(10), counting_task(Arc::clone(&counter)))
            .unwrap();
        sched
            .add("b", Duration::from_secs(10), counting_task(Arc::clone(&counter)))
            .unwrap();
        let third = sched.add("c", Duration::from_secs(10), counting_task(counter));
        assert_eq!(
            third.unwrap_err(),
            SchedulerError::LimitReached { max_tasks: 2 }
        );
        assert_eq!(sched.len(), 2);
    }

    #[tokio::test]
    async fn due_task_runs_and_reschedules() {
        let sched = Arc::new(Scheduler::new(4, Duration::from_secs(1)));
        let counter = Arc::new(AtomicU64::new(0));
        sched
            .add("tick", Duration::from_millis(20), counting_task(Arc::clone(&counter)))
            .unwrap();

        let shutdown = Shutdown::new();
        let loop_handle = tokio::spawn(Arc::clone(&sched).run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(120)).await;
        shutdown.trigger();
        loop_handle.await.unwrap();

        let runs = counter.load(Ordering::Relaxed);
        assert!(runs >= 2, "expected repeated runs, got {}", runs);
    }

    #[tokio::test]
    async fn failing_task_does_not_halt_the_loop() {
        let sched = Arc::new(Scheduler::new(4, Duration::from_secs(1)));
        let counter = Arc::new(AtomicU64::new(0));

        sched
            .add("faulty", Duration::from_millis(15), || {
                Box::pin(async { Err::<(), TaskError>("synthetic failure".into()) })
            })
            .unwrap();
        sched
            .add("healthy", Duration::from_millis(15), counting_task(Arc::clone(&counter)))
            .unwrap();

        let shutdown = Shutdown::new();
        let loop_handle = tokio::spawn(Arc::clone(&sched).run(shutdown.clone()));
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.trigger();
        loop_handle.await.unwrap();

        assert!(
            counter.load(Ordering::Relaxed) >= 2,
            "healthy task must keep running alongside the failing one"
        );
    }

    #[tokio::test]
    async fn overrunning_task_is_detached() {
        let sched = Arc::new(Scheduler::new(4, Duration::from_millis(30)));
        let counter = Arc::new(AtomicU64::new(0));

        sched
            .add("slow", Duration::from_millis(10), || {
                Box::pin(async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(())
                })
            })
            .unwrap();
        sched
            .add("fast", Duration::from_millis(10), counting_task(Arc::clone(&counter)))
            .unwrap();

        let shutdown = Shutdown::new();
        let loop_handle = tokio::spawn(Arc::clone(&sched).run(shutdown.clone()));
        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown.trigger();
        loop_handle.await.unwrap();

        assert!(
            counter.load(Ordering::Relaxed) >= 1,
            "slow task must not starve the loop"
        );
    }

    #[tokio::test]
    async fn disabled_task_is_skipped() {
        let sched = Arc::new(Scheduler::new(4, Duration::from_secs(1)));
        let counter = Arc::new(AtomicU64::new(0));
        let id = sched
            .add("tick", Duration::from_millis(10), counting_task(Arc::clone(&counter)))
            .unwrap();
        sched.set_enabled(id, false).unwrap();

        let shutdown = Shutdown::new();
        let loop_handle = tokio::spawn(Arc::clone(&sched).run(shutdown.clone()));
        tokio::time::sleep(Duration::from_millis(60)).await;
        shutdown.trigger();
        loop_handle.await.unwrap();

        assert_eq!(counter.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn run_now_executes_out_of_cycle() {
        let sched = Scheduler::new(4, Duration::from_secs(1));
        let counter = Arc::new(AtomicU64::new(0));
        let id = sched
            .add("reload", Duration::from_secs(3600), counting_task(Arc::clone(&counter)))
            .unwrap();

        sched.run_now(id).await.unwrap();
        assert_eq!(counter.load(Ordering::Relaxed), 1);

        let unknown = sched.run_now(TaskId(999)).await;
        assert_eq!(unknown.unwrap_err(), SchedulerError::UnknownTask(TaskId(999)));
    }
}
