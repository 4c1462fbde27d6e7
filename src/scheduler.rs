//! Bounded-concurrency job queue with a per-slot soft timeout.
//!
//! A [`TaskScheduler`] owns `N` slots. A submitted job waits (FIFO) for a
//! slot, is spawned onto the runtime with a single-shot [`Completion`], and
//! holds its slot until it resolves the completion or the scheduler's
//! timeout `D` elapses, whichever comes first.
//!
//! The timeout is soft: the job task keeps running after it expires and
//! nothing is killed. Its late `resolve` lands on a closed channel and is a
//! no-op, so callers only ever observe the first outcome.
//!
//! ```text
//! submit ──▶ wait for slot (FIFO) ──▶ spawn job ──┬─▶ resolve()  → Ok(value)
//!                                                 └─▶ D elapsed  → on_timeout()
//! ```

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{oneshot, Semaphore};
use tracing::{debug, warn};

use crate::config::SchedulerConfig;

/// Why a job produced no value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("{scheduler} job timed out after {timeout:?}")]
    TimedOut {
        scheduler: &'static str,
        timeout: Duration,
    },
    #[error("{scheduler} job finished without signalling completion")]
    Abandoned { scheduler: &'static str },
}

/// Single-shot completion signal handed to a job.
///
/// Cloneable; the first [`resolve`](Completion::resolve) wins and every
/// later call, including one arriving after the scheduler gave up on the
/// job, does nothing.
pub struct Completion<T> {
    sender: Arc<Mutex<Option<oneshot::Sender<T>>>>,
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self {
            sender: Arc::clone(&self.sender),
        }
    }
}

impl<T> Completion<T> {
    fn new(sender: oneshot::Sender<T>) -> Self {
        Self {
            sender: Arc::new(Mutex::new(Some(sender))),
        }
    }

    /// Deliver `value`. Returns `true` only if it reached a waiting caller.
    pub fn resolve(&self, value: T) -> bool {
        let sender = match self.sender.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match sender {
            Some(tx) => tx.send(value).is_ok(),
            None => false,
        }
    }
}

/// Bounded job queue; one instance per category of external work.
#[derive(Clone)]
pub struct TaskScheduler {
    name: &'static str,
    slots: Arc<Semaphore>,
    capacity: usize,
    timeout: Duration,
}

impl TaskScheduler {
    pub fn new(name: &'static str, concurrency: usize, timeout: Duration) -> Self {
        let capacity = concurrency.max(1);
        Self {
            name,
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
            timeout,
        }
    }

    pub fn from_config(name: &'static str, config: &SchedulerConfig) -> Self {
        Self::new(name, config.concurrency, config.timeout())
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Jobs currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.capacity - self.slots.available_permits()
    }

    /// Run `job` in a slot. On timeout or abandonment, logs and returns
    /// `on_timeout()` instead; the failure is never raised to the caller.
    pub async fn submit<T, J, Fut, D>(&self, job: J, on_timeout: D) -> T
    where
        T: Send + 'static,
        J: FnOnce(Completion<T>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
        D: FnOnce() -> T,
    {
        match self.try_submit(job).await {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "falling back to default result");
                on_timeout()
            }
        }
    }

    /// Like [`submit`](Self::submit) but reports the failure instead of
    /// substituting a default.
    pub async fn try_submit<T, J, Fut>(&self, job: J) -> Result<T, TaskError>
    where
        T: Send + 'static,
        J: FnOnce(Completion<T>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let _permit = self
            .slots
            .acquire()
            .await
            .map_err(|_| TaskError::Abandoned {
                scheduler: self.name,
            })?;

        let (tx, rx) = oneshot::channel();
        tokio::spawn(job(Completion::new(tx)));
        debug!(scheduler = self.name, in_flight = self.in_flight(), "job started");

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(TaskError::Abandoned {
                scheduler: self.name,
            }),
            Err(_) => Err(TaskError::TimedOut {
                scheduler: self.name,
                timeout: self.timeout,
            }),
        }
    }

    /// Run a future in a slot, resolving with its output.
    pub async fn run<T, Fut>(&self, fut: Fut) -> Result<T, TaskError>
    where
        T: Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        self.try_submit(|done| async move {
            done.resolve(fut.await);
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::{sleep, Instant};

    #[tokio::test(start_paused = true)]
    async fn test_never_exceeds_concurrency() {
        let scheduler = TaskScheduler::new("test", 2, Duration::from_secs(60));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let jobs = (0..6u64).map(|i| {
            let scheduler = scheduler.clone();
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            async move {
                scheduler
                    .run(async move {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        sleep(Duration::from_millis(100 + i * 10)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                        i
                    })
                    .await
            }
        });

        let results = futures::future::join_all(jobs).await;
        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires_once_and_frees_slot() {
        let scheduler = TaskScheduler::new("test", 1, Duration::from_secs(5));
        let timeouts = Arc::new(AtomicUsize::new(0));
        let start = Instant::now();

        let stuck = {
            let timeouts = Arc::clone(&timeouts);
            scheduler.submit(
                |done: Completion<Vec<String>>| async move {
                    let _held = done;
                    std::future::pending::<()>().await
                },
                move || {
                    timeouts.fetch_add(1, Ordering::SeqCst);
                    Vec::new()
                },
            )
        };
        let next = scheduler.run(async { "next" });

        let (stuck, next) = tokio::join!(stuck, next);
        assert!(stuck.is_empty());
        assert_eq!(next, Ok("next"));
        assert_eq!(timeouts.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert!(start.elapsed() < Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_completion_is_ignored() {
        let scheduler = TaskScheduler::new("test", 1, Duration::from_secs(1));
        let late = Arc::new(Mutex::new(None));

        let outcome = {
            let late = Arc::clone(&late);
            scheduler
                .try_submit(move |done: Completion<u32>| async move {
                    sleep(Duration::from_secs(3)).await;
                    *late.lock().unwrap() = Some(done.resolve(7));
                })
                .await
        };
        assert!(matches!(outcome, Err(TaskError::TimedOut { .. })));

        sleep(Duration::from_secs(5)).await;
        assert_eq!(*late.lock().unwrap(), Some(false));
    }

    #[tokio::test]
    async fn test_first_resolution_wins() {
        let scheduler = TaskScheduler::new("test", 1, Duration::from_secs(1));
        let value = scheduler
            .try_submit(|done: Completion<&'static str>| async move {
                let again = done.clone();
                done.resolve("first");
                assert!(!again.resolve("second"));
            })
            .await;
        assert_eq!(value, Ok("first"));
    }

    #[tokio::test]
    async fn test_dropped_completion_is_abandoned() {
        let scheduler = TaskScheduler::new("test", 1, Duration::from_secs(1));
        let outcome = scheduler
            .try_submit(|done: Completion<u8>| async move {
                drop(done);
            })
            .await;
        assert!(matches!(outcome, Err(TaskError::Abandoned { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_jobs_are_admitted_in_submission_order() {
        let scheduler = TaskScheduler::new("test", 1, Duration::from_secs(60));
        let order = Arc::new(Mutex::new(Vec::new()));

        let jobs = (0..4).map(|i| {
            let scheduler = scheduler.clone();
            let order = Arc::clone(&order);
            async move {
                scheduler
                    .run(async move {
                        order.lock().unwrap().push(i);
                        sleep(Duration::from_millis(10)).await;
                    })
                    .await
            }
        });
        futures::future::join_all(jobs).await;

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    }
}
