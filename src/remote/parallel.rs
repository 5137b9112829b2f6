//! Bounded-concurrency task runner
//!
//! Tasks run on the tokio runtime, at most `max_workers` at a time. Each task
//! outcome, success or error, is delivered once through [`ParallelRunner::read`]
//! in completion order. Only a panicking task or cancellation aborts the run.
//!
//! There is no separate completion channel: `read` returning `None` is the
//! signal that the run is over, so consumers drain with
//! `while let Some(outcome) = runner.read().await`.

use crate::error::RunnerError;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

const FALLBACK_PARALLELISM: usize = 4;

pub struct ParallelRunner<T, E> {
    token: CancellationToken,
    permits: Arc<Semaphore>,
    tx: mpsc::UnboundedSender<Result<T, E>>,
    rx: mpsc::UnboundedReceiver<Result<T, E>>,
    submitted: usize,
    delivered: usize,
    fatal: Arc<Mutex<Option<RunnerError>>>,
}

impl<T, E> ParallelRunner<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Runner bound to a child of `token`
    pub fn new(token: &CancellationToken, max_workers: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            token: token.child_token(),
            permits: Arc::new(Semaphore::new(max_workers.max(1))),
            tx,
            rx,
            submitted: 0,
            delivered: 0,
            fatal: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_default_parallelism(token: &CancellationToken) -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(FALLBACK_PARALLELISM);
        Self::new(token, workers)
    }

    /// Schedule one task. Nothing is scheduled once the run is cancelled.
    pub fn run<F>(&mut self, task: F)
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
    {
        if self.token.is_cancelled() {
            tracing::debug!("Runner cancelled, not scheduling new task");
            record(&self.fatal, RunnerError::Cancelled);
            return;
        }

        self.submitted += 1;
        let token = self.token.clone();
        let permits = self.permits.clone();
        let tx = self.tx.clone();
        let fatal = self.fatal.clone();

        tokio::spawn(async move {
            let _permit = tokio::select! {
                _ = token.cancelled() => return,
                permit = permits.acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
            };

            let outcome = tokio::select! {
                _ = token.cancelled() => return,
                outcome = AssertUnwindSafe(task).catch_unwind() => outcome,
            };

            match outcome {
                Ok(result) => {
                    let _ = tx.send(result);
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    tracing::error!("Runner task panicked: {}", message);
                    record(&fatal, RunnerError::Panic(message));
                    token.cancel();
                }
            }
        });
    }

    /// Next task outcome in completion order.
    ///
    /// Returns `None` once every submitted task has been delivered, or when
    /// the run was aborted; check [`err`](Self::err) to tell them apart.
    /// After the first `None` every later call returns `None` right away.
    pub async fn read(&mut self) -> Option<Result<T, E>> {
        if self.delivered == self.submitted || self.err().is_some() {
            return None;
        }

        tokio::select! {
            biased;
            _ = self.token.cancelled() => {
                record(&self.fatal, RunnerError::Cancelled);
                None
            }
            outcome = self.rx.recv() => {
                let outcome = outcome?;
                self.delivered += 1;
                Some(outcome)
            }
        }
    }

    /// Whether [`read`](Self::read) has nothing more to deliver: every
    /// submitted outcome was read, or the run was aborted. Tasks submitted
    /// later make the runner pending again.
    pub fn is_done(&self) -> bool {
        self.delivered == self.submitted || self.err().is_some()
    }

    /// First runner-level fatal condition
    pub fn err(&self) -> Option<RunnerError> {
        let fatal = self.fatal.lock().unwrap_or_else(|e| e.into_inner()).clone();
        fatal.or_else(|| self.token.is_cancelled().then_some(RunnerError::Cancelled))
    }

    pub fn submitted(&self) -> usize {
        self.submitted
    }
}

impl<T, E> Drop for ParallelRunner<T, E> {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Keep the first fatal condition only
fn record(fatal: &Mutex<Option<RunnerError>>, err: RunnerError) {
    let mut fatal = fatal.lock().unwrap_or_else(|e| e.into_inner());
    if fatal.is_none() {
        *fatal = Some(err);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_every_task_observed_once() {
        let token = CancellationToken::new();
        let mut runner: ParallelRunner<usize, String> = ParallelRunner::new(&token, 3);

        for i in 0..10 {
            runner.run(async move {
                tokio::time::sleep(Duration::from_millis((10 - i) as u64)).await;
                if i == 4 {
                    Err(format!("task {i} failed"))
                } else {
                    Ok(i)
                }
            });
        }

        let mut seen = HashSet::new();
        let mut errors = 0;
        while let Some(outcome) = runner.read().await {
            assert!(!runner.is_done() || seen.len() + errors == 9);
            match outcome {
                Ok(i) => assert!(seen.insert(i)),
                Err(_) => errors += 1,
            }
        }

        assert_eq!(seen.len(), 9);
        assert_eq!(errors, 1);
        assert!(runner.is_done());
        assert!(runner.err().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_is_bounded() {
        let token = CancellationToken::new();
        let mut runner: ParallelRunner<(), ()> = ParallelRunner::new(&token, 2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            let running = running.clone();
            let peak = peak.clone();
            runner.run(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            });
        }

        let mut count = 0;
        while runner.read().await.is_some() {
            count += 1;
        }
        assert_eq!(count, 8);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_panic_aborts_run() {
        let token = CancellationToken::new();
        let mut runner: ParallelRunner<u32, ()> = ParallelRunner::new(&token, 2);

        runner.run(async {
            if true {
                panic!("enumerator exploded");
            }
            Ok(0)
        });
        runner.run(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(1)
        });

        assert!(runner.read().await.is_none());
        assert_eq!(
            runner.err(),
            Some(RunnerError::Panic("enumerator exploded".to_string()))
        );
        assert!(runner.is_done());
        // Parent token is untouched
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn test_parent_cancellation() {
        let token = CancellationToken::new();
        let mut runner: ParallelRunner<u32, ()> = ParallelRunner::new(&token, 1);
        runner.run(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(1)
        });

        token.cancel();
        assert!(runner.read().await.is_none());
        assert_eq!(runner.err(), Some(RunnerError::Cancelled));

        runner.run(async { Ok(2) });
        assert_eq!(runner.submitted(), 1);
    }

    #[tokio::test]
    async fn test_empty_runner_is_done() {
        let token = CancellationToken::new();
        let mut runner: ParallelRunner<(), ()> =
            ParallelRunner::with_default_parallelism(&token);
        assert!(runner.is_done());
        assert!(runner.read().await.is_none());
        assert!(runner.err().is_none());
    }

    #[tokio::test]
    async fn test_read_after_drain_keeps_returning_none() {
        let token = CancellationToken::new();
        let mut runner: ParallelRunner<u32, ()> = ParallelRunner::new(&token, 2);
        runner.run(async { Ok(1) });
        runner.run(async { Ok(2) });
        assert!(!runner.is_done());

        let mut total = 0;
        while let Some(outcome) = runner.read().await {
            total += outcome.unwrap();
        }
        assert_eq!(total, 3);
        assert!(runner.is_done());
        assert!(runner.read().await.is_none());
        assert!(runner.err().is_none());

        // New work reopens the run
        runner.run(async { Ok(4) });
        assert!(!runner.is_done());
        assert_eq!(runner.read().await, Some(Ok(4)));
        assert!(runner.is_done());
    }
}
