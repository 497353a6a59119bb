//! Bounded fan-out of independent units of work.
//!
//! A stage spawns one task per independence unit (a datum, an input root,
//! a source id) into a [`FanOut`]. Tasks wait on a shared semaphore before
//! running and stop at their next suspension point once the shutdown token is
//! cancelled. The first failing task aborts the rest.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Error type for task execution.
#[derive(Debug)]
pub enum TaskError<E> {
    /// Task was cancelled via shutdown signal.
    Cancelled,
    /// Task panicked during execution.
    Panicked(String),
    /// Task failed with an error.
    Failed(E),
}

impl<E: fmt::Display> fmt::Display for TaskError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => write!(f, "task cancelled"),
            Self::Panicked(msg) => write!(f, "task panicked: {msg}"),
            Self::Failed(err) => write!(f, "task failed: {err}"),
        }
    }
}

impl<E> std::error::Error for TaskError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Failed(err) => Some(err),
            _ => None,
        }
    }
}

impl<E> TaskError<E> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn is_panicked(&self) -> bool {
        matches!(self, Self::Panicked(_))
    }
}

/// A set of spawned tasks sharing one concurrency limit and shutdown token.
pub struct FanOut<T, E> {
    tasks: JoinSet<Result<T, TaskError<E>>>,
    semaphore: Arc<Semaphore>,
    shutdown: CancellationToken,
    typetag: &'static str,
}

impl<T, E> FanOut<T, E>
where
    T: Send + 'static,
    E: fmt::Display + Send + 'static,
{
    /// Create a fan-out running at most `concurrency` tasks at once.
    pub fn new(concurrency: usize, shutdown: CancellationToken, typetag: &'static str) -> Self {
        Self {
            tasks: JoinSet::new(),
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
            shutdown,
            typetag,
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Spawn one unit of work.
    pub fn spawn<F>(&mut self, future: F)
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
    {
        let semaphore = Arc::clone(&self.semaphore);
        let shutdown = self.shutdown.clone();

        self.tasks.spawn(async move {
            let _permit = match shutdown
                .run_until_cancelled(semaphore.acquire_owned())
                .await
            {
                Some(Ok(permit)) => permit,
                _ => return Err(TaskError::Cancelled),
            };

            match shutdown.run_until_cancelled(future).await {
                Some(Ok(value)) => Ok(value),
                Some(Err(e)) => Err(TaskError::Failed(e)),
                None => Err(TaskError::Cancelled),
            }
        });
    }

    /// Wait for every task.
    ///
    /// Returns all outputs, or the first error. A real failure is preferred
    /// over the cancellations it causes in sibling tasks.
    pub async fn join(mut self) -> Result<Vec<T>, TaskError<E>> {
        let total = self.tasks.len();
        debug!("Spawned {} {} tasks", total, self.typetag);

        let mut outputs = Vec::with_capacity(total);
        let mut first_error: Option<TaskError<E>> = None;

        while let Some(joined) = self.tasks.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) if e.is_cancelled() => Err(TaskError::Cancelled),
                Err(e) => Err(TaskError::Panicked(e.to_string())),
            };

            match outcome {
                Ok(value) => outputs.push(value),
                Err(e) => {
                    let replace = match &first_error {
                        None => true,
                        Some(existing) => existing.is_cancelled() && !e.is_cancelled(),
                    };
                    if replace {
                        if !e.is_cancelled() {
                            error!(error = %e, "{} task failed, aborting remaining", self.typetag);
                        }
                        self.tasks.abort_all();
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(outputs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_join_collects_outputs() {
        let mut fan: FanOut<usize, String> = FanOut::new(2, CancellationToken::new(), "test");
        for i in 0..5 {
            fan.spawn(async move { Ok(i * 2) });
        }
        assert_eq!(fan.len(), 5);

        let mut outputs = fan.join().await.unwrap();
        outputs.sort();
        assert_eq!(outputs, vec![0, 2, 4, 6, 8]);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut fan: FanOut<(), String> = FanOut::new(2, CancellationToken::new(), "test");

        for _ in 0..8 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            fan.spawn(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            });
        }

        fan.join().await.unwrap();
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_failure_wins_over_sibling_cancellation() {
        let mut fan: FanOut<(), String> = FanOut::new(4, CancellationToken::new(), "test");
        fan.spawn(async { Err("broken".to_string()) });
        for _ in 0..3 {
            fan.spawn(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            });
        }

        let err = tokio::time::timeout(Duration::from_secs(5), fan.join())
            .await
            .expect("join should finish once the failure aborts siblings")
            .unwrap_err();
        match err {
            TaskError::Failed(msg) => assert_eq!(msg, "broken"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_shutdown_cancels_tasks() {
        let shutdown = CancellationToken::new();
        let mut fan: FanOut<(), String> = FanOut::new(1, shutdown.clone(), "test");
        fan.spawn(async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        });
        shutdown.cancel();

        let err = fan.join().await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_panic_is_reported() {
        let mut fan: FanOut<(), String> = FanOut::new(1, CancellationToken::new(), "test");
        fan.spawn(async {
            if true {
                panic!("boom");
            }
            Ok(())
        });

        let err = fan.join().await.unwrap_err();
        assert!(err.is_panicked());
    }

    #[test]
    fn test_task_error_display() {
        assert_eq!(TaskError::<String>::Cancelled.to_string(), "task cancelled");
        assert_eq!(
            TaskError::<String>::Panicked("oops".into()).to_string(),
            "task panicked: oops"
        );
        assert_eq!(
            TaskError::Failed("bad".to_string()).to_string(),
            "task failed: bad"
        );
    }
}
