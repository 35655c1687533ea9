//! Long-lived workers fanning independent jobs out over the session pool.

use crate::error::{Error, ErrorKind, Result};
use crate::pool::Pool;
use crate::session::{Session, SessionHandle};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::{Mutex as AsyncMutex, Notify, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A unit of work for a [`WorkerPool`].
#[async_trait]
pub trait Job: Send + 'static {
    /// Attempt the job. Called again with a relaunched session after every
    /// retryable failure.
    async fn run(&mut self, session: SessionHandle) -> Result<()>;

    /// Called instead of (or after giving up on) [`run`](Self::run): the
    /// pool was shut down, or the job failed with a non-retryable error.
    async fn abandon(self: Box<Self>, reason: Error);
}

#[derive(Default)]
struct Pending {
    count: AtomicUsize,
    idle: Notify,
}

impl Pending {
    fn add(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn done(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

type Queue = Arc<AsyncMutex<UnboundedReceiver<Box<dyn Job>>>>;

/// Fixed set of workers pulling [`Job`]s from a shared queue.
///
/// Each job runs on a leased session and is retried on the same session,
/// relaunching its automation in between, until it succeeds, fails for good,
/// or the pool is cancelled.
pub struct WorkerPool {
    token: CancellationToken,
    sender: Mutex<Option<UnboundedSender<Box<dyn Job>>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    pending: Arc<Pending>,
}

impl WorkerPool {
    pub fn new(pool: &Pool, workers: usize) -> Self {
        let token = pool.token().child_token();
        let (sender, receiver) = mpsc::unbounded_channel();
        let queue: Queue = Arc::new(AsyncMutex::new(receiver));
        let pending = Arc::new(Pending::default());
        let handles = (0..workers.max(1))
            .map(|worker| tokio::spawn(work(worker, pool.clone(), token.clone(), queue.clone(), pending.clone())))
            .collect();
        Self {
            token,
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(handles),
            pending,
        }
    }

    /// Queue `job`. Returns `false` when the pool is shutting down, in which
    /// case the job is abandoned right away on the caller's task.
    pub async fn submit(&self, job: impl Job) -> bool {
        self.submit_boxed(Box::new(job)).await
    }

    pub async fn submit_boxed(&self, job: Box<dyn Job>) -> bool {
        let rejected = {
            let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
            match sender.as_ref() {
                Some(sender) if !self.token.is_cancelled() => {
                    self.pending.add();
                    match sender.send(job) {
                        Ok(()) => None,
                        Err(mpsc::error::SendError(job)) => {
                            self.pending.done();
                            Some(job)
                        },
                    }
                },
                _ => Some(job),
            }
        };
        let Some(job) = rejected else {
            return true;
        };
        tracing::debug!("worker pool is shutting down; job abandoned");
        job.abandon(exn::Exn::from(ErrorKind::PoolClosed)).await;
        false
    }

    /// Jobs submitted and not yet finished.
    pub fn pending(&self) -> usize {
        self.pending.count.load(Ordering::SeqCst)
    }

    /// Wait until every submitted job has finished or been abandoned.
    pub async fn drain(&self) {
        loop {
            let idle = self.pending.idle.notified();
            if self.pending() == 0 {
                return;
            }
            idle.await;
        }
    }

    /// Abandon queued and running jobs instead of retrying them.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Stop accepting jobs, let the workers finish what is queued, and wait
    /// for them to exit.
    pub async fn shutdown(&self) {
        self.sender.lock().unwrap_or_else(PoisonError::into_inner).take();
        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));
        for worker in workers {
            if let Err(err) = worker.await {
                tracing::error!(error = %err, "worker task failed");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn work(worker: usize, pool: Pool, token: CancellationToken, queue: Queue, pending: Arc<Pending>) {
    loop {
        let job = queue.lock().await.recv().await;
        let Some(job) = job else {
            break;
        };
        execute(&pool, &token, job).await;
        pending.done();
    }
    tracing::trace!(worker, "worker stopped");
}

async fn execute(pool: &Pool, token: &CancellationToken, mut job: Box<dyn Job>) {
    let mut kept: Option<Session> = None;
    loop {
        let session = match kept.take() {
            Some(session) => session,
            None => {
                let leased = tokio::select! {
                    biased;
                    () = token.cancelled() => Err(exn::Exn::from(ErrorKind::Cancelled)),
                    leased = pool.lease() => leased,
                };
                match leased {
                    Ok(session) => session,
                    Err(err) => {
                        job.abandon(err).await;
                        return;
                    },
                }
            },
        };
        let result = tokio::select! {
            biased;
            () = token.cancelled() => Err(exn::Exn::from(ErrorKind::Cancelled)),
            result = job.run(session.handle()) => result,
        };
        let err = match result {
            Ok(()) => {
                pool.release(session).await;
                return;
            },
            Err(err) => err,
        };
        if token.is_cancelled() {
            pool.release(session).await;
            job.abandon(err.raise(ErrorKind::Cancelled)).await;
            return;
        }
        if !err.is_retryable() {
            pool.release(session).await;
            job.abandon(err).await;
            return;
        }
        tracing::warn!(session = %session.id(), error = %err, "job failed; relaunching and retrying");
        let handle = session.handle();
        match handle.relaunch().await {
            Ok(()) => kept = Some(session),
            Err(err) => {
                tracing::debug!(session = %session.id(), error = %err, "relaunch failed; leasing a new session");
                pool.release(session).await;
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockLauncher;
    use tome_config::SessionConfig;

    #[derive(Default)]
    struct Log {
        runs: AtomicUsize,
        done: AtomicUsize,
        abandoned: Mutex<Vec<String>>,
    }

    /// Fails `failures` times with a navigation error, then succeeds.
    struct Flaky {
        failures: usize,
        log: Arc<Log>,
    }

    #[async_trait]
    impl Job for Flaky {
        async fn run(&mut self, session: SessionHandle) -> Result<()> {
            self.log.runs.fetch_add(1, Ordering::SeqCst);
            session.navigate("https://example.test/").await?;
            if self.failures > 0 {
                self.failures -= 1;
                exn::bail!(ErrorKind::Navigation("flaky".to_string()));
            }
            self.log.done.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn abandon(self: Box<Self>, reason: Error) {
            self.log.abandoned.lock().unwrap().push((*reason).to_string());
        }
    }

    struct Fatal(Arc<Log>);

    #[async_trait]
    impl Job for Fatal {
        async fn run(&mut self, _session: SessionHandle) -> Result<()> {
            self.0.runs.fetch_add(1, Ordering::SeqCst);
            exn::bail!(ErrorKind::Fatal("logged out".to_string()))
        }

        async fn abandon(self: Box<Self>, reason: Error) {
            self.0.abandoned.lock().unwrap().push((*reason).to_string());
        }
    }

    fn pool(launcher: &MockLauncher) -> Pool {
        let config = SessionConfig {
            concurrency: 2,
            ..Default::default()
        };
        Pool::new(Arc::new(launcher.clone()), &config, &CancellationToken::new()).unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_runs_every_job() {
        let launcher = MockLauncher::default();
        let pool = pool(&launcher);
        let workers = WorkerPool::new(&pool, 4);
        let log = Arc::new(Log::default());
        for _ in 0..10 {
            assert!(workers.submit(Flaky { failures: 0, log: log.clone() }).await);
        }
        workers.drain().await;
        assert_eq!(workers.pending(), 0);
        assert_eq!(log.done.load(Ordering::SeqCst), 10);
        assert!(launcher.peak() <= 2);
        workers.shutdown().await;
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_job_is_retried_on_relaunched_session() {
        let launcher = MockLauncher::default();
        let pool = pool(&launcher);
        let workers = WorkerPool::new(&pool, 1);
        let log = Arc::new(Log::default());
        workers.submit(Flaky { failures: 3, log: log.clone() }).await;
        workers.drain().await;
        assert_eq!(log.runs.load(Ordering::SeqCst), 4);
        assert_eq!(log.done.load(Ordering::SeqCst), 1);
        assert_eq!(launcher.launches(), 4);
        assert_eq!(launcher.dirs().iter().collect::<std::collections::HashSet<_>>().len(), 1);
        workers.shutdown().await;
    }

    #[tokio::test]
    async fn test_fatal_job_is_abandoned() {
        let launcher = MockLauncher::default();
        let pool = pool(&launcher);
        let workers = WorkerPool::new(&pool, 1);
        let log = Arc::new(Log::default());
        workers.submit(Fatal(log.clone())).await;
        workers.drain().await;
        assert_eq!(log.runs.load(Ordering::SeqCst), 1);
        assert_eq!(*log.abandoned.lock().unwrap(), vec!["automation failure: logged out".to_string()]);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_runs_fallback_inline() {
        let launcher = MockLauncher::default();
        let pool = pool(&launcher);
        let workers = WorkerPool::new(&pool, 2);
        workers.shutdown().await;
        let log = Arc::new(Log::default());
        assert!(!workers.submit(Flaky { failures: 0, log: log.clone() }).await);
        assert_eq!(log.runs.load(Ordering::SeqCst), 0);
        assert_eq!(*log.abandoned.lock().unwrap(), vec!["session pool is closed".to_string()]);
        assert_eq!(launcher.launches(), 0);
    }

    #[tokio::test]
    async fn test_pool_cancellation_abandons_retrying_job() {
        let launcher = MockLauncher::default();
        let parent = CancellationToken::new();
        let pool = Pool::new(Arc::new(launcher.clone()), &SessionConfig::default(), &parent).unwrap();
        let workers = WorkerPool::new(&pool, 1);
        let log = Arc::new(Log::default());
        workers.submit(Flaky { failures: usize::MAX, log: log.clone() }).await;
        while log.runs.load(Ordering::SeqCst) < 3 {
            tokio::task::yield_now().await;
        }
        parent.cancel();
        workers.drain().await;
        assert_eq!(*log.abandoned.lock().unwrap(), vec!["cancelled".to_string()]);
        assert!(!workers.submit(Flaky { failures: 0, log: log.clone() }).await);
    }
}
