//! Bounded pool of disposable sessions.
//!
//! Admission is a semaphore with one permit per live session; a permit
//! travels with the [`Session`] and is returned when it closes. The pool's
//! cancellation scope is a child of the caller's, and every session's
//! scope is a child of the pool's, so cancelling either end stops every
//! in-flight automation call.

use crate::automation::{LaunchSpec, Launcher};
use crate::error::{ErrorKind, Result};
use crate::retry::RetryPolicy;
use crate::session::{Session, SessionHandle, SessionOptions};
use exn::ResultExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{OnceCell, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tome_config::SessionConfig;
use tracing::instrument;
use uuid::Uuid;

#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    launcher: Arc<dyn Launcher>,
    concurrency: usize,
    headless: bool,
    delay: Duration,
    idle: Option<Duration>,
    semaphore: Arc<Semaphore>,
    token: CancellationToken,
    root: PathBuf,
    /// Set when the pool created `root` itself and must remove it.
    owned_root: Mutex<Option<TempDir>>,
    shutdown: OnceCell<()>,
}

impl Pool {
    /// Create a pool whose scope is a child of `parent`.
    ///
    /// Session scratch directories go under the configured user-data root,
    /// or under a fresh temporary directory owned by the pool.
    pub fn new(launcher: Arc<dyn Launcher>, config: &SessionConfig, parent: &CancellationToken) -> Result<Self> {
        let (root, owned_root) = match &config.user_data_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir).or_raise(|| ErrorKind::Io)?;
                (dir.clone(), None)
            },
            None => {
                let dir = tempfile::Builder::new().prefix("tome-sessions-").tempdir().or_raise(|| ErrorKind::Io)?;
                (dir.path().to_path_buf(), Some(dir))
            },
        };
        let concurrency = config.concurrency.max(1);
        tracing::debug!(concurrency, root = %root.display(), "session pool created");
        Ok(Self {
            inner: Arc::new(PoolInner {
                launcher,
                concurrency,
                headless: config.headless,
                delay: config.action_delay(),
                idle: config.idle(),
                semaphore: Arc::new(Semaphore::new(concurrency)),
                token: parent.child_token(),
                root,
                owned_root: Mutex::new(owned_root),
                shutdown: OnceCell::new(),
            }),
        })
    }

    pub fn concurrency(&self) -> usize {
        self.inner.concurrency
    }

    /// Sessions that could be leased right now without waiting.
    pub fn available(&self) -> usize {
        self.inner.semaphore.available_permits()
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    pub fn token(&self) -> &CancellationToken {
        &self.inner.token
    }

    pub fn is_closed(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Wait for a free slot and launch a session into it.
    pub async fn lease(&self) -> Result<Session> {
        let inner = &self.inner;
        if inner.token.is_cancelled() {
            exn::bail!(ErrorKind::PoolClosed);
        }
        let permit = tokio::select! {
            biased;
            () = inner.token.cancelled() => exn::bail!(ErrorKind::PoolClosed),
            permit = inner.semaphore.clone().acquire_owned() => permit.or_raise(|| ErrorKind::PoolClosed)?,
        };
        let id = Uuid::new_v4();
        let options = SessionOptions {
            launcher: inner.launcher.clone(),
            spec: LaunchSpec {
                user_data_dir: inner.root.join(id.to_string()),
                headless: inner.headless,
            },
            scope: inner.token.clone(),
            delay: inner.delay,
            idle: inner.idle,
        };
        let session = Session::open(id, options, permit).await?;
        tracing::debug!(session = %id, available = self.available(), "session leased");
        Ok(session)
    }

    /// Close a leased session and free its slot.
    pub async fn release(&self, session: Session) {
        session.close().await;
    }

    /// Run `task` on a leased session, retrying failures per `policy`.
    ///
    /// The session is released after every attempt (except when the policy
    /// keeps it for recovery). Once the pool is cancelled no further
    /// attempt is made and the result is [`Cancelled`](ErrorKind::Cancelled)
    /// whatever the task returned.
    #[instrument(skip_all, fields(%policy))]
    pub async fn run<T, F, Fut>(&self, policy: RetryPolicy, mut task: F) -> Result<T>
    where
        F: FnMut(SessionHandle) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let deadline = policy.time_limit().map(|limit| (Instant::now() + limit, limit));
        let mut retries = 0u32;
        let mut kept: Option<Session> = None;
        loop {
            let session = match kept.take() {
                Some(session) => session,
                None => self.scoped(deadline, self.lease()).await??,
            };
            let err = match self.scoped(deadline, task(session.handle())).await {
                Ok(Ok(value)) => {
                    self.release(session).await;
                    return Ok(value);
                },
                Ok(Err(err)) => err,
                Err(interrupted) => {
                    self.release(session).await;
                    return Err(interrupted);
                },
            };
            if self.inner.token.is_cancelled() {
                self.release(session).await;
                return Err(err.raise(ErrorKind::Cancelled));
            }
            if !err.is_retryable() || policy.retries().is_some_and(|limit| retries >= limit) {
                self.release(session).await;
                return Err(err);
            }
            retries += 1;
            tracing::warn!(session = %session.id(), retry = retries, error = %err, "task failed; retrying");
            if policy.recovers() && session.handle().is_active() {
                match self.scoped(deadline, session.handle().relaunch()).await {
                    Ok(Ok(())) => kept = Some(session),
                    Ok(Err(err)) | Err(err) => {
                        self.release(session).await;
                        return Err(err);
                    },
                }
            } else {
                self.release(session).await;
            }
        }
    }

    /// Cancel the pool, wait for every outstanding session to be released,
    /// then remove the user-data root if the pool created it. Safe to call
    /// more than once; later calls wait for the first to finish.
    pub async fn shutdown(&self) {
        self.inner
            .shutdown
            .get_or_init(|| async {
                let inner = &self.inner;
                inner.token.cancel();
                let permits = u32::try_from(inner.concurrency).unwrap_or(u32::MAX);
                match inner.semaphore.acquire_many(permits).await {
                    Ok(all) => all.forget(),
                    Err(err) => tracing::debug!(error = %err, "session semaphore already closed"),
                }
                inner.semaphore.close();
                let owned_root = inner.owned_root.lock().unwrap_or_else(PoisonError::into_inner).take();
                if let Some(dir) = owned_root
                    && let Err(err) = dir.close()
                {
                    tracing::warn!(root = %inner.root.display(), error = %err, "failed to remove session root");
                }
                tracing::info!("session pool shut down");
            })
            .await;
    }

    /// Await `fut` unless the pool is cancelled or the deadline passes
    /// first.
    async fn scoped<F: Future>(&self, deadline: Option<(Instant, Duration)>, fut: F) -> Result<F::Output> {
        let expiry = async move {
            match deadline {
                Some((at, _)) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            biased;
            () = self.inner.token.cancelled() => exn::bail!(ErrorKind::Cancelled),
            () = expiry => exn::bail!(ErrorKind::Timeout(deadline.map_or(Duration::ZERO, |(_, limit)| limit))),
            output = fut => Ok(output),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockLauncher;
    use crate::session::SessionState;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn pool_with(launcher: &MockLauncher, config: SessionConfig) -> (Pool, CancellationToken) {
        let parent = CancellationToken::new();
        let pool = Pool::new(Arc::new(launcher.clone()), &config, &parent).unwrap();
        (pool, parent)
    }

    fn pool(launcher: &MockLauncher) -> (Pool, CancellationToken) {
        pool_with(launcher, SessionConfig::default())
    }

    fn navigation_error<T>() -> Result<T> {
        exn::bail!(ErrorKind::Navigation("page failed to load".to_string()))
    }

    fn fatal_error<T>() -> Result<T> {
        exn::bail!(ErrorKind::Fatal("login required".to_string()))
    }

    #[tokio::test]
    async fn test_lease_and_release() {
        let launcher = MockLauncher::default();
        let (pool, _parent) = pool(&launcher);
        let session = pool.lease().await.unwrap();
        let dir = launcher.dirs()[0].clone();
        assert!(dir.starts_with(pool.root()));
        assert!(dir.is_dir());
        assert_eq!(pool.available(), 2);

        let handle = session.handle();
        handle.navigate("https://example.test/").await.unwrap();
        assert_eq!(handle.evaluate("location.href").await.unwrap(), "https://example.test/");

        pool.release(session).await;
        assert_eq!(pool.available(), 3);
        assert_eq!(handle.state(), SessionState::Closed);
        assert!(!dir.exists());
        assert_eq!((launcher.closes(), launcher.live()), (1, 0));
        let err = handle.navigate("https://example.test/").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::SessionClosed(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_live_sessions_bounded_by_concurrency() {
        let launcher = MockLauncher::default();
        let (pool, _parent) = pool_with(&launcher, SessionConfig {
            concurrency: 2,
            ..Default::default()
        });
        let runs = (0..8).map(|_| {
            let pool = pool.clone();
            tokio::spawn(async move {
                pool.run(RetryPolicy::Bounded(0), |_session| async {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Ok(())
                })
                .await
            })
        });
        for run in runs.collect::<Vec<_>>() {
            run.await.unwrap().unwrap();
        }
        assert_eq!(launcher.launches(), 8);
        assert!(launcher.peak() <= 2);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn test_bounded_returns_last_error() {
        let launcher = MockLauncher::default();
        let (pool, _parent) = pool(&launcher);
        let calls = AtomicU32::new(0);
        let err = pool
            .run(RetryPolicy::Bounded(2), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { navigation_error::<()>() }
            })
            .await
            .unwrap_err();
        assert!(matches!(&*err, ErrorKind::Navigation(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // A fresh session per attempt, all released.
        assert_eq!(launcher.launches(), 3);
        assert_eq!(pool.available(), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_bubbles_immediately() {
        let launcher = MockLauncher::default();
        let (pool, _parent) = pool(&launcher);
        let calls = AtomicU32::new(0);
        let err = pool
            .run(RetryPolicy::Unbounded, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { fatal_error::<()>() }
            })
            .await
            .unwrap_err();
        assert!(matches!(&*err, ErrorKind::Fatal(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unbounded_retries_until_success() {
        let launcher = MockLauncher::default();
        let (pool, _parent) = pool(&launcher);
        let calls = AtomicU32::new(0);
        let value = pool
            .run(RetryPolicy::Unbounded, |_| {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                async move { if call < 4 { navigation_error() } else { Ok(call) } }
            })
            .await
            .unwrap();
        assert_eq!(value, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_discards_task_error() {
        let launcher = MockLauncher::default();
        let (pool, _parent) = pool(&launcher);
        let started = Instant::now();
        let err = pool
            .run(RetryPolicy::Deadline(Duration::from_secs(5)), |_| async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                navigation_error::<()>()
            })
            .await
            .unwrap_err();
        assert!(matches!(&*err, ErrorKind::Timeout(limit) if *limit == Duration::from_secs(5)));
        assert_eq!(started.elapsed(), Duration::from_secs(5));
        assert_eq!(pool.available(), 3);
    }

    #[tokio::test]
    async fn test_recovery_relaunches_same_session() {
        let launcher = MockLauncher::default();
        let (pool, _parent) = pool(&launcher);
        let sessions = Mutex::new(Vec::new());
        let value = pool
            .run(RetryPolicy::BoundedWithRecovery(3), |session| {
                let attempt = {
                    let mut seen = sessions.lock().unwrap();
                    seen.push(session.id());
                    seen.len()
                };
                async move { if attempt < 3 { navigation_error() } else { Ok(attempt) } }
            })
            .await
            .unwrap();
        assert_eq!(value, 3);
        let seen = sessions.into_inner().unwrap();
        assert!(seen.iter().all(|id| *id == seen[0]));
        // One launch plus one relaunch per retry.
        assert_eq!(launcher.launches(), 3);
        assert_eq!(launcher.live(), 0);
    }

    #[tokio::test]
    async fn test_cancellation_takes_precedence_over_task_error() {
        let launcher = MockLauncher::default();
        let (pool, parent) = pool(&launcher);
        let calls = AtomicU32::new(0);
        let err = pool
            .run(RetryPolicy::Bounded(10), |_| {
                if calls.fetch_add(1, Ordering::SeqCst) == 1 {
                    parent.cancel();
                }
                async { navigation_error::<()>() }
            })
            .await
            .unwrap_err();
        assert!(matches!(&*err, ErrorKind::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(launcher.live(), 0);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_running_task() {
        let launcher = MockLauncher::default();
        let (pool, parent) = pool(&launcher);
        let cancel = async {
            tokio::task::yield_now().await;
            parent.cancel();
        };
        let run = pool.run(RetryPolicy::Unbounded, |session| async move {
            session.token().cancelled().await;
            navigation_error::<()>()
        });
        let (result, ()) = tokio::join!(run, cancel);
        assert!(matches!(&*result.unwrap_err(), ErrorKind::Cancelled));
        assert!(pool.is_closed());
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_sessions_and_is_idempotent() {
        let launcher = MockLauncher::default();
        let (pool, _parent) = pool(&launcher);
        let root = pool.root().to_path_buf();
        let session = pool.lease().await.unwrap();

        let waiting = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.shutdown().await })
        };
        while !pool.is_closed() {
            tokio::task::yield_now().await;
        }
        assert!(!waiting.is_finished());
        assert!(root.is_dir());
        let Err(err) = pool.lease().await else { panic!("lease succeeded on a closed pool") };
        assert!(matches!(&*err, ErrorKind::PoolClosed));

        pool.release(session).await;
        waiting.await.unwrap();
        pool.shutdown().await;
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn test_provided_root_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = MockLauncher::default();
        let (pool, _parent) = pool_with(&launcher, SessionConfig {
            user_data_dir: Some(dir.path().join("sessions")),
            ..Default::default()
        });
        let session = pool.lease().await.unwrap();
        pool.release(session).await;
        pool.shutdown().await;
        let root = dir.path().join("sessions");
        assert!(root.is_dir());
        assert_eq!(std::fs::read_dir(root).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_launch_failure_frees_slot() {
        let launcher = MockLauncher::default();
        launcher.break_launches();
        let (pool, _parent) = pool(&launcher);
        let err = pool.run(RetryPolicy::Unbounded, |_| async { Ok(()) }).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Launch(_)));
        assert_eq!(pool.available(), 3);
        assert_eq!(std::fs::read_dir(pool.root()).unwrap().count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_session_expires() {
        let launcher = MockLauncher::default();
        let (pool, _parent) = pool_with(&launcher, SessionConfig {
            idle_secs: Some(5),
            ..Default::default()
        });
        let session = pool.lease().await.unwrap();
        let handle = session.handle();
        tokio::time::sleep(Duration::from_secs(3)).await;
        handle.navigate("https://example.test/a").await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(handle.is_active());
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!handle.is_active());
        let err = handle.navigate("https://example.test/b").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::SessionClosed(_)));
        pool.release(session).await;
    }
}
