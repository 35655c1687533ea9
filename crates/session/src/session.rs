use crate::automation::{Automation, LaunchSpec, Launcher};
use crate::error::{Error, ErrorKind, Result};
use derive_more::Display;
use exn::ResultExt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard, OwnedSemaphorePermit};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    #[display("active")]
    Active,
    #[display("closing")]
    Closing,
    #[display("closed")]
    Closed,
}

/// What a pool hands to [`Session::open`].
pub(crate) struct SessionOptions {
    pub launcher: Arc<dyn Launcher>,
    pub spec: LaunchSpec,
    /// The pool's scope; the session's own scope is a child of it.
    pub scope: CancellationToken,
    pub delay: Duration,
    pub idle: Option<Duration>,
}

struct Shared {
    id: Uuid,
    state: Mutex<SessionState>,
    automation: AsyncMutex<Option<Box<dyn Automation>>>,
    launcher: Arc<dyn Launcher>,
    spec: LaunchSpec,
    pool_scope: CancellationToken,
    token: CancellationToken,
    delay: Duration,
    last_activity: Mutex<Instant>,
}

impl Shared {
    fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn last_activity(&self) -> Instant {
        *self.last_activity.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Error for a call that found the session's scope signalled.
    fn interrupted(&self) -> Error {
        if self.pool_scope.is_cancelled() {
            exn::Exn::from(ErrorKind::Cancelled)
        } else {
            exn::Exn::from(ErrorKind::SessionClosed(self.id.to_string()))
        }
    }
}

/// Exclusive lease on one automation instance.
///
/// Obtained from [`Pool::lease`](crate::Pool::lease) and given back with
/// [`Pool::release`](crate::Pool::release). Work is done through a
/// [`SessionHandle`]. Dropping a session without releasing it still frees
/// its pool slot, but cannot close the automation gracefully.
pub struct Session {
    shared: Arc<Shared>,
    permit: Option<OwnedSemaphorePermit>,
}

impl Session {
    pub(crate) async fn open(id: Uuid, options: SessionOptions, permit: OwnedSemaphorePermit) -> Result<Self> {
        let SessionOptions {
            launcher,
            spec,
            scope,
            delay,
            idle,
        } = options;
        tokio::fs::create_dir_all(&spec.user_data_dir).await.or_raise(|| ErrorKind::Io)?;
        let automation = match launcher.launch(&spec).await {
            Ok(automation) => automation,
            Err(err) => {
                remove_dir(&spec).await;
                return Err(err);
            },
        };
        let shared = Arc::new(Shared {
            id,
            state: Mutex::new(SessionState::Active),
            automation: AsyncMutex::new(Some(automation)),
            launcher,
            spec,
            token: scope.child_token(),
            pool_scope: scope,
            delay,
            last_activity: Mutex::new(Instant::now()),
        });
        if let Some(idle) = idle {
            tokio::spawn(watch_idle(shared.clone(), idle));
        }
        Ok(Self {
            shared,
            permit: Some(permit),
        })
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            shared: self.shared.clone(),
        }
    }

    /// Close the automation instance and remove the scratch directory.
    pub(crate) async fn close(mut self) {
        let shared = self.shared.clone();
        shared.set_state(SessionState::Closing);
        shared.token.cancel();
        let automation = shared.automation.lock().await.take();
        if let Some(automation) = automation
            && let Err(err) = automation.close().await
        {
            tracing::warn!(session = %shared.id, error = %err, "failed to close automation cleanly");
        }
        remove_dir(&shared.spec).await;
        shared.set_state(SessionState::Closed);
        self.permit.take();
        tracing::debug!(session = %shared.id, "session closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.shared.state() == SessionState::Closed {
            return;
        }
        tracing::warn!(session = %self.shared.id, "session dropped without being released");
        self.shared.token.cancel();
        if let Ok(mut automation) = self.shared.automation.try_lock() {
            automation.take();
        }
        if let Err(err) = std::fs::remove_dir_all(&self.shared.spec.user_data_dir)
            && err.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(session = %self.shared.id, error = %err, "failed to remove session directory");
        }
        self.shared.set_state(SessionState::Closed);
    }
}

/// Cloneable access to a leased session's automation calls.
///
/// Every call observes the session's cancellation scope: once the pool is
/// cancelled calls fail with [`Cancelled`](ErrorKind::Cancelled), and once
/// the session is closed or expires they fail with
/// [`SessionClosed`](ErrorKind::SessionClosed).
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active && !self.shared.token.is_cancelled()
    }

    /// The session's cancellation scope.
    pub fn token(&self) -> &CancellationToken {
        &self.shared.token
    }

    /// Record activity, postponing idle expiry.
    pub fn touch(&self) {
        *self.shared.last_activity.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    pub async fn navigate(&self, url: &str) -> Result<()> {
        let guard = self.automation().await?;
        let Some(automation) = guard.as_deref() else {
            return Err(self.shared.interrupted());
        };
        tracing::trace!(session = %self.shared.id, url, "navigate");
        self.scoped(automation.navigate(url)).await
    }

    pub async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        let guard = self.automation().await?;
        let Some(automation) = guard.as_deref() else {
            return Err(self.shared.interrupted());
        };
        self.scoped(automation.evaluate(script)).await
    }

    pub async fn fetch_resource(&self, url: &str) -> Result<Vec<u8>> {
        let guard = self.automation().await?;
        let Some(automation) = guard.as_deref() else {
            return Err(self.shared.interrupted());
        };
        tracing::trace!(session = %self.shared.id, url, "fetch resource");
        self.scoped(automation.fetch_resource(url)).await
    }

    /// Discard the automation instance and launch a fresh one into the same
    /// scratch directory.
    pub async fn relaunch(&self) -> Result<()> {
        if !self.is_active() {
            return Err(self.shared.interrupted());
        }
        let mut guard = self.shared.automation.lock().await;
        if let Some(old) = guard.take()
            && let Err(err) = old.close().await
        {
            tracing::debug!(session = %self.shared.id, error = %err, "closing automation before relaunch failed");
        }
        let fresh = self.scoped(self.shared.launcher.launch(&self.shared.spec)).await?;
        *guard = Some(fresh);
        self.touch();
        tracing::debug!(session = %self.shared.id, "automation relaunched");
        Ok(())
    }

    /// Wait out the configured delay and lock the automation instance.
    async fn automation(&self) -> Result<MutexGuard<'_, Option<Box<dyn Automation>>>> {
        if !self.is_active() {
            return Err(self.shared.interrupted());
        }
        self.touch();
        if !self.shared.delay.is_zero() {
            self.scoped(async {
                tokio::time::sleep(self.shared.delay).await;
                Ok(())
            })
            .await?;
        }
        Ok(self.shared.automation.lock().await)
    }

    async fn scoped<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            () = self.shared.token.cancelled() => Err(self.shared.interrupted()),
            result = call => {
                self.touch();
                result
            },
        }
    }
}

/// Cancel the session once no activity has been seen for `idle`.
async fn watch_idle(shared: Arc<Shared>, idle: Duration) {
    loop {
        let expires = shared.last_activity() + idle;
        tokio::select! {
            () = shared.token.cancelled() => return,
            () = tokio::time::sleep_until(expires) => {},
        }
        if shared.last_activity() + idle <= Instant::now() {
            tracing::info!(session = %shared.id, ?idle, "session idle; expiring");
            shared.token.cancel();
            return;
        }
    }
}

async fn remove_dir(spec: &LaunchSpec) {
    match tokio::fs::remove_dir_all(&spec.user_data_dir).await {
        Ok(()) => {},
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {},
        Err(err) => {
            tracing::warn!(path = %spec.user_data_dir.display(), error = %err, "failed to remove session directory");
        },
    }
}
