//! Single-flight access-token refresh.
//!
//! At most one refresh call is in flight per coordinator. Callers that need
//! a token while it runs either await the same shared future or park a
//! oneshot waiter in the queue; when the refresh settles, the queue is taken
//! under the state lock and every waiter gets the same result.

use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::RefreshError;
use crate::session::{Session, SessionStore};

/// Refresh proactively once the access token has this little time left.
pub const REFRESH_THRESHOLD_SECS: i64 = 60;

/// No new proactive refresh within this long of the previous attempt.
pub const REFRESH_GUARD_SECS: i64 = 5;

pub type RefreshResult = Result<Session, RefreshError>;

/// The network half of a refresh: trade a refresh token for a new session.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> RefreshResult;
}

type InFlight = Shared<BoxFuture<'static, RefreshResult>>;

#[derive(Default)]
struct RefreshState {
    is_refreshing: bool,
    in_flight: Option<InFlight>,
    failed_queue: Vec<oneshot::Sender<RefreshResult>>,
    last_refresh_attempt: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    refresher: Arc<dyn TokenRefresher>,
    sessions: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    state: Mutex<RefreshState>,
    refreshes: AtomicU64,
}

impl RefreshCoordinator {
    pub fn new(
        refresher: Arc<dyn TokenRefresher>,
        sessions: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                refresher,
                sessions,
                clock,
                state: Mutex::new(RefreshState::default()),
                refreshes: AtomicU64::new(0),
            }),
        }
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.inner.sessions
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.state.lock().is_refreshing
    }

    /// Number of refresh calls started so far.
    pub fn refresh_count(&self) -> u64 {
        self.inner.refreshes.load(Ordering::Relaxed)
    }

    pub fn last_refresh_attempt(&self) -> Option<DateTime<Utc>> {
        self.inner.state.lock().last_refresh_attempt
    }

    /// Join the refresh in flight, or start one with `refresh_token`.
    ///
    /// The call itself runs on a spawned task, so it completes (and releases
    /// the queue) even if every caller stops waiting.
    pub async fn execute_refresh(&self, refresh_token: String) -> RefreshResult {
        let in_flight = {
            let mut state = self.inner.state.lock();
            match &state.in_flight {
                Some(in_flight) => in_flight.clone(),
                None => {
                    state.is_refreshing = true;
                    let n = self.inner.refreshes.fetch_add(1, Ordering::Relaxed) + 1;
                    debug!("Starting token refresh #{}", n);

                    let inner = self.inner.clone();
                    let task = tokio::spawn(async move { inner.run_refresh(refresh_token).await });
                    let in_flight = async move { task.await.unwrap_or(Err(RefreshError::Aborted)) }
                        .boxed()
                        .shared();
                    state.in_flight = Some(in_flight.clone());
                    in_flight
                }
            }
        };
        in_flight.await
    }

    /// Park a waiter if a refresh is running. `None` means nothing is in
    /// flight and the caller has to start a refresh itself.
    pub fn enqueue_waiter(&self) -> Option<oneshot::Receiver<RefreshResult>> {
        let mut state = self.inner.state.lock();
        if !state.is_refreshing {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        state.failed_queue.push(tx);
        Some(rx)
    }

    pub fn queued_waiters(&self) -> usize {
        self.inner.state.lock().failed_queue.len()
    }

    /// Access token to send with a protected request, refreshing first when
    /// the cached one is missing or about to expire.
    ///
    /// A refresh already in flight is always joined. Otherwise a new one is
    /// only started if the last attempt is more than
    /// [`REFRESH_GUARD_SECS`] old; inside that window the current token (if
    /// any) is used as is and a 401 falls through to
    /// [`RefreshCoordinator::refresh_after_unauthorized`].
    pub async fn ensure_fresh_access_token(&self) -> Result<Option<String>, RefreshError> {
        let session = self.inner.sessions.get();
        let now = self.inner.clock.now();

        let fresh = session.as_ref().is_some_and(|s| {
            !s.access_token.is_empty()
                && s.access_token_expiry - now.timestamp() > REFRESH_THRESHOLD_SECS
        });
        if fresh {
            return Ok(session.map(|s| s.access_token));
        }

        let (in_flight, recently_attempted) = {
            let state = self.inner.state.lock();
            let recent = state
                .last_refresh_attempt
                .is_some_and(|at| now - at < Duration::seconds(REFRESH_GUARD_SECS));
            (state.in_flight.clone(), recent)
        };

        if let Some(in_flight) = in_flight {
            return in_flight.await.map(|s| Some(s.access_token));
        }
        if recently_attempted {
            debug!("Skipping proactive refresh, last attempt was under {}s ago", REFRESH_GUARD_SECS);
            // The attempt may have replaced the session since it was read above
            let current = self.inner.sessions.get();
            return Ok(current.map(|s| s.access_token).filter(|t| !t.is_empty()));
        }

        let refresh_token = refresh_token_of(session)?;
        self.execute_refresh(refresh_token)
            .await
            .map(|s| Some(s.access_token))
    }

    /// Recover from a 401 on a request that was sent with `used_token`.
    ///
    /// Waits in the queue if a refresh is running. If the session already
    /// holds a different access token (another request refreshed in the
    /// meantime), that session is returned without a new refresh.
    pub async fn refresh_after_unauthorized(&self, used_token: Option<&str>) -> RefreshResult {
        if let Some(waiter) = self.enqueue_waiter() {
            debug!("Refresh in progress, queueing request");
            return waiter.await.unwrap_or(Err(RefreshError::Aborted));
        }

        let session = self.inner.sessions.get();
        if let Some(current) = &session {
            if !current.access_token.is_empty() && Some(current.access_token.as_str()) != used_token {
                return Ok(current.clone());
            }
        }

        let refresh_token = refresh_token_of(session)?;
        self.execute_refresh(refresh_token).await
    }
}

impl Inner {
    async fn run_refresh(self: Arc<Self>, refresh_token: String) -> RefreshResult {
        let result = self.refresher.refresh(&refresh_token).await;
        match &result {
            Ok(session) => {
                self.sessions.set(session.clone());
                info!("Access token refreshed, valid until {}", session.access_token_expiry);
            }
            Err(e) => warn!("Token refresh failed: {}", e),
        }
        self.settle(&result);
        result
    }

    /// Resolve or reject every queued waiter with `result`, then reset.
    fn settle(&self, result: &RefreshResult) {
        let waiters = {
            let mut state = self.state.lock();
            state.is_refreshing = false;
            state.in_flight = None;
            state.last_refresh_attempt = Some(self.clock.now());
            mem::take(&mut state.failed_queue)
        };

        if !waiters.is_empty() {
            debug!("Releasing {} queued request(s)", waiters.len());
        }
        for waiter in waiters {
            // A dropped receiver only means that request was cancelled.
            let _ = waiter.send(result.clone());
        }
    }
}

fn refresh_token_of(session: Option<Session>) -> Result<String, RefreshError> {
    session
        .map(|s| s.refresh_token)
        .filter(|t| !t.is_empty())
        .ok_or(RefreshError::MissingRefreshToken)
}
