//! Rotating browser pool.
//!
//! The pool owns every browser process. Workers borrow the active session
//! through a [`SessionLease`]; rotation swaps in a fresh session while the
//! previous one drains. One mutex guards which session is active, which is
//! retiring, and every borrower count, so a release can never race a swap.
//!
//! Invariants:
//! - at most one active and one retiring session exist at any time
//! - a session is closed exactly once, and only when nothing borrows it
//! - the lock is never held across an `.await`

use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::browser::{BrowserSession, SessionLauncher};
use crate::error::BrowserError;
use ticker_common::PoolConfig;

/// Identifies one launched session for the lifetime of the pool.
pub type SessionId = u64;

struct Slot {
    id: SessionId,
    session: Arc<dyn BrowserSession>,
    borrowers: usize,
}

#[derive(Default)]
struct PoolState {
    active: Option<Slot>,
    retiring: Option<Slot>,
    /// A replacement is being launched outside the lock.
    rotating: bool,
    /// Acquisitions since the last rotation was requested.
    requests: u32,
    next_id: SessionId,
    shutting_down: bool,
}

impl PoolState {
    fn install(&mut self, session: Arc<dyn BrowserSession>) -> SessionId {
        let id = self.next_id;
        self.next_id += 1;
        self.active = Some(Slot {
            id,
            session,
            borrowers: 0,
        });
        id
    }
}

#[derive(Default)]
struct Counters {
    launched: AtomicU64,
    closed: AtomicU64,
    rotations: AtomicU64,
}

struct PoolInner {
    launcher: Arc<dyn SessionLauncher>,
    config: PoolConfig,
    state: Mutex<PoolState>,
    counters: Counters,
    cancel: CancellationToken,
    monitors: Mutex<Vec<JoinHandle<()>>>,
}

/// Point-in-time view of the pool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub launched: u64,
    pub closed: u64,
    pub rotations: u64,
    pub active_id: Option<SessionId>,
    pub active_borrowers: usize,
    pub retiring_id: Option<SessionId>,
    pub retiring_borrowers: usize,
    pub rotating: bool,
}

/// Cheap-clone handle to the shared pool.
#[derive(Clone)]
pub struct BrowserPool {
    inner: Arc<PoolInner>,
}

impl BrowserPool {
    /// Launch the first session and return the pool.
    pub async fn new(
        launcher: Arc<dyn SessionLauncher>,
        config: PoolConfig,
    ) -> Result<Self, BrowserError> {
        let session = launcher.launch().await?;

        let pool = Self {
            inner: Arc::new(PoolInner {
                launcher,
                config,
                state: Mutex::new(PoolState::default()),
                counters: Counters::default(),
                cancel: CancellationToken::new(),
                monitors: Mutex::new(Vec::new()),
            }),
        };

        let id = pool.lock().install(session);
        pool.inner.counters.launched.fetch_add(1, Ordering::Relaxed);
        info!(session = id, "Browser pool ready");

        Ok(pool)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Token cancelled by [`BrowserPool::shutdown`]. Background loops select on children of it.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.child_token()
    }

    // A worker that panicked while holding the lock left the state consistent:
    // every mutation below completes before any call that could unwind.
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Borrow the active session.
    ///
    /// Counts the request toward rotation; reaching the threshold schedules a
    /// rotation in the background without blocking the caller.
    pub fn acquire(&self) -> Result<SessionLease, BrowserError> {
        let (lease, rotate) = {
            let mut guard = self.lock();
            let state = &mut *guard;
            if state.shutting_down {
                return Err(BrowserError::PoolClosed);
            }

            let slot = state.active.as_mut().ok_or(BrowserError::PoolClosed)?;
            slot.borrowers += 1;
            let lease = SessionLease {
                pool: self.clone(),
                slot: slot.id,
                session: Arc::clone(&slot.session),
                released: false,
            };

            state.requests += 1;
            let rotate = state.requests >= self.inner.config.max_requests;
            if rotate {
                state.requests = 0;
            }
            (lease, rotate)
        };

        if rotate {
            debug!("Request threshold reached, scheduling rotation");
            let pool = self.clone();
            tokio::spawn(async move {
                if let Err(e) = pool.rotate().await {
                    warn!(error = %e, "Scheduled rotation failed");
                }
            });
        }

        Ok(lease)
    }

    /// Decrement the borrower count of the slot a lease came from.
    ///
    /// Returns the session when this release drained it and it must be closed.
    fn release_slot(&self, id: SessionId) -> Option<Arc<dyn BrowserSession>> {
        let mut guard = self.lock();
        let state = &mut *guard;

        if let Some(slot) = state.retiring.as_mut().filter(|s| s.id == id) {
            slot.borrowers = slot.borrowers.saturating_sub(1);
            if slot.borrowers == 0 {
                debug!(session = id, "Retiring session drained");
                return state.retiring.take().map(|s| s.session);
            }
            return None;
        }

        let shutting_down = state.shutting_down;
        if let Some(slot) = state.active.as_mut().filter(|s| s.id == id) {
            slot.borrowers = slot.borrowers.saturating_sub(1);
            if shutting_down && slot.borrowers == 0 {
                return state.active.take().map(|s| s.session);
            }
            return None;
        }

        warn!(session = id, "Released a lease for an unknown session");
        None
    }

    async fn close_session(&self, id: SessionId, session: Arc<dyn BrowserSession>) {
        match session.close().await {
            Ok(()) => info!(session = id, "Closed browser session"),
            Err(e) => warn!(session = id, error = %e, "Browser session closed with error"),
        }
        self.inner.counters.closed.fetch_add(1, Ordering::Relaxed);
    }

    /// Replace the active session with a freshly launched one.
    ///
    /// Returns `Ok(false)` without doing anything when a rotation is already
    /// launching or a previous session is still draining. The old session
    /// keeps serving its current borrowers and closes when the last one releases.
    pub async fn rotate(&self) -> Result<bool, BrowserError> {
        {
            let mut state = self.lock();
            if state.shutting_down {
                return Ok(false);
            }
            if state.rotating || state.retiring.is_some() {
                debug!("Rotation already in progress");
                return Ok(false);
            }
            state.rotating = true;
        }

        info!("Launching replacement browser session");
        let session = match self.inner.launcher.launch().await {
            Ok(session) => session,
            Err(e) => {
                self.lock().rotating = false;
                return Err(e);
            }
        };
        self.inner.counters.launched.fetch_add(1, Ordering::Relaxed);

        let (to_close, rotated) = {
            let mut state = self.lock();
            state.rotating = false;

            if state.shutting_down {
                let id = state.next_id;
                state.next_id += 1;
                (Some((id, session)), false)
            } else {
                let old = state.active.take();
                let new_id = state.install(session);
                state.requests = 0;
                self.inner.counters.rotations.fetch_add(1, Ordering::Relaxed);

                let to_close = match old {
                    Some(old) if old.borrowers == 0 => {
                        info!(new = new_id, old = old.id, "Rotated idle session");
                        Some((old.id, old.session))
                    }
                    Some(old) => {
                        info!(
                            new = new_id,
                            old = old.id,
                            borrowers = old.borrowers,
                            "Rotated session, draining previous"
                        );
                        state.retiring = Some(old);
                        None
                    }
                    None => None,
                };
                (to_close, true)
            }
        };

        if let Some((id, session)) = to_close {
            self.close_session(id, session).await;
        }
        Ok(rotated)
    }

    /// The active session, for probing. Does not count as a borrow.
    pub(crate) fn active_session(&self) -> Option<(SessionId, Arc<dyn BrowserSession>)> {
        self.lock()
            .active
            .as_ref()
            .map(|slot| (slot.id, Arc::clone(&slot.session)))
    }

    /// Register a background task to be stopped on shutdown.
    pub fn register_monitor(&self, handle: JoinHandle<()>) {
        self.inner
            .monitors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(handle);
    }

    /// Stop monitors, refuse new borrows, and close idle sessions.
    ///
    /// Sessions still borrowed close when their last lease is released.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();

        let monitors: Vec<_> = self
            .inner
            .monitors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
            .collect();
        for handle in monitors {
            if let Err(e) = handle.await {
                warn!(error = %e, "Pool monitor ended abnormally");
            }
        }

        let idle = {
            let mut state = self.lock();
            state.shutting_down = true;

            let mut idle = Vec::new();
            if state.active.as_ref().is_some_and(|s| s.borrowers == 0) {
                idle.extend(state.active.take());
            }
            if state.retiring.as_ref().is_some_and(|s| s.borrowers == 0) {
                idle.extend(state.retiring.take());
            }
            idle
        };

        for slot in idle {
            self.close_session(slot.id, slot.session).await;
        }
        info!("Browser pool shut down");
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.lock();
        PoolStats {
            launched: self.inner.counters.launched.load(Ordering::Relaxed),
            closed: self.inner.counters.closed.load(Ordering::Relaxed),
            rotations: self.inner.counters.rotations.load(Ordering::Relaxed),
            active_id: state.active.as_ref().map(|s| s.id),
            active_borrowers: state.active.as_ref().map_or(0, |s| s.borrowers),
            retiring_id: state.retiring.as_ref().map(|s| s.id),
            retiring_borrowers: state.retiring.as_ref().map_or(0, |s| s.borrowers),
            rotating: state.rotating,
        }
    }
}

/// A borrowed session. Released on [`SessionLease::release`] or on drop.
pub struct SessionLease {
    pool: BrowserPool,
    slot: SessionId,
    session: Arc<dyn BrowserSession>,
    released: bool,
}

impl SessionLease {
    /// The pool-assigned id of the borrowed session.
    pub fn session_id(&self) -> SessionId {
        self.slot
    }

    /// Return the session to the pool, closing it here if this was its last
    /// borrower after a rotation.
    pub async fn release(mut self) {
        self.released = true;
        if let Some(session) = self.pool.release_slot(self.slot) {
            self.pool.close_session(self.slot, session).await;
        }
    }
}

impl Deref for SessionLease {
    type Target = dyn BrowserSession;

    fn deref(&self) -> &Self::Target {
        self.session.as_ref()
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        // Unwinding or early-return path: release synchronously, close in the background.
        if let Some(session) = self.pool.release_slot(self.slot) {
            let pool = self.pool.clone();
            let id = self.slot;
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move { pool.close_session(id, session).await });
                }
                Err(_) => warn!(session = id, "No runtime to close drained session"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::PageHandle;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    #[derive(Default)]
    struct StubSession {
        closed: AtomicBool,
        close_calls: AtomicUsize,
    }

    #[async_trait]
    impl BrowserSession for StubSession {
        async fn new_page(&self) -> Result<Arc<dyn PageHandle>, BrowserError> {
            Err(BrowserError::Cdp("stub has no pages".into()))
        }

        async fn probe(&self) -> Result<(), BrowserError> {
            if self.closed.load(Ordering::SeqCst) {
                Err(BrowserError::ProbeFailed("closed".into()))
            } else {
                Ok(())
            }
        }

        async fn close(&self) -> Result<(), BrowserError> {
            self.close_calls.fetch_add(1, Ordering::SeqCst);
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct StubLauncher {
        sessions: Mutex<Vec<Arc<StubSession>>>,
    }

    #[async_trait]
    impl SessionLauncher for StubLauncher {
        async fn launch(&self) -> Result<Arc<dyn BrowserSession>, BrowserError> {
            let session = Arc::new(StubSession::default());
            self.sessions.lock().unwrap().push(Arc::clone(&session));
            Ok(session)
        }
    }

    fn config(max_requests: u32) -> PoolConfig {
        PoolConfig {
            max_requests,
            ..Default::default()
        }
    }

    async fn pool(max_requests: u32) -> (BrowserPool, Arc<StubLauncher>) {
        let launcher = Arc::new(StubLauncher::default());
        let pool = BrowserPool::new(launcher.clone(), config(max_requests))
            .await
            .unwrap();
        (pool, launcher)
    }

    #[tokio::test]
    async fn test_acquire_counts_borrowers() {
        let (pool, _) = pool(100).await;
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_eq!(pool.stats().active_borrowers, 2);
        assert_eq!(a.session_id(), b.session_id());

        a.release().await;
        drop(b);
        assert_eq!(pool.stats().active_borrowers, 0);
    }

    #[tokio::test]
    async fn test_rotate_idle_session_closes_immediately() {
        let (pool, launcher) = pool(100).await;
        assert!(pool.rotate().await.unwrap());

        let stats = pool.stats();
        assert_eq!(stats.launched, 2);
        assert_eq!(stats.closed, 1);
        assert_eq!(stats.retiring_id, None);
        assert!(launcher.sessions.lock().unwrap()[0].closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_retiring_session_closes_after_last_release() {
        let (pool, launcher) = pool(100).await;
        let held = pool.acquire().unwrap();
        let old_id = held.session_id();

        assert!(pool.rotate().await.unwrap());
        let stats = pool.stats();
        assert_eq!(stats.retiring_id, Some(old_id));
        assert_eq!(stats.retiring_borrowers, 1);
        assert_eq!(stats.closed, 0);

        // new borrows go to the replacement
        let fresh = pool.acquire().unwrap();
        assert_ne!(fresh.session_id(), old_id);

        // still usable while borrowed
        assert!(held.probe().await.is_ok());
        held.release().await;

        let stats = pool.stats();
        assert_eq!(stats.retiring_id, None);
        assert_eq!(stats.closed, 1);
        let old = Arc::clone(&launcher.sessions.lock().unwrap()[0]);
        assert_eq!(old.close_calls.load(Ordering::SeqCst), 1);
        fresh.release().await;
    }

    #[tokio::test]
    async fn test_rotate_is_noop_while_draining() {
        let (pool, _) = pool(100).await;
        let held = pool.acquire().unwrap();
        assert!(pool.rotate().await.unwrap());
        assert!(!pool.rotate().await.unwrap());
        assert_eq!(pool.stats().launched, 2);
        held.release().await;
        assert!(pool.rotate().await.unwrap());
        assert_eq!(pool.stats().launched, 3);
    }

    #[tokio::test]
    async fn test_request_threshold_triggers_rotation() {
        let (pool, _) = pool(3).await;
        for _ in 0..3 {
            pool.acquire().unwrap().release().await;
        }

        for _ in 0..50 {
            if pool.stats().rotations == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        let stats = pool.stats();
        assert_eq!(stats.rotations, 1);
        assert_eq!(stats.active_id, Some(1));
    }

    #[tokio::test]
    async fn test_dropped_lease_releases() {
        let (pool, _) = pool(100).await;
        {
            let _lease = pool.acquire().unwrap();
            assert_eq!(pool.stats().active_borrowers, 1);
        }
        assert_eq!(pool.stats().active_borrowers, 0);
    }

    #[tokio::test]
    async fn test_shutdown_refuses_new_borrows_and_drains() {
        let (pool, launcher) = pool(100).await;
        let held = pool.acquire().unwrap();
        pool.shutdown().await;

        assert!(matches!(pool.acquire(), Err(BrowserError::PoolClosed)));
        assert_eq!(pool.stats().closed, 0);

        held.release().await;
        assert_eq!(pool.stats().closed, 1);
        assert!(launcher.sessions.lock().unwrap()[0].closed.load(Ordering::SeqCst));
        assert!(!pool.rotate().await.unwrap());
    }
}
