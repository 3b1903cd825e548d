//! Session/lock based leader election.
//!
//! A leadership key is observed with blocking reads; each poll cycle makes
//! exactly one decision from the observed holder: renew our session when we
//! hold the lock, attempt acquisition when the key is free, stand down when
//! another session holds it. Acquisition and renewal are never chosen from a
//! cached leadership flag, so there is no window between checking and
//! acting within a cycle.
//!
//! Leadership gates a set of managed routes: followers keep their routes
//! suspended, the leader resumes them. The suspended set is only mutated
//! inside the poll-completion handler, under a single lock.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::{BlockingQuery, ConsulClient};
use crate::error::{ConsulError, Result};

/// Leadership status of one election instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadershipStatus {
    Leader,
    Follower,
    /// Election not yet decided (startup, or session trouble).
    Unknown,
}

/// A route whose consumer can be suspended while this instance is not the
/// leader. The host framework owns the actual consumer lifecycle; this seam
/// only carries the suspend/resume signal.
#[async_trait]
pub trait SuspendableRoute: Send + Sync {
    fn id(&self) -> &str;
    async fn suspend(&self);
    async fn resume(&self);
}

/// What one blocking observation of the leadership key reported.
#[derive(Debug, Clone)]
pub struct LockObservation {
    /// Session currently holding the advisory lock, if any.
    pub holder: Option<String>,
    pub index: u64,
}

/// Session and advisory-lock operations the election runs against.
#[async_trait]
pub trait LockService: Send + Sync + 'static {
    async fn create_session(&self, name: &str, ttl: Duration) -> anyhow::Result<String>;
    async fn renew_session(&self, session: &str) -> anyhow::Result<()>;
    async fn destroy_session(&self, session: &str) -> anyhow::Result<()>;
    async fn acquire(&self, key: &str, session: &str) -> anyhow::Result<bool>;
    async fn release(&self, key: &str, session: &str) -> anyhow::Result<bool>;

    /// Block until the key changes past `index` or `block` elapses, then
    /// report the current holder.
    async fn observe(&self, key: &str, index: u64, block: Duration)
        -> anyhow::Result<LockObservation>;
}

#[async_trait]
impl LockService for ConsulClient {
    async fn create_session(&self, name: &str, ttl: Duration) -> anyhow::Result<String> {
        Ok(ConsulClient::create_session(self, name, ttl).await?)
    }

    async fn renew_session(&self, session: &str) -> anyhow::Result<()> {
        Ok(ConsulClient::renew_session(self, session).await?)
    }

    async fn destroy_session(&self, session: &str) -> anyhow::Result<()> {
        Ok(ConsulClient::destroy_session(self, session).await?)
    }

    async fn acquire(&self, key: &str, session: &str) -> anyhow::Result<bool> {
        Ok(self.acquire_lock(key, session).await?)
    }

    async fn release(&self, key: &str, session: &str) -> anyhow::Result<bool> {
        Ok(self.release_lock(key, session).await?)
    }

    async fn observe(
        &self,
        key: &str,
        index: u64,
        block: Duration,
    ) -> anyhow::Result<LockObservation> {
        let query = BlockingQuery { index, wait: block };
        let page = self.get_value(key, Some(&query)).await?;
        let holder = page.value.into_iter().next().and_then(|pair| pair.session);
        Ok(LockObservation {
            holder,
            index: page.index,
        })
    }
}

/// Settings for one election instance.
#[derive(Debug, Clone)]
pub struct LeaderElectionConfig {
    /// Service the leadership key belongs to.
    pub service_name: String,

    /// Session time-to-live. The leadership key is observed with a block
    /// duration of a third of this, so the session is renewed well inside
    /// its lease.
    pub ttl: Duration,

    /// Index the first observation is issued with.
    pub first_index: u64,
}

impl LeaderElectionConfig {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ttl: Duration::from_secs(60),
            first_index: 0,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn leadership_key(&self) -> String {
        format!("service/{}/leader", self.service_name)
    }
}

#[derive(Default)]
struct RouteState {
    managed: Vec<Arc<dyn SuspendableRoute>>,
    suspended: HashSet<String>,
}

pub struct LeaderElection {
    lock: Arc<dyn LockService>,
    config: LeaderElectionConfig,
    key: String,
    session: Mutex<Option<String>>,
    leader: AtomicBool,
    running: AtomicBool,
    index: AtomicU64,
    routes: Mutex<RouteState>,
    status_tx: watch::Sender<LeadershipStatus>,
    status_rx: watch::Receiver<LeadershipStatus>,
}

impl LeaderElection {
    pub fn new(lock: Arc<dyn LockService>, config: LeaderElectionConfig) -> Arc<Self> {
        let key = config.leadership_key();
        let first_index = config.first_index;
        let (status_tx, status_rx) = watch::channel(LeadershipStatus::Unknown);

        Arc::new(Self {
            lock,
            config,
            key,
            session: Mutex::new(None),
            leader: AtomicBool::new(false),
            running: AtomicBool::new(false),
            index: AtomicU64::new(first_index),
            routes: Mutex::new(RouteState::default()),
            status_tx,
            status_rx,
        })
    }

    pub fn is_leader(&self) -> bool {
        self.leader.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> LeadershipStatus {
        *self.status_rx.borrow()
    }

    /// Subscribe to leadership changes.
    pub fn subscribe(&self) -> watch::Receiver<LeadershipStatus> {
        self.status_rx.clone()
    }

    /// Put a route under this election's control. Routes managed while not
    /// leader are suspended immediately.
    pub async fn manage_route(&self, route: Arc<dyn SuspendableRoute>) {
        let mut routes = self.routes.lock().await;
        if !self.is_leader() {
            route.suspend().await;
            routes.suspended.insert(route.id().to_string());
        }
        routes.managed.push(route);
    }

    pub fn start(self: Arc<Self>) -> Result<JoinHandle<()>> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ConsulError::AlreadyRunning);
        }

        Ok(tokio::spawn(async move { self.run().await }))
    }

    /// Stop the election and destroy the session, releasing a held lock
    /// server-side. Managed routes are left as they are.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);

        let session = self.session.lock().await.take();
        if let Some(session) = session {
            if let Err(e) = self.lock.destroy_session(&session).await {
                warn!(session = %session, error = %e, "failed to destroy session");
            }
        }

        self.leader.store(false, Ordering::SeqCst);
        self.set_status(LeadershipStatus::Follower);
        info!(key = %self.key, "leader election stopped");
    }

    async fn run(self: Arc<Self>) {
        let block = self.config.ttl / 3;
        info!(key = %self.key, ttl_ms = self.config.ttl.as_millis() as u64, "leader election started");

        while self.running.load(Ordering::SeqCst) {
            let session = match self.ensure_session().await {
                Some(session) => session,
                None => {
                    tokio::time::sleep(block).await;
                    continue;
                }
            };

            let since = self.index.load(Ordering::SeqCst);
            let observation = match self.lock.observe(&self.key, since, block).await {
                Ok(observation) => observation,
                Err(e) => {
                    if !self.running.load(Ordering::SeqCst) {
                        break;
                    }
                    warn!(key = %self.key, error = %e, "observation failed, retrying");
                    tokio::time::sleep(block).await;
                    continue;
                }
            };

            // Stopped while the observation was in flight: discard.
            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            self.decide(&session, observation.holder.as_deref()).await;
            self.index.fetch_max(observation.index, Ordering::SeqCst);
        }
    }

    async fn ensure_session(&self) -> Option<String> {
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.as_ref() {
            return Some(session.clone());
        }

        match self
            .lock
            .create_session(&self.config.service_name, self.config.ttl)
            .await
        {
            Ok(session) => {
                debug!(session = %session, "created session");
                *guard = Some(session.clone());
                Some(session)
            }
            Err(e) => {
                warn!(error = %e, "failed to create session");
                None
            }
        }
    }

    /// The single decision step of one poll cycle.
    async fn decide(&self, session: &str, holder: Option<&str>) {
        match holder {
            // We hold the lock: renew the lease.
            Some(holder) if holder == session => match self.lock.renew_session(session).await {
                Ok(()) => self.promote().await,
                Err(e) => {
                    warn!(session = %session, error = %e, "session renewal failed, standing down");
                    *self.session.lock().await = None;
                    self.demote().await;
                }
            },
            // Held by someone else.
            Some(_) => self.demote().await,
            // Free: try to take it.
            None => match self.lock.acquire(&self.key, session).await {
                Ok(true) => self.promote().await,
                Ok(false) => self.demote().await,
                Err(e) => {
                    warn!(session = %session, error = %e, "lock acquisition failed");
                    *self.session.lock().await = None;
                    self.demote().await;
                }
            },
        }
    }

    async fn promote(&self) {
        let mut routes = self.routes.lock().await;

        if !self.leader.swap(true, Ordering::SeqCst) {
            info!(key = %self.key, "became leader");
            self.set_status(LeadershipStatus::Leader);
        }

        let state = &mut *routes;
        for route in &state.managed {
            if state.suspended.remove(route.id()) {
                debug!(route = route.id(), "resuming route");
                route.resume().await;
            }
        }
    }

    async fn demote(&self) {
        let mut routes = self.routes.lock().await;

        if self.leader.swap(false, Ordering::SeqCst) {
            info!(key = %self.key, "lost leadership");
        }
        self.set_status(LeadershipStatus::Follower);

        let state = &mut *routes;
        for route in &state.managed {
            if !state.suspended.contains(route.id()) {
                debug!(route = route.id(), "suspending route");
                route.suspend().await;
                state.suspended.insert(route.id().to_string());
            }
        }
    }

    fn set_status(&self, status: LeadershipStatus) {
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}

// ============================================================================
// In-memory lock service
// ============================================================================

#[derive(Default)]
struct InMemoryState {
    sessions: HashSet<String>,
    holders: HashMap<String, String>,
    failing_renewals: HashSet<String>,
    index: u64,
}

/// In-process [`LockService`] for embedded use and tests. Session expiry is
/// driven explicitly through [`InMemoryLockService::expire_session`] rather
/// than by a timer.
pub struct InMemoryLockService {
    state: parking_lot::Mutex<InMemoryState>,
}

impl InMemoryLockService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: parking_lot::Mutex::new(InMemoryState {
                // Non-zero so a first observation at index 0 returns
                // immediately, like a populated remote store.
                index: 1,
                ..Default::default()
            }),
        })
    }

    /// Expire a session: renewals start failing and its locks are released.
    pub fn expire_session(&self, session: &str) {
        let mut state = self.state.lock();
        state.sessions.remove(session);
        state.failing_renewals.remove(session);
        state.holders.retain(|_, holder| holder != session);
        state.index += 1;
    }

    /// Make renewals fail for a session without releasing its locks yet.
    pub fn fail_renewals_for(&self, session: &str) {
        self.state.lock().failing_renewals.insert(session.to_string());
    }

    /// Current holder of a key, for inspection.
    pub fn holder(&self, key: &str) -> Option<String> {
        self.state.lock().holders.get(key).cloned()
    }
}

#[async_trait]
impl LockService for InMemoryLockService {
    async fn create_session(&self, _name: &str, _ttl: Duration) -> anyhow::Result<String> {
        let session = Uuid::new_v4().to_string();
        self.state.lock().sessions.insert(session.clone());
        Ok(session)
    }

    async fn renew_session(&self, session: &str) -> anyhow::Result<()> {
        let state = self.state.lock();
        if !state.sessions.contains(session) || state.failing_renewals.contains(session) {
            anyhow::bail!("session {session} expired");
        }
        Ok(())
    }

    async fn destroy_session(&self, session: &str) -> anyhow::Result<()> {
        self.expire_session(session);
        Ok(())
    }

    async fn acquire(&self, key: &str, session: &str) -> anyhow::Result<bool> {
        let mut state = self.state.lock();
        if !state.sessions.contains(session) {
            anyhow::bail!("invalid session {session}");
        }

        match state.holders.get(key) {
            Some(holder) if holder == session => Ok(true),
            Some(_) => Ok(false),
            None => {
                state.holders.insert(key.to_string(), session.to_string());
                state.index += 1;
                Ok(true)
            }
        }
    }

    async fn release(&self, key: &str, session: &str) -> anyhow::Result<bool> {
        let mut state = self.state.lock();
        if state.holders.get(key).map(String::as_str) == Some(session) {
            state.holders.remove(key);
            state.index += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn observe(
        &self,
        key: &str,
        index: u64,
        block: Duration,
    ) -> anyhow::Result<LockObservation> {
        let deadline = tokio::time::Instant::now() + block;
        loop {
            {
                let state = self.state.lock();
                if state.index > index {
                    return Ok(LockObservation {
                        holder: state.holders.get(key).cloned(),
                        index: state.index,
                    });
                }
            }

            if tokio::time::Instant::now() >= deadline {
                let state = self.state.lock();
                return Ok(LockObservation {
                    holder: state.holders.get(key).cloned(),
                    index: state.index,
                });
            }

            // Polling granularity is fine for an in-process fake.
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}
