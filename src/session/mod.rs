use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::error::{BridgeError, Result};
use crate::sandbox::SandboxRuntime;

/// The orchestrator's record of a provisioned sandbox.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxSession {
    /// Session identifier, `sandbox-<unix millis>`
    pub session_id: String,
    /// Public URL of the exposed dev-server port
    pub url: String,
    /// Handle of the dev-server process
    pub process_id: String,
    /// Dev-server port inside the sandbox
    pub port: u16,
    pub created_at: DateTime<Utc>,
    /// Pushed forward on every operation against the session
    pub expires_at: DateTime<Utc>,
}

impl SandboxSession {
    pub fn new(
        session_id: String,
        url: String,
        process_id: String,
        port: u16,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            url,
            process_id,
            port,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    /// Check if session has expired
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Extend the expiry by `ttl` from now
    pub fn touch(&mut self, ttl: Duration) {
        self.expires_at = Utc::now() + ttl;
    }
}

/// Workspace-relative paths known to exist in the active sandbox.
#[derive(Debug, Clone, Default)]
pub struct FileRegistry {
    paths: BTreeSet<String>,
}

impl FileRegistry {
    pub fn extend<I, S>(&mut self, paths: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.paths.extend(paths.into_iter().map(Into::into));
    }

    pub fn clear(&mut self) {
        self.paths.clear();
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Sorted list of paths
    pub fn to_vec(&self) -> Vec<String> {
        self.paths.iter().cloned().collect()
    }
}

/// A committed session together with the sandbox it runs in.
#[derive(Clone)]
pub struct ActiveSession {
    pub session: SandboxSession,
    pub runtime: Arc<dyn SandboxRuntime>,
}

impl ActiveSession {
    /// Best-effort termination of the dev server and the sandbox itself.
    pub async fn terminate(&self) {
        let id = &self.session.session_id;
        if let Err(e) = self.runtime.kill_process(&self.session.process_id).await {
            warn!(session_id = %id, error = %e, "Failed to stop dev server");
        }
        if let Err(e) = self.runtime.shutdown().await {
            warn!(session_id = %id, error = %e, "Failed to shut down sandbox");
        }
        info!(session_id = %id, "Sandbox terminated");
    }
}

#[derive(Default)]
struct StoreState {
    sessions: HashMap<String, ActiveSession>,
    active: Option<String>,
    files: FileRegistry,
}

impl StoreState {
    fn detach_active(&mut self) -> Option<ActiveSession> {
        let id = self.active.take()?;
        self.files.clear();
        self.sessions.remove(&id)
    }
}

/// Owns the single active sandbox slot.
///
/// All mutation goes through this store. `begin_creation` hands out a guard
/// that serializes provisioning, so two creates never interleave; the state
/// lock itself is only held for bookkeeping and never across remote calls.
pub struct SessionStore {
    state: Mutex<StoreState>,
    creation: Mutex<()>,
    last_id_millis: AtomicI64,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            creation: Mutex::new(()),
            last_id_millis: AtomicI64::new(0),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Wait for any in-flight creation to finish and block new ones until
    /// the returned guard is dropped.
    pub async fn begin_creation(&self) -> MutexGuard<'_, ()> {
        self.creation.lock().await
    }

    /// Generate a `sandbox-<millis>` id that never repeats within this
    /// process, even for creations in the same millisecond.
    pub fn generate_session_id(&self) -> String {
        let now = Utc::now().timestamp_millis();
        let mut last = self.last_id_millis.load(Ordering::SeqCst);
        loop {
            let next = now.max(last + 1);
            match self.last_id_millis.compare_exchange(
                last,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return format!("sandbox-{}", next),
                Err(actual) => last = actual,
            }
        }
    }

    /// Detach the active session (if any) and clear the file registry.
    /// The caller decides whether to terminate the detached session.
    pub async fn take_active(&self) -> Option<ActiveSession> {
        let mut state = self.state.lock().await;
        let detached = state.detach_active();
        state.files.clear();
        detached
    }

    /// Store a freshly provisioned session as the active one and seed the
    /// registry. Returns whatever was active before, which only happens if a
    /// caller skipped `take_active`.
    pub async fn commit<I, S>(&self, active: ActiveSession, files: I) -> Option<ActiveSession>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.state.lock().await;
        let replaced = state.detach_active();
        let id = active.session.session_id.clone();
        state.sessions.insert(id.clone(), active);
        state.active = Some(id.clone());
        state.files.extend(files);
        debug!(session_id = %id, files = state.files.len(), "Session committed");
        replaced
    }

    /// Snapshot of the active session, without touching its expiry.
    pub async fn active(&self) -> Option<ActiveSession> {
        let state = self.state.lock().await;
        state
            .active
            .as_ref()
            .and_then(|id| state.sessions.get(id))
            .cloned()
    }

    /// Return the active session for an operation, extending its expiry.
    /// An expired session is detached, terminated and reported as such.
    pub async fn require_active(&self) -> Result<ActiveSession> {
        let expired = {
            let mut state = self.state.lock().await;
            let ttl = self.ttl;
            let Some(id) = state.active.clone() else {
                return Err(BridgeError::NoActiveSession);
            };
            let Some(active) = state.sessions.get_mut(&id) else {
                return Err(BridgeError::NoActiveSession);
            };
            if !active.session.is_expired() {
                active.session.touch(ttl);
                return Ok(active.clone());
            }
            state.detach_active()
        };

        match expired {
            Some(active) => {
                let id = active.session.session_id.clone();
                info!(session_id = %id, "Active sandbox expired");
                active.terminate().await;
                Err(BridgeError::SessionExpired { id })
            }
            None => Err(BridgeError::NoActiveSession),
        }
    }

    /// Detach and terminate the active session.
    pub async fn destroy(&self) -> Option<SandboxSession> {
        let active = self.take_active().await?;
        active.terminate().await;
        Some(active.session)
    }

    /// Record paths written into the workspace of `session_id`. Nothing is
    /// recorded, and `false` returned, once that session is no longer active.
    pub async fn record_files<I, S>(&self, session_id: &str, paths: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.state.lock().await;
        if state.active.as_deref() != Some(session_id) {
            return false;
        }
        state.files.extend(paths);
        true
    }

    pub async fn files(&self) -> Vec<String> {
        self.state.lock().await.files.to_vec()
    }
}
