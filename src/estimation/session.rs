//! Session registry — slot-per-job state with per-session broadcast.
//!
//! Each job owns exactly one slot; runners never touch another job's entry,
//! so readers (snapshot, broadcast) only contend with the single slot being
//! updated. Sessions live in an injected store and are swept out once every
//! job is terminal, nobody is subscribed, and the idle window has passed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info};
use uuid::Uuid;

use super::model::{JobState, ProgressFrame};
use crate::artifacts::ArtifactStore;

/// Broadcast capacity per session; laggards are re-synced with the latest
/// snapshot rather than replayed.
const BROADCAST_CAPACITY: usize = 256;

/// One batch submission's worth of jobs.
pub struct Session {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    slots: Vec<RwLock<JobState>>,
    tx: broadcast::Sender<ProgressFrame>,
    touched: RwLock<DateTime<Utc>>,
}

impl Session {
    fn new(id: Uuid, names: Vec<String>) -> Self {
        let (tx, _rx) = broadcast::channel(BROADCAST_CAPACITY);
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            slots: names.into_iter().map(|n| RwLock::new(JobState::new(n))).collect(),
            tx,
            touched: RwLock::new(now),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Current state of every job, in submission order.
    pub async fn snapshot(&self) -> Vec<JobState> {
        let reads = futures::future::join_all(self.slots.iter().map(|slot| slot.read())).await;
        reads.into_iter().map(|job| job.clone()).collect()
    }

    /// Current snapshot wrapped as a progress frame.
    pub async fn frame(&self) -> ProgressFrame {
        ProgressFrame {
            session_id: self.id,
            results: self.snapshot().await,
        }
    }

    /// Register a progress subscriber. Each WS client calls this.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressFrame> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Mutate one job's slot, then broadcast the full snapshot.
    ///
    /// Callers own their index for the session's lifetime; the slot write
    /// lock is released before the snapshot is taken.
    pub async fn update<F>(&self, index: usize, mutate: F)
    where
        F: FnOnce(&mut JobState),
    {
        {
            let mut slot = self.slots[index].write().await;
            mutate(&mut slot);
        }
        *self.touched.write().await = Utc::now();
        self.publish().await;
    }

    /// Broadcast the current snapshot — ok if nobody is listening.
    pub async fn publish(&self) {
        let _ = self.tx.send(self.frame().await);
    }

    /// Look up one job's current state by item name.
    pub async fn job_by_name(&self, name: &str) -> Option<JobState> {
        for slot in &self.slots {
            let job = slot.read().await;
            if job.name == name {
                return Some(job.clone());
            }
        }
        None
    }

    /// Whether every job has reached a terminal state.
    pub async fn all_terminal(&self) -> bool {
        for slot in &self.slots {
            if !slot.read().await.status.is_terminal() {
                return false;
            }
        }
        true
    }

    async fn idle_since(&self) -> DateTime<Utc> {
        *self.touched.read().await
    }
}

/// In-memory session registry, keyed by session id.
pub struct SessionStore {
    sessions: RwLock<HashMap<Uuid, Arc<Session>>>,
}

impl SessionStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
        })
    }

    /// Allocate a session with one pending slot per name, in order.
    pub async fn create(&self, names: Vec<String>) -> Arc<Session> {
        let id = Uuid::new_v4();
        let session = Arc::new(Session::new(id, names));
        self.sessions.write().await.insert(id, Arc::clone(&session));
        info!(session_id = %id, jobs = session.len(), "Session created");
        session
    }

    pub async fn get(&self, id: Uuid) -> Option<Arc<Session>> {
        self.sessions.read().await.get(&id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Evict sessions that are all-terminal, unobserved, and idle.
    /// Returns the evicted ids so callers can clean up artifacts.
    pub async fn evict_idle(&self, idle_timeout: Duration) -> Vec<Uuid> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(idle_timeout).unwrap_or(chrono::Duration::zero());

        let candidates: Vec<Arc<Session>> =
            self.sessions.read().await.values().cloned().collect();

        let mut evicted = Vec::new();
        for session in candidates {
            if session.subscriber_count() == 0
                && session.idle_since().await <= cutoff
                && session.all_terminal().await
            {
                evicted.push(session.id);
            }
        }

        if !evicted.is_empty() {
            let mut sessions = self.sessions.write().await;
            for id in &evicted {
                sessions.remove(id);
                debug!(session_id = %id, "Session evicted");
            }
        }
        evicted
    }
}

/// Spawn a background task that periodically evicts idle sessions and
/// removes their artifacts.
pub fn spawn_eviction_task(
    store: Arc<SessionStore>,
    artifacts: Arc<ArtifactStore>,
    idle_timeout: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            let evicted = store.evict_idle(idle_timeout).await;
            for id in evicted {
                if let Err(e) = artifacts.remove_session(id).await {
                    tracing::warn!(session_id = %id, error = %e, "Failed to remove session artifacts");
                }
            }
        }
    })
}
