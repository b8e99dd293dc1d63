//! Batch orchestrator — session creation and concurrent job dispatch.

use std::sync::Arc;

use tokio::sync::{Semaphore, broadcast};
use tracing::info;
use uuid::Uuid;

use super::model::{BatchRequest, JobState, ProgressFrame};
use super::runner::{self, JobDeps, JobInput};
use super::session::SessionStore;
use crate::error::SessionError;

/// Accepts batches, owns the session registry, and fans jobs out.
pub struct Orchestrator {
    sessions: Arc<SessionStore>,
    deps: Arc<JobDeps>,
    semaphore: Arc<Semaphore>,
}

impl Orchestrator {
    pub fn new(sessions: Arc<SessionStore>, deps: Arc<JobDeps>, max_parallel_jobs: usize) -> Arc<Self> {
        Arc::new(Self {
            sessions,
            deps,
            semaphore: Arc::new(Semaphore::new(max_parallel_jobs.max(1))),
        })
    }

    /// Validate and launch a batch. Returns as soon as the session exists;
    /// no job has to make progress first.
    ///
    /// Jobs are admitted in submission order through a FIFO permit queue —
    /// the parallelism bound only delays starts, it never reorders or drops.
    pub async fn submit(&self, request: BatchRequest) -> Result<Uuid, SessionError> {
        request.validate()?;

        let names: Vec<String> = request.items.iter().map(|i| i.name.clone()).collect();
        let session = self.sessions.create(names).await;
        let session_id = session.id;

        // Everyone starts pending; let early subscribers see the batch shape.
        session.publish().await;

        let inputs: Vec<JobInput> = request
            .items
            .into_iter()
            .enumerate()
            .map(|(index, item)| JobInput {
                index,
                url: item.url,
                name: item.name,
                ballpark: item.ballpark,
            })
            .collect();

        info!(session_id = %session_id, jobs = inputs.len(), "Batch submitted");

        let deps = Arc::clone(&self.deps);
        let semaphore = Arc::clone(&self.semaphore);
        tokio::spawn(async move {
            for input in inputs {
                let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                    break;
                };
                let session = Arc::clone(&session);
                let deps = Arc::clone(&deps);
                tokio::spawn(async move {
                    let _permit = permit;
                    runner::run(session, deps, input).await;
                });
            }
        });

        Ok(session_id)
    }

    /// Current state of every job, in submission order.
    pub async fn snapshot(&self, session_id: Uuid) -> Result<ProgressFrame, SessionError> {
        let session = self
            .sessions
            .get(session_id)
            .await
            .ok_or(SessionError::NotFound(session_id))?;
        Ok(session.frame().await)
    }

    /// Current snapshot plus a live receiver for subsequent changes.
    pub async fn subscribe(
        &self,
        session_id: Uuid,
    ) -> Result<(ProgressFrame, broadcast::Receiver<ProgressFrame>), SessionError> {
        let session = self
            .sessions
            .get(session_id)
            .await
            .ok_or(SessionError::NotFound(session_id))?;
        let rx = session.subscribe();
        Ok((session.frame().await, rx))
    }

    /// One job's current state, by item name.
    pub async fn job_state(&self, session_id: Uuid, name: &str) -> Result<JobState, SessionError> {
        let session = self
            .sessions
            .get(session_id)
            .await
            .ok_or(SessionError::NotFound(session_id))?;
        session
            .job_by_name(name)
            .await
            .ok_or_else(|| SessionError::ItemNotFound {
                session_id,
                name: name.to_string(),
            })
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.sessions
    }
}
