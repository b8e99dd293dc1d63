//! Job runner — drives one item through the estimation pipeline.
//!
//! fetch → notes generation → estimate generation → classification, with a
//! state broadcast before each stage. Errors never escape: every collaborator
//! failure (timeouts included) lands in the job's `error` field and the job
//! goes to `failed` without touching its siblings.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use super::generator::{EstimateGenerator, parse_total_weeks};
use super::model::JobStatus;
use super::session::Session;
use crate::artifacts::{ArtifactKind, ArtifactStore};
use crate::config::SizeBands;
use crate::fetch::ContentFetcher;

/// One item's input, as accepted at submission.
#[derive(Debug, Clone)]
pub struct JobInput {
    /// Slot index inside the session; the runner's exclusive entry.
    pub index: usize,
    pub url: String,
    pub name: String,
    pub ballpark: Option<String>,
}

/// Collaborators shared by every runner in a batch.
pub struct JobDeps {
    pub fetcher: Arc<dyn ContentFetcher>,
    pub generator: EstimateGenerator,
    pub artifacts: Arc<ArtifactStore>,
    pub size_bands: SizeBands,
    pub fetch_timeout: Duration,
    pub llm_timeout: Duration,
}

/// A stage-scoped failure, formatted for the job's `error` field.
struct StageError {
    stage: &'static str,
    message: String,
}

impl StageError {
    fn new(stage: &'static str, message: impl std::fmt::Display) -> Self {
        Self {
            stage,
            message: message.to_string(),
        }
    }
}

impl std::fmt::Display for StageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.stage, self.message)
    }
}

/// Run one job to its terminal state. Never panics, never returns an error.
pub async fn run(session: Arc<Session>, deps: Arc<JobDeps>, input: JobInput) {
    let name = input.name.clone();
    if let Err(e) = execute(&session, &deps, &input).await {
        warn!(
            session_id = %session.id,
            item = %name,
            stage = e.stage,
            error = %e.message,
            "Estimation job failed"
        );
        session
            .update(input.index, |job| {
                job.status = JobStatus::Failed;
                job.error = Some(e.to_string());
                job.progress = Some("Failed".into());
            })
            .await;
    } else {
        info!(session_id = %session.id, item = %name, "Estimation job completed");
    }
}

async fn execute(
    session: &Session,
    deps: &JobDeps,
    input: &JobInput,
) -> Result<(), StageError> {
    // ── Fetch ───────────────────────────────────────────────────────────
    session
        .update(input.index, |job| {
            job.status = JobStatus::Fetching;
            job.progress = Some("Fetching source content".into());
        })
        .await;

    let page = tokio::time::timeout(deps.fetch_timeout, deps.fetcher.fetch(&input.url))
        .await
        .map_err(|_| {
            StageError::new(
                "fetching",
                format!("timed out after {}s", deps.fetch_timeout.as_secs()),
            )
        })?
        .map_err(|e| StageError::new("fetching", e))?;

    // ── Notes generation ────────────────────────────────────────────────
    session
        .update(input.index, |job| {
            job.status = JobStatus::NotesGeneration;
            job.progress = Some("Generating BA estimation notes".into());
        })
        .await;

    let notes = tokio::time::timeout(
        deps.llm_timeout,
        deps.generator.generate_notes(
            &input.url,
            &page.title,
            &page.body_markdown,
            input.ballpark.as_deref(),
        ),
    )
    .await
    .map_err(|_| {
        StageError::new(
            "notes_generation",
            format!("timed out after {}s", deps.llm_timeout.as_secs()),
        )
    })?
    .map_err(|e| StageError::new("notes_generation", e))?;

    deps.artifacts
        .write(session.id, &input.name, ArtifactKind::Notes, &notes)
        .await
        .map_err(|e| StageError::new("notes_generation", e))?;

    // ── Estimate generation ─────────────────────────────────────────────
    session
        .update(input.index, |job| {
            job.notes_ready = true;
            job.status = JobStatus::EstimateGeneration;
            job.progress = Some("Generating PERT estimate".into());
        })
        .await;

    let estimate = tokio::time::timeout(
        deps.llm_timeout,
        deps.generator
            .generate_estimate(&input.url, &notes, input.ballpark.as_deref()),
    )
    .await
    .map_err(|_| {
        StageError::new(
            "estimate_generation",
            format!("timed out after {}s", deps.llm_timeout.as_secs()),
        )
    })?
    .map_err(|e| StageError::new("estimate_generation", e))?;

    deps.artifacts
        .write(session.id, &input.name, ArtifactKind::Estimate, &estimate)
        .await
        .map_err(|e| StageError::new("estimate_generation", e))?;

    // The estimate must carry a rolled-up total; a sheet without one is a
    // content-format failure, not a transport error.
    let weeks = parse_total_weeks(&estimate).ok_or_else(|| {
        StageError::new(
            "estimate_generation",
            "generated estimate contains no parseable total weeks value",
        )
    })?;

    let size_class = deps.size_bands.classify(weeks);

    // ── Completed ───────────────────────────────────────────────────────
    session
        .update(input.index, |job| {
            job.estimate_ready = true;
            job.estimate_value = Some(weeks);
            job.size_class = Some(size_class);
            job.status = JobStatus::Completed;
            job.progress = Some("Completed".into());
        })
        .await;

    Ok(())
}
