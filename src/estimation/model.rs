//! Estimation data model — job states, size classes, batch requests, and
//! the progress frames pushed to WebSocket subscribers.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::artifacts::validate_item_name;
use crate::error::SessionError;

/// Pipeline position of one job.
///
/// Linear forward progression with a failure exit from every non-terminal
/// state; `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Fetching,
    NotesGeneration,
    EstimateGeneration,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// T-shirt size derived from the numeric estimate via the configured bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SizeClass {
    #[serde(rename = "XS")]
    Xs,
    S,
    M,
    L,
    #[serde(rename = "XL")]
    Xl,
    #[serde(rename = "XXL")]
    Xxl,
}

/// Per-item mutable record, owned by exactly one job runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobState {
    pub name: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_class: Option<SizeClass>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimate_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub notes_ready: bool,
    #[serde(default)]
    pub estimate_ready: bool,
}

impl JobState {
    /// A fresh pending job.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: JobStatus::Pending,
            progress: None,
            size_class: None,
            estimate_value: None,
            error: None,
            notes_ready: false,
            estimate_ready: false,
        }
    }

    /// The completed/failed field invariant from the state-machine contract.
    pub fn holds_invariant(&self) -> bool {
        match self.status {
            JobStatus::Completed => {
                self.notes_ready
                    && self.estimate_ready
                    && self.size_class.is_some()
                    && self.estimate_value.is_some_and(|v| v >= 0.0)
                    && self.error.is_none()
            }
            JobStatus::Failed => self.error.as_deref().is_some_and(|e| !e.is_empty()),
            _ => self.error.is_none() && self.size_class.is_none(),
        }
    }
}

/// One item of a batch submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItem {
    pub url: String,
    pub name: String,
    /// Optional free-text ballpark hint, passed through to generation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ballpark: Option<String>,
}

/// A batch submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    pub items: Vec<BatchItem>,
}

impl BatchRequest {
    /// Submission-time validation; failures never create a session.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.items.is_empty() {
            return Err(SessionError::Validation("items must not be empty".into()));
        }
        let mut seen = std::collections::HashSet::new();
        for item in &self.items {
            if item.url.trim().is_empty() {
                return Err(SessionError::Validation(format!(
                    "item {:?} is missing a url",
                    item.name
                )));
            }
            if validate_item_name(&item.name).is_err() {
                return Err(SessionError::Validation(format!(
                    "invalid item name {:?}",
                    item.name
                )));
            }
            if !seen.insert(item.name.as_str()) {
                return Err(SessionError::Validation(format!(
                    "duplicate item name {:?}",
                    item.name
                )));
            }
        }
        Ok(())
    }
}

/// Reply to a batch submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResponse {
    pub session_id: Uuid,
}

/// Full snapshot of one session, in submission order.
///
/// The same frame serves as WebSocket push and REST snapshot body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressFrame {
    pub session_id: Uuid,
    pub results: Vec<JobState>,
}
