//! File-backed artifact store.
//!
//! Two generated documents per job, laid out as
//! `<root>/<session_id>/<item_name>/<kind>.md`. Sessions are ephemeral;
//! the whole per-session subtree is removed when the session is evicted.

use std::path::{Path, PathBuf};

use tokio::fs;
use uuid::Uuid;

use crate::error::ArtifactError;

/// The two documents generated for each job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Notes,
    Estimate,
}

impl ArtifactKind {
    /// File name under the item directory.
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Notes => "notes.md",
            Self::Estimate => "estimate.md",
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Notes => write!(f, "notes"),
            Self::Estimate => write!(f, "estimate"),
        }
    }
}

impl std::str::FromStr for ArtifactKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "notes" => Ok(Self::Notes),
            "estimate" => Ok(Self::Estimate),
            _ => Err(format!("Unknown artifact kind: {}", s)),
        }
    }
}

/// File-backed store for generated documents.
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn item_dir(&self, session_id: Uuid, name: &str) -> PathBuf {
        self.root.join(session_id.to_string()).join(name)
    }

    /// Write (overwrite) one artifact. Creates parent directories.
    pub async fn write(
        &self,
        session_id: Uuid,
        name: &str,
        kind: ArtifactKind,
        content: &str,
    ) -> Result<(), ArtifactError> {
        validate_item_name(name)?;
        let dir = self.item_dir(session_id, name);
        fs::create_dir_all(&dir).await?;
        fs::write(dir.join(kind.file_name()), content).await?;
        Ok(())
    }

    /// Read one artifact, not-found if it was never written.
    pub async fn read(
        &self,
        session_id: Uuid,
        name: &str,
        kind: ArtifactKind,
    ) -> Result<String, ArtifactError> {
        validate_item_name(name)?;
        let path = self.item_dir(session_id, name).join(kind.file_name());
        if !path.exists() {
            return Err(ArtifactError::NotFound {
                session_id,
                name: name.to_string(),
                kind: kind.to_string(),
            });
        }
        Ok(fs::read_to_string(&path).await?)
    }

    /// Whether the artifact has been durably written.
    pub async fn exists(&self, session_id: Uuid, name: &str, kind: ArtifactKind) -> bool {
        if validate_item_name(name).is_err() {
            return false;
        }
        self.item_dir(session_id, name)
            .join(kind.file_name())
            .exists()
    }

    /// Remove every artifact belonging to a session.
    pub async fn remove_session(&self, session_id: Uuid) -> Result<(), ArtifactError> {
        let dir = self.root.join(session_id.to_string());
        if dir.exists() {
            fs::remove_dir_all(&dir).await?;
        }
        Ok(())
    }
}

/// Item names become path components; reject anything that could escape.
pub fn validate_item_name(name: &str) -> Result<(), ArtifactError> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
    {
        return Err(ArtifactError::InvalidName(name.to_string()));
    }
    if Path::new(name).components().count() != 1 {
        return Err(ArtifactError::InvalidName(name.to_string()));
    }
    Ok(())
}
