//! Page export — publishes a finished job's documents to an external
//! destination (estimate first, then the notes).

pub mod confluence;

pub use confluence::ConfluenceExporter;

use async_trait::async_trait;

use crate::error::ExportError;

/// Separator between the estimate and the notes in an exported page.
pub const DOCUMENT_SEPARATOR: &str = "\n\n---\n\n";

/// Combine the two artifacts into one export body, estimate first.
pub fn combine_documents(estimate: &str, notes: &str) -> String {
    format!(
        "{}{}{}",
        estimate.trim_end(),
        DOCUMENT_SEPARATOR,
        notes.trim_start()
    )
}

/// Destination for exported estimate pages.
#[async_trait]
pub trait ExportSink: Send + Sync {
    /// Create a page titled `title` under `destination`.
    ///
    /// Returns the created page's location. A same-titled page already at
    /// the destination is a distinct `Conflict` unless `overwrite` is set.
    async fn create(
        &self,
        destination: &str,
        title: &str,
        body_markdown: &str,
        overwrite: bool,
    ) -> Result<String, ExportError>;
}
