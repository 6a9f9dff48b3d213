//! Capture results and their delivery.

use crate::error::CaptureError;
use crate::strategy::StrategyKind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// The assembled document of a successful capture run.
#[derive(Debug, Clone, Serialize)]
pub struct CaptureOutput {
    /// The PDF bytes.
    #[serde(skip)]
    pub pdf: Vec<u8>,
    /// Suggested file name, including `.pdf`.
    pub filename: String,
    pub page_count: u32,
    /// Strategy that produced the pages.
    pub strategy: StrategyKind,
    pub stats: CaptureStats,
}

/// Timing and fallback details of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureStats {
    pub total_duration_ms: u64,
    /// Time spent in image sources, including a failed first strategy.
    pub capture_duration_ms: u64,
    pub assembly_duration_ms: u64,
    /// Why the direct-link strategy was abandoned, if it was.
    pub fallback_reason: Option<String>,
    pub pdf_bytes: u64,
}

/// Destination for finished documents.
#[async_trait]
pub trait DocumentSink: Send + Sync {
    /// Store `pdf` under `filename`, returning where it ended up.
    async fn save(&self, filename: &str, pdf: &[u8]) -> Result<PathBuf, CaptureError>;
}

/// Writes documents into a directory.
///
/// Each file is written to a `.tmp` sibling first and renamed into place, so
/// a reader never sees a half-written PDF. An existing file with the same name
/// is replaced.
#[derive(Debug, Clone)]
pub struct FileSink {
    dir: PathBuf,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl DocumentSink for FileSink {
    async fn save(&self, filename: &str, pdf: &[u8]) -> Result<PathBuf, CaptureError> {
        let path = self.dir.join(filename);
        let write_err = |e| CaptureError::OutputWriteFailed {
            path: path.clone(),
            source: e,
        };

        tokio::fs::create_dir_all(&self.dir).await.map_err(write_err)?;

        let tmp_path = path.with_extension("pdf.tmp");
        tokio::fs::write(&tmp_path, pdf).await.map_err(write_err)?;
        tokio::fs::rename(&tmp_path, &path).await.map_err(write_err)?;

        info!("Wrote {} ({} bytes)", path.display(), pdf.len());
        Ok(path)
    }
}
