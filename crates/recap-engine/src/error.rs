//! Error types for the render pipeline.

use std::path::PathBuf;
use thiserror::Error;

use crate::timeline::TimelineError;
use recap_media::MediaError;

/// Result type for render operations.
pub type RenderResult<T> = Result<T, RenderError>;

/// Errors surfaced by a render job.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("no media items to render")]
    NoMedia,

    #[error("source file not found: {0}")]
    SourceMissing(PathBuf),

    #[error("source file is empty: {0}")]
    EmptySource(PathBuf),

    #[error("background music not found: {0}")]
    BgmMissing(PathBuf),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Timeline(#[from] TimelineError),

    #[error("fallback renderer failed: {0}")]
    FallbackFailed(String),

    #[error("render cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RenderError {
    /// Whether the failure came from the external toolchain being absent.
    pub fn is_toolchain_missing(&self) -> bool {
        matches!(self, Self::Media(e) if e.is_toolchain_missing())
    }
}
