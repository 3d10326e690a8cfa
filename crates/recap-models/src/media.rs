//! Scanned media descriptors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Kind of a scanned media file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Photo,
    Video,
}

impl MediaKind {
    /// Whether this is a still image.
    pub fn is_photo(self) -> bool {
        matches!(self, MediaKind::Photo)
    }

    /// Whether this is a video file.
    pub fn is_video(self) -> bool {
        matches!(self, MediaKind::Video)
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Photo => write!(f, "photo"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// One media file as produced by the external scanner.
///
/// The scanner emits descriptors in chronological order; that ordering is
/// the only ordering the renderer trusts and it is never re-sorted here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaDescriptor {
    /// Absolute path to the source file.
    pub path: PathBuf,
    /// Photo or video.
    pub kind: MediaKind,
    /// Capture timestamp (EXIF or filesystem fallback, scanner's call).
    pub captured_at: DateTime<Utc>,
}

impl MediaDescriptor {
    /// Create a new descriptor.
    pub fn new(path: impl Into<PathBuf>, kind: MediaKind, captured_at: DateTime<Utc>) -> Self {
        Self {
            path: path.into(),
            kind,
            captured_at,
        }
    }
}
