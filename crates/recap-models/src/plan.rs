//! Timeline clip plans and allocation parameters.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::media::MediaKind;

/// Default on-screen seconds for a photo.
pub const DEFAULT_PHOTO_SECONDS: f64 = 2.5;
/// Default cap for a video clip's planned duration.
pub const DEFAULT_VIDEO_MAX_SECONDS: f64 = 5.0;
/// Default cap for a photo clip's planned duration.
pub const DEFAULT_PHOTO_MAX_SECONDS: f64 = 6.0;
/// Default weight of a video relative to a photo in weighted mode.
pub const DEFAULT_VIDEO_WEIGHT: f64 = 2.0;
/// Clips shorter than this are not representable and get dropped.
pub const MIN_CLIP_SECONDS: f64 = 0.1;

/// One media item plus its allocated on-screen duration.
///
/// Mutable during allocation only; once the allocator returns, the list is
/// frozen and consumed strictly in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipPlan {
    /// Source file path.
    pub path: PathBuf,
    /// Photo or video.
    pub kind: MediaKind,
    /// Allocated duration in seconds, always > 0 in allocator output.
    pub duration: f64,
}

impl ClipPlan {
    /// Create a new clip plan.
    pub fn new(path: impl Into<PathBuf>, kind: MediaKind, duration: f64) -> Self {
        Self {
            path: path.into(),
            kind,
            duration,
        }
    }
}

/// How the allocator splits the target runtime across clips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimelineMode {
    /// Fixed seeds per kind, then trim or redistribute.
    #[default]
    Even,
    /// Distribute the target proportionally to per-item weights.
    Weighted,
    /// Keep true video durations, photos share what is left.
    PreserveVideos,
}

impl fmt::Display for TimelineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimelineMode::Even => write!(f, "even"),
            TimelineMode::Weighted => write!(f, "weighted"),
            TimelineMode::PreserveVideos => write!(f, "preserve-videos"),
        }
    }
}

/// Allocation parameters, one set per render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineParams {
    /// Total runtime the plans must sum to.
    pub target_seconds: f64,
    /// Seed duration for photos.
    pub photo_seconds: f64,
    /// Cap for video clip durations.
    pub video_max_seconds: f64,
    /// Cap for photo clip durations (weighted / preserve-videos modes).
    pub photo_max_seconds: f64,
    /// Allocation mode.
    pub mode: TimelineMode,
    /// Video weight relative to photos in weighted mode. Must be > 0.
    pub video_weight: f64,
}

impl Default for TimelineParams {
    fn default() -> Self {
        Self {
            target_seconds: 60.0,
            photo_seconds: DEFAULT_PHOTO_SECONDS,
            video_max_seconds: DEFAULT_VIDEO_MAX_SECONDS,
            photo_max_seconds: DEFAULT_PHOTO_MAX_SECONDS,
            mode: TimelineMode::Even,
            video_weight: DEFAULT_VIDEO_WEIGHT,
        }
    }
}

impl TimelineParams {
    /// Params with a specific target runtime and defaults elsewhere.
    pub fn with_target(target_seconds: f64) -> Self {
        Self {
            target_seconds,
            ..Default::default()
        }
    }

    /// Returns a copy using the given allocation mode.
    pub fn with_mode(mut self, mode: TimelineMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Aggregate view of an allocated timeline, for logging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineSummary {
    pub target_seconds: f64,
    pub total_planned: f64,
    pub photo_count: usize,
    pub video_count: usize,
    pub per_photo: f64,
    pub per_video: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_display_matches_serde() {
        assert_eq!(TimelineMode::Even.to_string(), "even");
        assert_eq!(TimelineMode::PreserveVideos.to_string(), "preserve-videos");
        let json = serde_json::to_string(&TimelineMode::PreserveVideos).unwrap();
        assert_eq!(json, "\"preserve-videos\"");
    }

    #[test]
    fn test_default_params() {
        let params = TimelineParams::default();
        assert_eq!(params.mode, TimelineMode::Even);
        assert!((params.photo_seconds - 2.5).abs() < f64::EPSILON);
        assert!((params.video_max_seconds - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_with_target() {
        let params = TimelineParams::with_target(8.0).with_mode(TimelineMode::Weighted);
        assert!((params.target_seconds - 8.0).abs() < f64::EPSILON);
        assert_eq!(params.mode, TimelineMode::Weighted);
    }
}
