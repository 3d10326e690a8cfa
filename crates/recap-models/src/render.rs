//! Render configuration.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default output resolution when the caller does not pick one.
pub const DEFAULT_WIDTH: u32 = 1280;
pub const DEFAULT_HEIGHT: u32 = 720;
/// Default frame rate.
pub const DEFAULT_FPS: u32 = 30;
/// Default per-clip cross-fade length in seconds.
pub const DEFAULT_TRANSITION_SECONDS: f64 = 0.3;
/// Default cap on fade length as a ratio of clip duration (1.0 = no cap).
pub const DEFAULT_FADE_MAX_RATIO: f64 = 1.0;
/// Default blur radius for the letterbox background layer.
pub const DEFAULT_BACKGROUND_BLUR_RADIUS: f64 = 6.0;
/// Default BGM volume as a percentage of the program audio.
pub const DEFAULT_BGM_VOLUME_PERCENT: f64 = 10.0;

/// Output canvas size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Whether the canvas is taller than it is wide.
    pub fn is_portrait(&self) -> bool {
        self.height > self.width
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Immutable configuration for one render job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderConfig {
    /// Total runtime of the output in seconds.
    #[serde(default = "default_target_seconds")]
    pub target_seconds: f64,

    /// Output frame rate.
    #[serde(default = "default_fps")]
    pub fps: u32,

    /// Per-clip cross-fade length in seconds; 0 disables fades.
    #[serde(default = "default_transition_seconds")]
    pub transition_seconds: f64,

    /// Cap on fade length as a ratio of clip duration.
    #[serde(default = "default_fade_max_ratio")]
    pub fade_max_ratio: f64,

    /// Blur radius for the letterbox background; <= 0 disables the
    /// blurred-background composition entirely.
    #[serde(default = "default_background_blur_radius")]
    pub background_blur_radius: f64,

    /// BGM gain as a percentage of the program audio (0-200).
    #[serde(default = "default_bgm_volume_percent")]
    pub bgm_volume_percent: f64,

    /// Keep true video durations instead of trimming to the plan.
    #[serde(default)]
    pub preserve_video_durations: bool,

    /// Force the blurred-background composition for landscape videos too.
    #[serde(default)]
    pub video_blur: bool,

    /// Output canvas.
    #[serde(default)]
    pub output_resolution: Resolution,
}

fn default_target_seconds() -> f64 {
    8.0
}
fn default_fps() -> u32 {
    DEFAULT_FPS
}
fn default_transition_seconds() -> f64 {
    DEFAULT_TRANSITION_SECONDS
}
fn default_fade_max_ratio() -> f64 {
    DEFAULT_FADE_MAX_RATIO
}
fn default_background_blur_radius() -> f64 {
    DEFAULT_BACKGROUND_BLUR_RADIUS
}
fn default_bgm_volume_percent() -> f64 {
    DEFAULT_BGM_VOLUME_PERCENT
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            target_seconds: default_target_seconds(),
            fps: DEFAULT_FPS,
            transition_seconds: DEFAULT_TRANSITION_SECONDS,
            fade_max_ratio: DEFAULT_FADE_MAX_RATIO,
            background_blur_radius: DEFAULT_BACKGROUND_BLUR_RADIUS,
            bgm_volume_percent: DEFAULT_BGM_VOLUME_PERCENT,
            preserve_video_durations: false,
            video_blur: false,
            output_resolution: Resolution::default(),
        }
    }
}

impl RenderConfig {
    /// Config with a specific runtime and defaults elsewhere.
    pub fn with_target(target_seconds: f64) -> Self {
        Self {
            target_seconds,
            ..Default::default()
        }
    }

    /// Returns a copy with the given output canvas.
    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.output_resolution = resolution;
        self
    }

    /// BGM gain as a linear factor (volume percent / 100), clamped to 0-2.
    pub fn bgm_gain(&self) -> f64 {
        (self.bgm_volume_percent / 100.0).clamp(0.0, 2.0)
    }
}
