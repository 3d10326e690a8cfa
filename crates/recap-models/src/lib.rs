//! Shared data models for the recap render engine.
//!
//! This crate provides Serde-serializable types for:
//! - Scanned media descriptors
//! - Timeline clip plans and allocation parameters
//! - Render configuration (canvas, fps, transitions, BGM)
//! - Encoder identities and encoding configuration

pub mod encoding;
pub mod media;
pub mod plan;
pub mod render;

// Re-export common types
pub use encoding::{EncoderChoice, EncoderId, EncodingConfig};
pub use media::{MediaDescriptor, MediaKind};
pub use plan::{ClipPlan, TimelineMode, TimelineParams, TimelineSummary, MIN_CLIP_SECONDS};
pub use render::{RenderConfig, Resolution};
