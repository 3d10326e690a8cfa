#![deny(unreachable_patterns)]
//! Fixed-duration slideshow render pipeline.
//!
//! Takes an ordered list of media items, splits a fixed target runtime
//! across them, and drives FFmpeg through stage / per-clip encode /
//! concat / mux to a single output file. An in-process compositor backs
//! the external pipeline up when it proves unusable.

pub mod error;
pub mod fallback;
pub mod pipeline;
pub mod timeline;

pub use error::{RenderError, RenderResult};
pub use pipeline::{
    CancelFlag, PipelineOptions, RenderJob, RenderOutcome, RenderProgress, RenderProgressFn,
    RenderStage, StagingMode,
};
pub use timeline::{
    build_timeline, summarize_timeline, TimelineError, VideoDurations, SUM_EPSILON,
};
