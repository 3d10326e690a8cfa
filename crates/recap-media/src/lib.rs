#![deny(unreachable_patterns)]
//! FFmpeg toolchain wrapper for the render pipeline.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building with multi-input support
//! - Progress parsing from `-progress pipe:1`
//! - Host encoder probing with environment overrides
//! - Per-clip composition filter graphs (cover and contain-over-blur)
//! - Media probing via ffprobe
//! - Staging and cross-device publish helpers

pub mod command;
pub mod encoder;
pub mod error;
pub mod filtergraph;
pub mod fs_utils;
pub mod probe;
pub mod progress;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use encoder::{EncoderOverrides, EncoderSelector};
pub use error::{MediaError, MediaResult};
pub use filtergraph::{
    build_bgm_mix_filter, build_clip_filter, fade_length, filter_scale_from_env, FilterSpec,
};
pub use fs_utils::{move_file, sanitize_name, stage_copy};
pub use probe::{probe_duration, probe_media, MediaInfo};
pub use progress::{parse_progress_line, EncodeProgress, ProgressCallback};
