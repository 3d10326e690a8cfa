//! Render orchestration.
//!
//! One sequential pipeline per job: validate inputs, probe sources,
//! allocate the timeline, stage remote sources into the job directory,
//! encode each clip to a muted segment plus a fixed-format audio
//! segment, concatenate both tracks, mux (optionally mixing background
//! music), and publish via temp file + move. All intermediates live in
//! a `TempDir` and die with it on every exit path.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tempfile::TempDir;
use tokio::fs;
use tracing::{debug, info, warn};

use recap_media::{
    build_bgm_mix_filter, build_clip_filter, fade_length, filter_scale_from_env, move_file,
    probe_media, sanitize_name, stage_copy, EncoderOverrides, EncoderSelector, FfmpegCommand,
    FfmpegRunner, FilterSpec, MediaError, MediaInfo,
};
use recap_models::{
    ClipPlan, EncoderChoice, EncoderId, MediaDescriptor, MediaKind, RenderConfig, TimelineMode,
    TimelineParams,
};

use crate::error::{RenderError, RenderResult};
use crate::fallback::{self, FallbackClip};
use crate::timeline::{build_timeline, summarize_timeline, VideoDurations};

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStage {
    Staging,
    EncodeClip,
    ConcatVideo,
    ConcatAudio,
    Mux,
    Done,
}

impl fmt::Display for RenderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RenderStage::Staging => "staging",
            RenderStage::EncodeClip => "encode-clip",
            RenderStage::ConcatVideo => "concat-video",
            RenderStage::ConcatAudio => "concat-audio",
            RenderStage::Mux => "mux",
            RenderStage::Done => "done",
        };
        write!(f, "{name}")
    }
}

/// One progress report from the pipeline.
#[derive(Debug, Clone)]
pub struct RenderProgress {
    pub stage: RenderStage,
    /// Index of the clip being encoded, when in the per-clip stage.
    pub clip_index: Option<usize>,
    pub clip_count: usize,
    /// Percent complete of the current toolchain invocation.
    pub percent: f64,
}

/// Caller-supplied progress sink.
pub type RenderProgressFn = Arc<dyn Fn(RenderProgress) + Send + Sync>;

/// When sources get copied into the job directory before encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StagingMode {
    /// Stage sources under a configured remote prefix.
    #[default]
    Auto,
    /// Stage every source.
    Always,
    /// Never stage; encode in place.
    Never,
}

/// Knobs that vary per deployment rather than per render.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Job label; sanitized into the output file name.
    pub job_name: String,
    pub staging_mode: StagingMode,
    /// Path prefixes treated as remote/placeholder mounts in auto mode.
    pub remote_prefixes: Vec<PathBuf>,
    /// Per-invocation timeout for toolchain calls.
    pub timeout_secs: Option<u64>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            job_name: "recap".to_string(),
            staging_mode: StagingMode::Auto,
            remote_prefixes: Vec::new(),
            timeout_secs: None,
        }
    }
}

/// Cooperative cancellation handle. Cancelling never interrupts a
/// running invocation; the pipeline stops before the next clip or stage.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What a finished render produced.
#[derive(Debug, Clone)]
pub struct RenderOutcome {
    pub output: PathBuf,
    pub target_seconds: f64,
    pub clip_count: usize,
    pub encoder: EncoderId,
    pub used_fallback: bool,
}

/// A clip plan joined with what probing learned about its source.
#[derive(Debug, Clone)]
struct ClipJob {
    plan: ClipPlan,
    info: MediaInfo,
}

/// One render job: media in, finished video out.
pub struct RenderJob {
    items: Vec<MediaDescriptor>,
    config: RenderConfig,
    timeline: TimelineParams,
    bgm: Option<PathBuf>,
    output_dir: PathBuf,
    options: PipelineOptions,
    selector: EncoderSelector,
    cancel: CancelFlag,
    progress: Option<RenderProgressFn>,
}

impl RenderJob {
    /// Create a job rendering `items` into `output_dir`.
    ///
    /// Timeline parameters derive from the config: the target runtime is
    /// shared, and `preserve_video_durations` selects preserve-videos
    /// mode. Use [`RenderJob::with_timeline_params`] to override.
    pub fn new(
        items: Vec<MediaDescriptor>,
        config: RenderConfig,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        let mode = if config.preserve_video_durations {
            TimelineMode::PreserveVideos
        } else {
            TimelineMode::Even
        };
        let timeline = TimelineParams::with_target(config.target_seconds).with_mode(mode);

        Self {
            items,
            config,
            timeline,
            bgm: None,
            output_dir: output_dir.into(),
            options: PipelineOptions::default(),
            selector: EncoderSelector::from_env(),
            cancel: CancelFlag::new(),
            progress: None,
        }
    }

    pub fn with_timeline_params(mut self, params: TimelineParams) -> Self {
        self.timeline = params;
        self
    }

    /// Mix a background music track into the final output.
    pub fn with_bgm(mut self, bgm: impl Into<PathBuf>) -> Self {
        self.bgm = Some(bgm.into());
        self
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    /// Replace the environment-derived encoder overrides (tests use this).
    pub fn with_encoder_overrides(mut self, overrides: EncoderOverrides) -> Self {
        self.selector = EncoderSelector::new(overrides);
        self
    }

    pub fn with_progress(mut self, progress: RenderProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Handle for cancelling this job from another task.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    fn runner(&self) -> FfmpegRunner {
        match self.options.timeout_secs {
            Some(secs) => FfmpegRunner::new().with_timeout(secs),
            None => FfmpegRunner::new(),
        }
    }

    fn report(&self, stage: RenderStage, clip_index: Option<usize>, count: usize, percent: f64) {
        if let Some(cb) = &self.progress {
            cb(RenderProgress {
                stage,
                clip_index,
                clip_count: count,
                percent,
            });
        }
    }

    fn check_cancelled(&self) -> RenderResult<()> {
        if self.cancel.is_cancelled() {
            Err(RenderError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Run the job to completion.
    pub async fn run(self) -> RenderResult<RenderOutcome> {
        self.validate_inputs().await?;
        self.check_cancelled()?;

        let workdir = TempDir::new()?;
        debug!(workdir = %workdir.path().display(), "created job directory");

        self.report(RenderStage::Staging, None, 0, 0.0);
        let probes = self.probe_sources().await;
        let durations: VideoDurations = probes
            .iter()
            .filter_map(|(path, info)| info.duration.map(|d| (path.clone(), d)))
            .collect();

        let plans = build_timeline(&self.items, &self.timeline, &durations)?;
        if plans.is_empty() {
            return Err(RenderError::NoMedia);
        }

        let summary = summarize_timeline(&plans, self.timeline.target_seconds);
        info!(
            job = %self.options.job_name,
            clips = plans.len(),
            photos = summary.photo_count,
            videos = summary.video_count,
            target_seconds = summary.target_seconds,
            "timeline allocated"
        );

        let mut clips: Vec<ClipJob> = plans
            .into_iter()
            .map(|plan| {
                let info = probes.get(&plan.path).cloned().unwrap_or_default();
                ClipJob { plan, info }
            })
            .collect();
        self.stage_sources(&mut clips, workdir.path()).await?;

        let choice = self.selector.select().await;
        info!(encoder = choice.id.as_str(), "encoder selected");

        let tmp_final = workdir.path().join("final.mp4");
        let outcome = match self
            .run_primary(&clips, &choice, workdir.path(), &tmp_final)
            .await
        {
            Ok(()) => RenderOutcome {
                output: PathBuf::new(),
                target_seconds: self.timeline.target_seconds,
                clip_count: clips.len(),
                encoder: choice.id,
                used_fallback: false,
            },
            Err(PrimaryError::Unusable(e)) => {
                warn!(error = %e, "external pipeline unusable, switching to fallback renderer");
                self.run_fallback(&clips, &tmp_final).await?;
                RenderOutcome {
                    output: PathBuf::new(),
                    target_seconds: self.timeline.target_seconds,
                    clip_count: clips.len(),
                    encoder: EncoderId::Libx264,
                    used_fallback: true,
                }
            }
            Err(PrimaryError::Fatal(e)) => return Err(e),
        };

        let output = self.publish(&tmp_final).await?;
        self.report(RenderStage::Done, None, clips.len(), 100.0);
        info!(output = %output.display(), "render complete");

        Ok(RenderOutcome { output, ..outcome })
    }

    /// Fail fast on bad inputs, before any toolchain call or temp state.
    async fn validate_inputs(&self) -> RenderResult<()> {
        if self.items.is_empty() {
            return Err(RenderError::NoMedia);
        }

        for item in &self.items {
            let meta = fs::metadata(&item.path)
                .await
                .map_err(|_| RenderError::SourceMissing(item.path.clone()))?;
            if meta.len() == 0 {
                return Err(RenderError::EmptySource(item.path.clone()));
            }
        }

        if let Some(bgm) = &self.bgm {
            let meta = fs::metadata(bgm)
                .await
                .map_err(|_| RenderError::BgmMissing(bgm.clone()))?;
            if meta.len() == 0 {
                return Err(RenderError::BgmMissing(bgm.clone()));
            }
        }

        Ok(())
    }

    /// Probe every source once. Probe failures degrade to defaults; the
    /// allocator falls back to declared estimates for missing durations.
    async fn probe_sources(&self) -> HashMap<PathBuf, MediaInfo> {
        let mut probes = HashMap::new();
        for item in &self.items {
            if probes.contains_key(&item.path) {
                continue;
            }
            match probe_media(&item.path).await {
                Ok(info) => {
                    probes.insert(item.path.clone(), info);
                }
                Err(e) if e.is_toolchain_missing() => {
                    warn!(error = %e, "ffprobe unavailable, using declared estimates");
                    break;
                }
                Err(e) => {
                    warn!(path = %item.path.display(), error = %e, "probe failed");
                }
            }
        }
        probes
    }

    fn should_stage(&self, path: &Path) -> bool {
        match self.options.staging_mode {
            StagingMode::Always => true,
            StagingMode::Never => false,
            StagingMode::Auto => self
                .options
                .remote_prefixes
                .iter()
                .any(|prefix| path.starts_with(prefix)),
        }
    }

    /// Copy remote sources into the job directory and point the plans at
    /// the copies.
    async fn stage_sources(&self, clips: &mut [ClipJob], workdir: &Path) -> RenderResult<()> {
        let staging_dir = workdir.join("staging");
        for (i, clip) in clips.iter_mut().enumerate() {
            if !self.should_stage(&clip.plan.path) {
                continue;
            }
            let staged = stage_copy(&clip.plan.path, &staging_dir, i).await?;
            debug!(
                src = %clip.plan.path.display(),
                staged = %staged.display(),
                "staged source"
            );
            clip.plan.path = staged;
        }
        Ok(())
    }

    /// The external-process pipeline: per-clip encode, concat, mux.
    ///
    /// A first-clip encode failure (after the software retry, before any
    /// segment exists) marks the whole pipeline unusable, which is the
    /// only condition that hands off to the fallback renderer.
    async fn run_primary(
        &self,
        clips: &[ClipJob],
        choice: &EncoderChoice,
        workdir: &Path,
        tmp_final: &Path,
    ) -> Result<(), PrimaryError> {
        let mut video_segments = Vec::with_capacity(clips.len());
        let mut audio_segments = Vec::with_capacity(clips.len());

        for (i, clip) in clips.iter().enumerate() {
            self.check_cancelled().map_err(PrimaryError::Fatal)?;
            self.report(RenderStage::EncodeClip, Some(i), clips.len(), 0.0);

            let segment = self
                .encode_clip(i, clip, clips.len(), choice, workdir)
                .await
                .map_err(|e| PrimaryError::classify(e, i))?;
            let audio = self
                .audio_segment(i, clip, workdir)
                .await
                .map_err(PrimaryError::Fatal)?;
            video_segments.push(segment);
            audio_segments.push(audio);
        }

        self.check_cancelled().map_err(PrimaryError::Fatal)?;
        self.report(RenderStage::ConcatVideo, None, clips.len(), 0.0);
        let program_video = workdir.join("program_video.mp4");
        self.concat(workdir, "video_list.txt", &video_segments, &program_video)
            .await
            .map_err(PrimaryError::Fatal)?;

        self.check_cancelled().map_err(PrimaryError::Fatal)?;
        self.report(RenderStage::ConcatAudio, None, clips.len(), 0.0);
        let program_audio = workdir.join("program_audio.m4a");
        self.concat(workdir, "audio_list.txt", &audio_segments, &program_audio)
            .await
            .map_err(PrimaryError::Fatal)?;

        self.check_cancelled().map_err(PrimaryError::Fatal)?;
        self.report(RenderStage::Mux, None, clips.len(), 0.0);
        self.mux(&program_video, &program_audio, tmp_final, clips.len())
            .await
            .map_err(PrimaryError::Fatal)
    }

    /// Encode one clip to a muted video segment. A hardware encoder gets
    /// exactly one retry with baseline software settings, both on failure
    /// and on degraded output (exit 0 but no usable file).
    async fn encode_clip(
        &self,
        index: usize,
        clip: &ClipJob,
        clip_count: usize,
        choice: &EncoderChoice,
        workdir: &Path,
    ) -> RenderResult<PathBuf> {
        let segment = workdir.join(format!("seg_{index:03}.mp4"));

        let first = self
            .encode_clip_attempt(index, clip, clip_count, choice, &segment)
            .await;

        match first {
            Ok(()) => {
                if segment_usable(&segment).await {
                    return Ok(segment);
                }
                warn!(
                    clip = index,
                    encoder = choice.id.as_str(),
                    "encoder exited cleanly but produced no usable output"
                );
                if !choice.id.is_hardware() {
                    return Err(RenderError::Media(MediaError::InvalidMedia(format!(
                        "encode produced no usable segment for clip {index}"
                    ))));
                }
            }
            Err(e) => {
                if e.is_toolchain_missing() || !choice.id.is_hardware() {
                    return Err(e);
                }
                warn!(clip = index, encoder = choice.id.as_str(), error = %e, "clip encode failed");
            }
        }

        let software = self.selector.software_choice();
        info!(clip = index, "retrying clip with software encoder");
        self.encode_clip_attempt(index, clip, clip_count, &software, &segment)
            .await?;
        if segment_usable(&segment).await {
            Ok(segment)
        } else {
            Err(RenderError::Media(MediaError::InvalidMedia(format!(
                "encode produced no usable segment for clip {index}"
            ))))
        }
    }

    async fn encode_clip_attempt(
        &self,
        index: usize,
        clip: &ClipJob,
        clip_count: usize,
        choice: &EncoderChoice,
        segment: &Path,
    ) -> RenderResult<()> {
        let spec = FilterSpec {
            kind: clip.plan.kind,
            source_dims: clip.info.dimensions(),
            target: self.config.output_resolution,
            duration: clip.plan.duration,
            transition_seconds: self.config.transition_seconds,
            fade_max_ratio: self.config.fade_max_ratio,
            blur_radius: self.config.background_blur_radius,
            video_blur: self.config.video_blur,
            filter_scale: filter_scale_from_env(),
            fps: self.config.fps,
            is_first: index == 0,
            is_last: index + 1 == clip_count,
        };
        let filter = build_clip_filter(&spec);

        let cmd = match clip.plan.kind {
            MediaKind::Photo => FfmpegCommand::new(segment).input_with_args(
                ["-loop", "1", "-framerate", &self.config.fps.to_string()],
                &clip.plan.path,
            ),
            MediaKind::Video => FfmpegCommand::new(segment).input(&clip.plan.path),
        };
        let cmd = cmd
            .filter_complex(filter)
            .map("[vout]")
            .output_arg("-an")
            .output_args(choice.video_args())
            .duration(clip.plan.duration)
            .with_progress();

        let progress = self.progress.clone();
        let duration = clip.plan.duration;
        self.runner()
            .run_with_progress(&cmd, move |p| {
                if let Some(cb) = &progress {
                    cb(RenderProgress {
                        stage: RenderStage::EncodeClip,
                        clip_index: Some(index),
                        clip_count,
                        percent: p.percentage(duration),
                    });
                }
            })
            .await?;
        Ok(())
    }

    /// Produce the clip's audio segment: extracted and padded when the
    /// source carries audio, synthesized silence otherwise. Fixed format
    /// so the concat demuxer can stream-copy.
    async fn audio_segment(
        &self,
        index: usize,
        clip: &ClipJob,
        workdir: &Path,
    ) -> RenderResult<PathBuf> {
        let out = workdir.join(format!("aud_{index:03}.m4a"));

        let cmd = if clip.plan.kind.is_video() && clip.info.has_audio {
            FfmpegCommand::new(&out)
                .input(&clip.plan.path)
                .output_args(["-vn", "-af", "apad", "-ar", "48000", "-ac", "2"])
                .output_args(["-c:a", "aac", "-b:a", "192k"])
                .duration(clip.plan.duration)
        } else {
            FfmpegCommand::new(&out)
                .lavfi_input("anullsrc=channel_layout=stereo:sample_rate=48000")
                .output_args(["-c:a", "aac", "-b:a", "192k"])
                .duration(clip.plan.duration)
        };

        self.runner().run(&cmd).await?;
        Ok(out)
    }

    /// Stream-copy concatenation via the concat demuxer.
    async fn concat(
        &self,
        workdir: &Path,
        list_name: &str,
        segments: &[PathBuf],
        out: &Path,
    ) -> RenderResult<()> {
        let manifest_path = workdir.join(list_name);
        let mut manifest = String::new();
        for segment in segments {
            let quoted = segment.to_string_lossy().replace('\'', "'\\''");
            manifest.push_str(&format!("file '{quoted}'\n"));
        }
        fs::write(&manifest_path, manifest).await?;

        let cmd = FfmpegCommand::new(out)
            .input_with_args(["-f", "concat", "-safe", "0"], &manifest_path)
            .output_args(["-c", "copy"])
            .output_args(["-max_muxing_queue_size", "1024", "-fflags", "+genpts"]);

        self.runner().run(&cmd).await?;
        Ok(())
    }

    /// Final mux: video track stream-copied, program audio re-encoded only
    /// when background music is mixed in.
    async fn mux(
        &self,
        program_video: &Path,
        program_audio: &Path,
        tmp_final: &Path,
        clip_count: usize,
    ) -> RenderResult<()> {
        let total = self.timeline.target_seconds;

        let cmd = match &self.bgm {
            Some(bgm) => {
                let fade = fade_length(
                    self.config.transition_seconds,
                    self.config.fade_max_ratio,
                    total,
                );
                let filter = build_bgm_mix_filter(total, self.config.bgm_gain(), fade);
                FfmpegCommand::new(tmp_final)
                    .input(program_video)
                    .input(program_audio)
                    .input_with_args(["-stream_loop", "-1"], bgm)
                    .filter_complex(filter)
                    .map("0:v")
                    .map("[aout]")
                    .output_args(["-c:v", "copy", "-c:a", "aac", "-b:a", "192k"])
                    .output_args(["-movflags", "+faststart"])
                    .duration(total)
                    .with_progress()
            }
            None => FfmpegCommand::new(tmp_final)
                .input(program_video)
                .input(program_audio)
                .map("0:v")
                .map("1:a")
                .output_args(["-c", "copy", "-movflags", "+faststart"])
                .duration(total)
                .with_progress(),
        };

        let progress = self.progress.clone();
        self.runner()
            .run_with_progress(&cmd, move |p| {
                if let Some(cb) = &progress {
                    cb(RenderProgress {
                        stage: RenderStage::Mux,
                        clip_index: None,
                        clip_count,
                        percent: p.percentage(total),
                    });
                }
            })
            .await?;
        Ok(())
    }

    /// The in-process fallback renderer, attempted once.
    async fn run_fallback(&self, clips: &[ClipJob], tmp_final: &Path) -> RenderResult<()> {
        let fallback_clips: Vec<FallbackClip> = clips
            .iter()
            .map(|c| FallbackClip {
                path: c.plan.path.clone(),
                kind: c.plan.kind,
                duration: c.plan.duration,
                dims: c.info.dimensions(),
            })
            .collect();

        fallback::render_fallback(
            &fallback_clips,
            &self.config,
            self.bgm.as_deref(),
            tmp_final,
        )
        .await
    }

    /// Move the finished file into the output directory under the
    /// sanitized job name.
    async fn publish(&self, tmp_final: &Path) -> RenderResult<PathBuf> {
        let name = sanitize_name(&self.options.job_name);
        let output = self.output_dir.join(format!("{name}.mp4"));
        move_file(tmp_final, &output).await?;
        Ok(output)
    }
}

/// How a primary-pipeline failure should be handled.
enum PrimaryError {
    /// The pipeline cannot work at all; try the fallback renderer.
    Unusable(RenderError),
    /// Surface the error as-is.
    Fatal(RenderError),
}

impl PrimaryError {
    /// Only a first-clip toolchain failure makes the pipeline unusable.
    /// Toolchain absence stays fatal: without ffmpeg the fallback cannot
    /// encode either.
    fn classify(error: RenderError, clip_index: usize) -> Self {
        let eligible = clip_index == 0
            && matches!(
                &error,
                RenderError::Media(
                    MediaError::FfmpegFailed { .. } | MediaError::InvalidMedia(_)
                )
            );
        if eligible {
            PrimaryError::Unusable(error)
        } else {
            PrimaryError::Fatal(error)
        }
    }
}

/// A segment counts only when it exists with actual content.
async fn segment_usable(path: &Path) -> bool {
    matches!(fs::metadata(path).await, Ok(meta) if meta.len() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_stage_modes() {
        let mut job = RenderJob::new(Vec::new(), RenderConfig::default(), "/out");
        job.options.remote_prefixes = vec![PathBuf::from("/mnt/remote")];

        assert!(job.should_stage(Path::new("/mnt/remote/a.jpg")));
        assert!(!job.should_stage(Path::new("/local/a.jpg")));

        job.options.staging_mode = StagingMode::Always;
        assert!(job.should_stage(Path::new("/local/a.jpg")));

        job.options.staging_mode = StagingMode::Never;
        assert!(!job.should_stage(Path::new("/mnt/remote/a.jpg")));
    }

    #[test]
    fn test_preserve_flag_selects_mode() {
        let config = RenderConfig {
            preserve_video_durations: true,
            ..Default::default()
        };
        let job = RenderJob::new(Vec::new(), config, "/out");
        assert_eq!(job.timeline.mode, TimelineMode::PreserveVideos);

        let job = RenderJob::new(Vec::new(), RenderConfig::default(), "/out");
        assert_eq!(job.timeline.mode, TimelineMode::Even);
    }

    #[test]
    fn test_cancel_flag_shared() {
        let job = RenderJob::new(Vec::new(), RenderConfig::default(), "/out");
        let flag = job.cancel_flag();
        assert!(job.check_cancelled().is_ok());
        flag.cancel();
        assert!(matches!(
            job.check_cancelled(),
            Err(RenderError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_empty_items_rejected() {
        let job = RenderJob::new(Vec::new(), RenderConfig::default(), "/out");
        assert!(matches!(job.run().await, Err(RenderError::NoMedia)));
    }
}
