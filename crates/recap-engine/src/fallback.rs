//! In-process fallback renderer.
//!
//! Used when the external pipeline is unusable before producing any
//! segment. Frames are composed here with the `image` crate (cover, or
//! contain over a blurred background, with per-clip fades) and streamed
//! as raw RGBA into a single minimal rawvideo encode. No filter graphs,
//! no concat machinery, software encoder only. Per-source audio is
//! dropped; background music, when present, rides the same invocation.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use image::imageops::{self, FilterType};
use image::RgbaImage;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tracing::{debug, info};

use recap_media::{check_ffmpeg, fade_length};
use recap_models::{MediaKind, RenderConfig, Resolution};

use crate::error::{RenderError, RenderResult};

const BYTES_PER_PIXEL: usize = 4;

/// What the fallback needs to know about one clip.
#[derive(Debug, Clone)]
pub struct FallbackClip {
    pub path: PathBuf,
    pub kind: MediaKind,
    pub duration: f64,
    /// Probed source dimensions; videos without them are decoded
    /// pre-stretched to the canvas.
    pub dims: Option<(u32, u32)>,
}

/// Render the whole timeline in-process into `output`.
pub async fn render_fallback(
    clips: &[FallbackClip],
    config: &RenderConfig,
    bgm: Option<&Path>,
    output: &Path,
) -> RenderResult<()> {
    let ffmpeg = check_ffmpeg()?;
    let total: f64 = clips.iter().map(|c| c.duration).sum();
    info!(
        clips = clips.len(),
        total_seconds = total,
        "rendering with in-process compositor"
    );

    let mut child = spawn_encoder(&ffmpeg, config, bgm, total, output)?;
    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| RenderError::FallbackFailed("encoder stdin not captured".to_string()))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| RenderError::FallbackFailed("encoder stderr not captured".to_string()))?;

    let stderr_task = tokio::spawn(async move {
        let mut buf = String::new();
        let _ = stderr.read_to_string(&mut buf).await;
        buf
    });

    let write_result = write_frames(&ffmpeg, clips, config, &mut stdin).await;
    drop(stdin);

    let status = child.wait().await?;
    let stderr_text = stderr_task.await.unwrap_or_default();
    write_result?;

    if status.success() {
        Ok(())
    } else {
        Err(RenderError::FallbackFailed(format!(
            "encoder exited with status {:?}: {}",
            status.code(),
            stderr_text.trim()
        )))
    }
}

/// Single encoder invocation reading raw RGBA from stdin.
fn spawn_encoder(
    ffmpeg: &Path,
    config: &RenderConfig,
    bgm: Option<&Path>,
    total: f64,
    output: &Path,
) -> RenderResult<Child> {
    let Resolution { width, height } = config.output_resolution;

    let mut args: Vec<String> = vec![
        "-y".into(),
        "-hide_banner".into(),
        "-v".into(),
        "error".into(),
        "-f".into(),
        "rawvideo".into(),
        "-pix_fmt".into(),
        "rgba".into(),
        "-s".into(),
        format!("{width}x{height}"),
        "-r".into(),
        config.fps.to_string(),
        "-i".into(),
        "pipe:0".into(),
    ];

    match bgm {
        Some(bgm) => {
            let fade = fade_length(config.transition_seconds, config.fade_max_ratio, total);
            let mut chain = format!("volume={:.3}", config.bgm_gain());
            if fade > 0.0 {
                chain.push_str(&format!(
                    ",afade=t=in:st=0:d={fade:.3},afade=t=out:st={:.3}:d={fade:.3}",
                    (total - fade).max(0.0)
                ));
            }
            args.extend([
                "-stream_loop".into(),
                "-1".into(),
                "-i".into(),
                bgm.to_string_lossy().to_string(),
                "-map".into(),
                "0:v".into(),
                "-map".into(),
                "1:a".into(),
                "-af".into(),
                chain,
                "-c:a".into(),
                "aac".into(),
                "-b:a".into(),
                "192k".into(),
            ]);
        }
        None => args.push("-an".into()),
    }

    args.extend([
        "-c:v".into(),
        "libx264".into(),
        "-preset".into(),
        "fast".into(),
        "-crf".into(),
        "28".into(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-movflags".into(),
        "+faststart".into(),
        "-t".into(),
        format!("{total:.3}"),
        output.to_string_lossy().to_string(),
    ]);

    debug!("fallback encoder: ffmpeg {}", args.join(" "));
    Ok(Command::new(ffmpeg)
        .args(&args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()?)
}

async fn write_frames(
    ffmpeg: &Path,
    clips: &[FallbackClip],
    config: &RenderConfig,
    stdin: &mut ChildStdin,
) -> RenderResult<()> {
    for (i, clip) in clips.iter().enumerate() {
        let is_first = i == 0;
        let is_last = i + 1 == clips.len();
        match clip.kind {
            MediaKind::Photo => {
                write_photo_frames(clip, config, is_first, is_last, stdin).await?;
            }
            MediaKind::Video => {
                write_video_frames(ffmpeg, clip, config, is_first, is_last, stdin).await?;
            }
        }
    }
    Ok(())
}

async fn write_photo_frames(
    clip: &FallbackClip,
    config: &RenderConfig,
    is_first: bool,
    is_last: bool,
    stdin: &mut ChildStdin,
) -> RenderResult<()> {
    let source = image::open(&clip.path)
        .map_err(|e| {
            RenderError::FallbackFailed(format!(
                "cannot decode {}: {e}",
                clip.path.display()
            ))
        })?
        .to_rgba8();

    let canvas = compose_canvas(&source, clip.kind, config);
    let fade = fade_length(
        config.transition_seconds,
        config.fade_max_ratio,
        clip.duration,
    );

    let frames = frame_count(clip.duration, config.fps);
    for f in 0..frames {
        let t = f as f64 / config.fps as f64;
        let factor = fade_factor(t, clip.duration, fade, is_first, is_last);
        stdin.write_all(&faded_bytes(&canvas, factor)).await?;
    }
    Ok(())
}

/// Decode a video to raw RGBA frames and compose each one.
///
/// Without known source dimensions the decoder pre-stretches to the
/// canvas and composition is skipped; known dimensions decode at native
/// size and go through the same cover/contain path as photos.
async fn write_video_frames(
    ffmpeg: &Path,
    clip: &FallbackClip,
    config: &RenderConfig,
    is_first: bool,
    is_last: bool,
    stdin: &mut ChildStdin,
) -> RenderResult<()> {
    let Resolution { width, height } = config.output_resolution;
    let (src_w, src_h) = clip.dims.unwrap_or((width, height));
    let frame_len = src_w as usize * src_h as usize * BYTES_PER_PIXEL;

    let mut decoder = Command::new(ffmpeg)
        .args([
            "-hide_banner",
            "-v",
            "error",
            "-i",
            &clip.path.to_string_lossy(),
            "-t",
            &format!("{:.3}", clip.duration),
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgba",
            "-s",
            &format!("{src_w}x{src_h}"),
            "-r",
            &config.fps.to_string(),
            "pipe:1",
        ])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()?;

    let mut decoded = decoder
        .stdout
        .take()
        .ok_or_else(|| RenderError::FallbackFailed("decoder stdout not captured".to_string()))?;

    let fade = fade_length(
        config.transition_seconds,
        config.fade_max_ratio,
        clip.duration,
    );
    let frames = frame_count(clip.duration, config.fps);
    let mut buf = vec![0u8; frame_len];
    let mut last_canvas: Option<RgbaImage> = None;

    for f in 0..frames {
        let canvas = match decoded.read_exact(&mut buf).await {
            Ok(_) => {
                let frame = RgbaImage::from_raw(src_w, src_h, buf.clone()).ok_or_else(|| {
                    RenderError::FallbackFailed("decoded frame size mismatch".to_string())
                })?;
                let canvas = if clip.dims.is_some() {
                    compose_canvas(&frame, clip.kind, config)
                } else {
                    frame
                };
                last_canvas = Some(canvas.clone());
                canvas
            }
            // Short video: hold the last decoded frame.
            Err(_) => match &last_canvas {
                Some(canvas) => canvas.clone(),
                None => RgbaImage::from_pixel(width, height, image::Rgba([0, 0, 0, 255])),
            },
        };

        let t = f as f64 / config.fps as f64;
        let factor = fade_factor(t, clip.duration, fade, is_first, is_last);
        stdin.write_all(&faded_bytes(&canvas, factor)).await?;
    }

    let _ = decoder.wait().await;
    Ok(())
}

/// Number of frames a clip contributes, never zero.
fn frame_count(duration: f64, fps: u32) -> u64 {
    ((duration * fps as f64).round() as u64).max(1)
}

/// Compose one source frame onto the output canvas, mirroring the
/// external pipeline's cover / contain-over-blur decision.
fn compose_canvas(source: &RgbaImage, kind: MediaKind, config: &RenderConfig) -> RgbaImage {
    let target = config.output_resolution;
    let source_portrait = source.height() > source.width();
    let wants_blur = config.background_blur_radius > 0.0
        && (target.is_portrait()
            || source_portrait
            || (kind.is_video() && config.video_blur));

    if !wants_blur {
        return cover(source, target.width, target.height);
    }

    let mut background = cover(source, target.width, target.height);
    background = imageops::blur(&background, config.background_blur_radius as f32);

    let foreground = contain(source, target.width, target.height);
    let x = (target.width - foreground.width()) / 2;
    let y = (target.height - foreground.height()) / 2;
    imageops::overlay(&mut background, &foreground, x as i64, y as i64);
    background
}

/// Scale to fully cover `w`x`h`, then center-crop.
fn cover(source: &RgbaImage, w: u32, h: u32) -> RgbaImage {
    let scale = (w as f64 / source.width() as f64).max(h as f64 / source.height() as f64);
    let rw = ((source.width() as f64 * scale).ceil() as u32).max(w);
    let rh = ((source.height() as f64 * scale).ceil() as u32).max(h);
    let resized = imageops::resize(source, rw, rh, FilterType::Triangle);
    imageops::crop_imm(&resized, (rw - w) / 2, (rh - h) / 2, w, h).to_image()
}

/// Scale to fit inside `w`x`h` without upscaling past native size.
fn contain(source: &RgbaImage, w: u32, h: u32) -> RgbaImage {
    let fit = (w as f64 / source.width() as f64)
        .min(h as f64 / source.height() as f64)
        .min(1.0);
    if fit >= 1.0 {
        return source.clone();
    }
    let fw = ((source.width() as f64 * fit) as u32).max(1);
    let fh = ((source.height() as f64 * fit) as u32).max(1);
    imageops::resize(source, fw, fh, FilterType::Triangle)
}

/// Brightness multiplier for the frame at time `t` within a clip.
fn fade_factor(t: f64, duration: f64, fade: f64, is_first: bool, is_last: bool) -> f64 {
    if fade <= 0.0 {
        return 1.0;
    }
    let mut factor: f64 = 1.0;
    if !is_first && t < fade {
        factor = factor.min(t / fade);
    }
    if !is_last && t > duration - fade {
        factor = factor.min(((duration - t) / fade).max(0.0));
    }
    factor.clamp(0.0, 1.0)
}

/// Frame bytes with the fade factor applied to the color channels.
fn faded_bytes(canvas: &RgbaImage, factor: f64) -> Vec<u8> {
    let raw = canvas.as_raw();
    if factor >= 0.999 {
        return raw.clone();
    }
    let mut out = Vec::with_capacity(raw.len());
    for px in raw.chunks_exact(BYTES_PER_PIXEL) {
        out.push((px[0] as f64 * factor) as u8);
        out.push((px[1] as f64 * factor) as u8);
        out.push((px[2] as f64 * factor) as u8);
        out.push(px[3]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_fn(w, h, |x, y| {
            if (x + y) % 2 == 0 {
                image::Rgba([200, 200, 200, 255])
            } else {
                image::Rgba([40, 40, 40, 255])
            }
        })
    }

    #[test]
    fn test_cover_exact_canvas() {
        let out = cover(&checker(400, 300), 1280, 720);
        assert_eq!((out.width(), out.height()), (1280, 720));
    }

    #[test]
    fn test_contain_never_upscales() {
        let out = contain(&checker(320, 480), 1280, 720);
        assert_eq!((out.width(), out.height()), (320, 480));

        let out = contain(&checker(800, 1200), 1280, 720);
        assert_eq!((out.width(), out.height()), (480, 720));
    }

    #[test]
    fn test_compose_portrait_fills_canvas() {
        let config = RenderConfig::default();
        let out = compose_canvas(&checker(300, 500), MediaKind::Photo, &config);
        assert_eq!(
            (out.width(), out.height()),
            (config.output_resolution.width, config.output_resolution.height)
        );
    }

    #[test]
    fn test_fade_factor_ramps() {
        assert!((fade_factor(0.0, 3.0, 0.3, false, false) - 0.0).abs() < 1e-9);
        assert!((fade_factor(0.15, 3.0, 0.3, false, false) - 0.5).abs() < 1e-9);
        assert!((fade_factor(1.5, 3.0, 0.3, false, false) - 1.0).abs() < 1e-9);
        assert!((fade_factor(2.85, 3.0, 0.3, false, false) - 0.5).abs() < 1e-9);
        // End clips skip their outer fade.
        assert_eq!(fade_factor(0.0, 3.0, 0.3, true, false), 1.0);
        assert_eq!(fade_factor(3.0, 3.0, 0.3, false, true), 1.0);
    }

    #[test]
    fn test_faded_bytes_scales_rgb_only() {
        let img = RgbaImage::from_pixel(2, 1, image::Rgba([100, 200, 50, 255]));
        let bytes = faded_bytes(&img, 0.5);
        assert_eq!(&bytes[..4], &[50, 100, 25, 255]);
    }

    #[test]
    fn test_frame_count_floor() {
        assert_eq!(frame_count(2.5, 30), 75);
        assert_eq!(frame_count(0.01, 30), 1);
    }
}
